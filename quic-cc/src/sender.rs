// Copyright (C) 2025, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::time::Duration;
use std::time::Instant;

use crate::bandwidth::Bandwidth;
use crate::bytes_in_flight::BytesInFlight;
use crate::congestion::Controller;
use crate::congestion::WindowControl;
use crate::estimator::BandwidthEstimator;
use crate::frame::FeedbackFrame;
use crate::rtt::RttStats;
use crate::sent_history::SentHistory;
use crate::sent_history::SentPacket;
use crate::stats::CongestionSample;
use crate::stats::SampleTrigger;
use crate::stats::SenderStats;
use crate::stats::StatsSink;
use crate::CongestionFeedbackType;
use crate::Config;
use crate::Error;
use crate::Result;
use crate::TransmissionType;

/// Returned by [`Sender::time_until_send`] when nothing may be sent until
/// an acknowledgment, loss or feedback event opens the window.
pub const INFINITE_DELAY: Duration = Duration::MAX;

/// The sending half of a congestion controller.
///
/// The transport reports every transmission, acknowledgment, loss and
/// feedback frame, and asks [`time_until_send`] before transmitting.
///
/// [`time_until_send`]: Sender::time_until_send
pub struct Sender {
    feedback_type: CongestionFeedbackType,

    controller: Controller,

    rtt_stats: RttStats,

    estimator: BandwidthEstimator,

    history: SentHistory,

    bytes_in_flight: BytesInFlight,

    /// Receive window advertised in the latest feedback frame. Unlimited
    /// before the first one.
    peer_receive_window: Option<u64>,

    last_recovered_loss_count: u64,

    mss: usize,

    stats: SenderStats,

    stats_sink: Option<Box<dyn StatsSink + Send>>,

    last_event_time: Option<Instant>,

    trace_id: String,
}

impl Sender {
    /// Creates a sender for the algorithm selected in `config`.
    pub fn new(config: &Config) -> Sender {
        Sender {
            feedback_type: config.feedback_type,

            controller: Controller::new(config.feedback_type, config),

            rtt_stats: RttStats::new(config.initial_rtt),

            estimator: BandwidthEstimator::new(config),

            history: SentHistory::new(config.max_sent_history),

            bytes_in_flight: BytesInFlight::default(),

            peer_receive_window: None,

            last_recovered_loss_count: 0,

            mss: config.max_segment_size,

            stats: SenderStats::default(),

            stats_sink: None,

            last_event_time: None,

            trace_id: String::new(),
        }
    }

    /// Sets the prefix of every log line emitted by this sender.
    pub fn set_trace_id(&mut self, trace_id: &str) {
        self.trace_id = trace_id.to_string();
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Installs a sink that observes every state change.
    pub fn set_stats_sink(&mut self, sink: Box<dyn StatsSink + Send>) {
        self.stats_sink = Some(sink);
    }

    pub fn feedback_type(&self) -> CongestionFeedbackType {
        self.feedback_type
    }

    /// Applies negotiated settings. A server starts from
    /// `server_initial_congestion_window` packets when it is set.
    pub fn set_from_config(&mut self, config: &Config, is_server: bool) {
        if !is_server {
            return;
        }

        if let Some(packets) = config.server_initial_congestion_window {
            self.set_congestion_window(packets * self.mss);

            trace!(
                "{} server initial window {} packets",
                self.trace_id,
                packets
            );
        }
    }

    /// Records a transmission. Returns whether the packet is tracked, which
    /// is only the case for packets carrying retransmittable data.
    pub fn on_packet_sent(
        &mut self, now: Instant, pkt_num: u64, bytes: usize,
        transmission_type: TransmissionType, has_retransmittable_data: bool,
    ) -> bool {
        self.last_event_time = Some(now);

        if !has_retransmittable_data {
            return false;
        }

        let prior_in_flight = self.bytes_in_flight.get();

        self.bytes_in_flight.add(bytes, now);

        self.stats.history_evictions += self.history.insert(SentPacket {
            pkt_num,
            size: bytes,
            time_sent: now,
        });

        self.controller
            .on_packet_sent(now, prior_in_flight, pkt_num, bytes);

        self.stats.sent += 1;
        self.stats.sent_bytes += bytes as u64;

        trace!(
            "{} tx pkt {} size={} {:?} bif={}",
            self.trace_id,
            pkt_num,
            bytes,
            transmission_type,
            self.bytes_in_flight.get()
        );

        true
    }

    /// Records the acknowledgment of `bytes` sent in `pkt_num`, with the RTT
    /// measured for it.
    ///
    /// Panics if more bytes are acknowledged than are in flight.
    pub fn on_packet_acked(
        &mut self, pkt_num: u64, bytes: usize, rtt: Duration, now: Instant,
    ) {
        self.last_event_time = Some(now);

        let prior_in_flight = self.bytes_in_flight.get();
        self.bytes_in_flight.subtract(bytes, now);

        let rtt_updated = self.rtt_stats.update_rtt(rtt);

        self.controller.on_packet_acked(
            pkt_num,
            bytes,
            prior_in_flight,
            now,
            rtt_updated,
            &self.rtt_stats,
        );

        self.stats.acked += 1;

        trace!("{} packet acked {} {:?}", self.trace_id, pkt_num, self);

        self.report(now, SampleTrigger::Ack, false);
    }

    /// Records that the transport declared `pkt_num` lost. The packet stays
    /// in flight until it is abandoned or acknowledged late.
    pub fn on_packet_lost(&mut self, pkt_num: u64, now: Instant) {
        self.last_event_time = Some(now);

        self.stats.lost += 1;

        let reduced = self.controller.on_packet_lost(pkt_num);

        trace!("{} packet {} lost {:?}", self.trace_id, pkt_num, self);

        self.report(now, SampleTrigger::Loss, reduced);
    }

    /// Records a loss the peer reported without naming a packet.
    pub fn on_incoming_loss(&mut self, now: Instant) {
        self.last_event_time = Some(now);

        let reduced = self.controller.on_incoming_loss();

        trace!("{} incoming loss {:?}", self.trace_id, self);

        self.report(now, SampleTrigger::Loss, reduced);
    }

    /// Stops tracking `pkt_num`, e.g. when its data will never be
    /// retransmitted. The window is unaffected.
    ///
    /// Panics if more bytes are abandoned than are in flight.
    pub fn on_packet_abandoned(&mut self, pkt_num: u64, bytes: usize, now: Instant) {
        self.last_event_time = Some(now);

        self.bytes_in_flight.subtract(bytes, now);
        self.history.remove(pkt_num);

        self.stats.abandoned += 1;

        trace!(
            "{} packet {} abandoned bif={}",
            self.trace_id,
            pkt_num,
            self.bytes_in_flight.get()
        );
    }

    /// Processes a feedback frame received at `receive_time`.
    ///
    /// Fails with [`Error::FeedbackMismatch`], leaving the sender untouched,
    /// if the frame was produced for another algorithm. Arrivals of packets
    /// the sender no longer remembers are ignored.
    pub fn on_congestion_feedback(
        &mut self, frame: &FeedbackFrame, receive_time: Instant,
    ) -> Result<()> {
        if frame.feedback_type != self.feedback_type {
            self.stats.feedback_mismatches += 1;

            trace!(
                "{} feedback for {} rejected, expected {}",
                self.trace_id,
                frame.feedback_type,
                self.feedback_type
            );

            return Err(Error::FeedbackMismatch);
        }

        self.last_event_time = Some(receive_time);

        let ticks =
            self.estimator
                .on_feedback(frame, &self.history, &self.rtt_stats);

        if let Some(largest) = frame.largest_arrival() {
            self.history.retire_up_to(largest.pkt_num);
        }

        self.peer_receive_window = Some(frame.receive_window);

        self.stats.feedback_frames += 1;

        if ticks > 0 {
            debug!(
                "{} bandwidth estimate {:?} after {} ticks",
                self.trace_id,
                self.estimator.estimate(),
                ticks
            );
        }

        let mut reduced = false;

        if frame.recovered_loss_count > self.last_recovered_loss_count {
            self.last_recovered_loss_count = frame.recovered_loss_count;

            reduced = self.controller.on_incoming_loss();
        }

        trace!(
            "{} feedback arrivals={} loss_count={} rwnd={} {:?}",
            self.trace_id,
            frame.arrivals.len(),
            frame.recovered_loss_count,
            frame.receive_window,
            self
        );

        self.report(receive_time, SampleTrigger::Feedback, reduced);

        Ok(())
    }

    /// Called when the retransmission timer fires.
    pub fn on_retransmission_timeout(&mut self, now: Instant) {
        self.last_event_time = Some(now);

        self.controller
            .on_retransmission_timeout(&mut self.estimator, &self.rtt_stats);

        self.stats.rtos += 1;

        debug!("{} retransmission timeout {:?}", self.trace_id, self);

        self.report(now, SampleTrigger::Timeout, true);
    }

    /// Returns how long to wait before the packet described by the
    /// arguments may be sent: zero, or [`INFINITE_DELAY`] while the window
    /// is full.
    pub fn time_until_send(
        &self, _now: Instant, transmission_type: TransmissionType,
        has_retransmittable_data: bool, is_handshake: bool,
    ) -> Duration {
        if transmission_type == TransmissionType::NackRetransmission ||
            !has_retransmittable_data ||
            is_handshake
        {
            return Duration::ZERO;
        }

        if self.available_send_window() > 0 {
            Duration::ZERO
        } else {
            INFINITE_DELAY
        }
    }

    /// Bytes that may still be sent: the smaller of the congestion window
    /// and the peer's receive window, minus what is in flight.
    pub fn available_send_window(&self) -> usize {
        let window = match self.peer_receive_window {
            Some(rwnd) =>
                self.congestion_window().min(rwnd.min(usize::MAX as u64) as usize),

            None => self.congestion_window(),
        };

        window.saturating_sub(self.bytes_in_flight.get())
    }

    /// The congestion window in bytes.
    pub fn congestion_window(&self) -> usize {
        self.controller
            .congestion_window(&self.estimator, &self.rtt_stats)
    }

    /// Overrides the congestion window, never below one segment.
    pub fn set_congestion_window(&mut self, window: usize) {
        self.controller.set_congestion_window(
            window,
            &mut self.estimator,
            &self.rtt_stats,
        );
    }

    /// The measured throughput once feedback produced one, otherwise the
    /// rate implied by the window and smoothed RTT.
    pub fn bandwidth_estimate(&self) -> Bandwidth {
        if self.estimator.has_estimate() {
            return self.estimator.estimate();
        }

        self.controller
            .bandwidth_estimate(&self.estimator, &self.rtt_stats)
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.rtt_stats.smoothed_rtt()
    }

    pub fn retransmission_delay(&self) -> Duration {
        self.rtt_stats.retransmission_delay()
    }

    pub fn rtt_stats(&self) -> &RttStats {
        &self.rtt_stats
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight.get()
    }

    pub fn in_slow_start(&self) -> bool {
        self.controller.in_slow_start()
    }

    /// The slow start threshold in bytes, `None` for rate estimation.
    pub fn slow_start_threshold(&self) -> Option<usize> {
        self.controller.slow_start_threshold()
    }

    pub fn peer_receive_window(&self) -> Option<u64> {
        self.peer_receive_window
    }

    pub fn max_segment_size(&self) -> usize {
        self.mss
    }

    /// Number of sent packets currently remembered for bandwidth estimation.
    pub fn sent_history_len(&self) -> usize {
        self.history.len()
    }

    /// Returns the counters, with the busy duration measured up to the
    /// latest event.
    pub fn stats(&self) -> SenderStats {
        let mut stats = self.stats.clone();
        stats.bandwidth_ticks = self.estimator.ticks_closed();

        if let Some(now) = self.last_event_time {
            stats.busy_duration = self.bytes_in_flight.busy_duration(now);
        }

        stats
    }

    fn report(&mut self, now: Instant, trigger: SampleTrigger, reduced: bool) {
        if reduced {
            self.stats.congestion_events += 1;
        }

        if self.stats_sink.is_none() {
            return;
        }

        let sample = CongestionSample {
            time: now,
            trigger,
            congestion_window: self.congestion_window(),
            bytes_in_flight: self.bytes_in_flight.get(),
            smoothed_rtt: self.rtt_stats.smoothed_rtt(),
            min_rtt: self.rtt_stats.min_rtt(),
            bandwidth: self.bandwidth_estimate(),
            in_slow_start: self.in_slow_start(),
        };

        if let Some(sink) = self.stats_sink.as_mut() {
            sink.on_sample(&sample);

            if reduced {
                sink.on_congestion_event(&sample);
            }
        }
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "type={} ", self.feedback_type)?;
        write!(f, "state={} ", self.controller.state_str())?;
        write!(f, "cwnd={} ", self.congestion_window())?;
        write!(f, "bif={} ", self.bytes_in_flight.get())?;

        if let Some(ssthresh) = self.slow_start_threshold() {
            write!(f, "ssthresh={ssthresh} ")?;
        }

        if let Some(rwnd) = self.peer_receive_window {
            write!(f, "rwnd={rwnd} ")?;
        }

        write!(f, "{:?} ", self.rtt_stats)?;
        write!(f, "bw={:?}", self.bandwidth_estimate())?;

        Ok(())
    }
}
