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

use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

use crate::frame::Arrival;
use crate::frame::FeedbackFrame;
use crate::frame::MAX_ARRIVALS;
use crate::stats::ReceiverStats;
use crate::CongestionFeedbackType;
use crate::Config;

pub const DEFAULT_RECEIVE_WINDOW: u64 = 256_000;

/// The receiving half of a congestion controller: records arrivals and
/// turns them into feedback frames for the peer's [`Sender`].
///
/// [`Sender`]: crate::Sender
#[derive(Debug)]
pub struct Receiver {
    feedback_type: CongestionFeedbackType,

    /// Newest arrivals since the last feedback frame, keyed by packet number.
    arrivals: BTreeMap<u64, Duration>,

    /// Arrival time of the first packet recorded. Timestamps are reported
    /// relative to it.
    epoch: Option<Instant>,

    recovered_loss_count: u64,

    receive_window: u64,

    stats: ReceiverStats,

    trace_id: String,
}

impl Receiver {
    pub fn new(config: &Config) -> Receiver {
        Receiver {
            feedback_type: config.feedback_type,
            arrivals: BTreeMap::new(),
            epoch: None,
            recovered_loss_count: 0,
            receive_window: config.receive_window,
            stats: ReceiverStats::default(),
            trace_id: String::new(),
        }
    }

    pub fn set_trace_id(&mut self, trace_id: &str) {
        self.trace_id = trace_id.to_string();
    }

    pub fn feedback_type(&self) -> CongestionFeedbackType {
        self.feedback_type
    }

    /// Records the arrival of `pkt_num` at `timestamp`. `revived` packets
    /// were lost on the wire and recovered by the transport; they count as a
    /// loss signal for the sender.
    pub fn record_incoming_packet(
        &mut self, bytes: usize, pkt_num: u64, timestamp: Instant, revived: bool,
    ) {
        let epoch = *self.epoch.get_or_insert(timestamp);

        self.arrivals
            .insert(pkt_num, timestamp.saturating_duration_since(epoch));

        while self.arrivals.len() > MAX_ARRIVALS {
            self.arrivals.pop_first();
        }

        if revived {
            self.recovered_loss_count += 1;
            self.stats.revived += 1;
        }

        self.stats.recv += 1;
        self.stats.recv_bytes += bytes as u64;

        trace!(
            "{} rx pkt {} size={} revived={}",
            self.trace_id,
            pkt_num,
            bytes,
            revived
        );
    }

    /// Builds a frame from the arrivals recorded since the previous call, and
    /// forgets them.
    pub fn generate_congestion_feedback(&mut self) -> FeedbackFrame {
        let arrivals = std::mem::take(&mut self.arrivals)
            .into_iter()
            .map(|(pkt_num, time)| Arrival { pkt_num, time })
            .collect();

        self.stats.feedback_frames += 1;

        let frame = FeedbackFrame {
            feedback_type: self.feedback_type,
            recovered_loss_count: self.recovered_loss_count,
            receive_window: self.receive_window,
            arrivals,
        };

        trace!("{} feedback {:?}", self.trace_id, frame);

        frame
    }

    /// Sets the receive window advertised in feedback frames.
    pub fn set_receive_window(&mut self, bytes: u64) {
        self.receive_window = bytes;
    }

    pub fn receive_window(&self) -> u64 {
        self.receive_window
    }

    pub fn recovered_loss_count(&self) -> u64 {
        self.recovered_loss_count
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> Receiver {
        Receiver::new(&Config::new(CongestionFeedbackType::Cubic))
    }

    #[test]
    fn feedback_reports_arrivals_once() {
        let mut r = receiver();
        let start = Instant::now();

        for pkt in 1..=5 {
            r.record_incoming_packet(
                1200,
                pkt,
                start + Duration::from_millis(pkt * 10),
                false,
            );
        }

        let frame = r.generate_congestion_feedback();
        assert_eq!(frame.feedback_type, CongestionFeedbackType::Cubic);
        assert_eq!(frame.recovered_loss_count, 0);
        assert_eq!(frame.receive_window, DEFAULT_RECEIVE_WINDOW);

        let pkts: Vec<_> = frame.arrivals.iter().map(|a| a.pkt_num).collect();
        assert_eq!(pkts, [1, 2, 3, 4, 5]);

        // Offsets from the first arrival.
        assert_eq!(frame.arrivals[0].time, Duration::ZERO);
        assert_eq!(frame.arrivals[4].time, Duration::from_millis(40));

        let frame = r.generate_congestion_feedback();
        assert!(frame.arrivals.is_empty());
        assert_eq!(frame.recovered_loss_count, 0);

        let stats = r.stats();
        assert_eq!(stats.recv, 5);
        assert_eq!(stats.recv_bytes, 6000);
        assert_eq!(stats.feedback_frames, 2);
    }

    #[test]
    fn keeps_newest_arrivals() {
        let mut r = receiver();
        let start = Instant::now();

        // Out of order, more than fit in one frame.
        for pkt in [3, 1, 2, 12, 11, 10, 4, 9, 8, 7, 6, 5] {
            r.record_incoming_packet(1000, pkt, start, false);
        }

        let frame = r.generate_congestion_feedback();
        let pkts: Vec<_> = frame.arrivals.iter().map(|a| a.pkt_num).collect();
        assert_eq!(pkts, [5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn duplicates_overwrite() {
        let mut r = receiver();
        let start = Instant::now();

        r.record_incoming_packet(1000, 1, start, false);
        r.record_incoming_packet(1000, 1, start + Duration::from_millis(5), false);

        let frame = r.generate_congestion_feedback();
        assert_eq!(frame.arrivals.len(), 1);
        assert_eq!(frame.arrivals[0].time, Duration::from_millis(5));
    }

    #[test]
    fn revived_packets_accumulate() {
        let mut r = receiver();
        let start = Instant::now();

        r.record_incoming_packet(1000, 1, start, true);
        r.record_incoming_packet(1000, 2, start, false);
        r.record_incoming_packet(1000, 3, start, true);

        assert_eq!(r.generate_congestion_feedback().recovered_loss_count, 2);

        // The counter is cumulative across frames.
        r.record_incoming_packet(1000, 4, start, true);
        assert_eq!(r.generate_congestion_feedback().recovered_loss_count, 3);
        assert_eq!(r.stats().revived, 3);
    }

    #[test]
    fn advertised_window() {
        let mut r = receiver();

        r.set_receive_window(64_000);
        assert_eq!(r.receive_window(), 64_000);
        assert_eq!(r.generate_congestion_feedback().receive_window, 64_000);
    }
}
