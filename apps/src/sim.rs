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

//! A deterministic single-bottleneck link driving a sender/receiver pair.
//!
//! Packets are serialized at the bottleneck rate behind a drop-tail queue,
//! then propagate for the one-way delay. Every arrival is acknowledged one
//! delay later, and the receiver's feedback frames cross the wire encoded.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

use quic_cc::Bandwidth;
use quic_cc::FeedbackFrame;
use quic_cc::Receiver;
use quic_cc::Result;
use quic_cc::Sender;
use quic_cc::TransmissionType;

/// Simulation time resolution.
const STEP: Duration = Duration::from_micros(100);

/// Packets acknowledged out of order by more than this are lost.
const PACKET_THRESHOLD: u64 = 3;

const MAX_FEEDBACK_LEN: usize = 256;

pub struct SimConfig {
    pub cc: quic_cc::Config,
    pub bandwidth: Bandwidth,
    pub delay: Duration,
    pub queue: usize,
    pub duration: Duration,
    pub feedback_interval: Duration,
    pub report_interval: Duration,
}

/// Sender state at one point in simulated time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub time: Duration,
    pub congestion_window: usize,
    pub bytes_in_flight: usize,
    pub bandwidth: Bandwidth,
    pub smoothed_rtt: Duration,
    pub delivered: u64,
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:>8} ms cwnd={:>8} bif={:>8} bw={:?} srtt={:?} delivered={}",
            self.time.as_millis(),
            self.congestion_window,
            self.bytes_in_flight,
            self.bandwidth,
            self.smoothed_rtt,
            self.delivered,
        )
    }
}

#[derive(Clone, Copy, Debug)]
struct Packet {
    pkt_num: u64,
    size: usize,
    time_sent: Instant,
}

pub struct Simulator {
    sender: Sender,
    receiver: Receiver,

    config: SimConfig,
    mss: usize,

    start: Instant,
    now: Instant,

    next_pkt_num: u64,

    /// Packets the sender is waiting on, by packet number.
    outstanding: BTreeMap<u64, Packet>,

    /// Departure times of the packets queued at the bottleneck.
    queue: VecDeque<Instant>,
    last_departure: Instant,

    /// Packets propagating towards the receiver, with their arrival time.
    forward: VecDeque<(Instant, Packet)>,

    /// Acknowledgments propagating back, with their arrival time.
    acks: VecDeque<(Instant, Packet)>,

    /// Encoded feedback frames propagating back.
    feedback: VecDeque<(Instant, Vec<u8>)>,

    next_feedback: Instant,
    last_progress: Instant,

    delivered: u64,
    dropped: usize,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Result<Simulator> {
        let tag = config.cc.feedback_type() as u8;

        let mut sender = quic_cc::create_sender(tag, &config.cc)?;
        sender.set_trace_id("sim-sender");

        let mut receiver = quic_cc::create_receiver(tag, &config.cc)?;
        receiver.set_trace_id("sim-receiver");

        let start = Instant::now();

        Ok(Simulator {
            mss: config.cc.max_segment_size(),
            next_feedback: start + config.feedback_interval,
            sender,
            receiver,
            config,
            start,
            now: start,
            next_pkt_num: 0,
            outstanding: BTreeMap::new(),
            queue: VecDeque::new(),
            last_departure: start,
            forward: VecDeque::new(),
            acks: VecDeque::new(),
            feedback: VecDeque::new(),
            last_progress: start,
            delivered: 0,
            dropped: 0,
        })
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Packets dropped at the bottleneck so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Runs for the configured duration, calling `on_report` every report
    /// interval.
    pub fn run<F: FnMut(&Report)>(&mut self, mut on_report: F) -> Result<()> {
        let end = self.start + self.config.duration;
        let mut next_report = self.start + self.config.report_interval;

        while self.now < end {
            self.step()?;

            if self.now >= next_report {
                on_report(&self.report());
                next_report += self.config.report_interval;
            }

            self.now += STEP;
        }

        info!(
            "simulation done: delivered={} dropped={} {:?}",
            self.delivered,
            self.dropped,
            self.sender.stats()
        );

        Ok(())
    }

    pub fn report(&self) -> Report {
        Report {
            time: self.now.saturating_duration_since(self.start),
            congestion_window: self.sender.congestion_window(),
            bytes_in_flight: self.sender.bytes_in_flight(),
            bandwidth: self.sender.bandwidth_estimate(),
            smoothed_rtt: self.sender.smoothed_rtt(),
            delivered: self.delivered,
        }
    }

    fn step(&mut self) -> Result<()> {
        self.drain_queue();
        self.receive_packets();
        self.receive_acks();
        self.exchange_feedback()?;
        self.check_timeout();
        self.send_packets();

        Ok(())
    }

    fn drain_queue(&mut self) {
        while let Some(&departure) = self.queue.front() {
            if departure > self.now {
                break;
            }

            self.queue.pop_front();
        }
    }

    fn receive_packets(&mut self) {
        while let Some(&(arrival, pkt)) = self.forward.front() {
            if arrival > self.now {
                break;
            }

            self.forward.pop_front();

            self.receiver
                .record_incoming_packet(pkt.size, pkt.pkt_num, arrival, false);

            self.acks.push_back((arrival + self.config.delay, pkt));
        }
    }

    fn receive_acks(&mut self) {
        while let Some(&(arrival, pkt)) = self.acks.front() {
            if arrival > self.now {
                break;
            }

            self.acks.pop_front();

            // Already given up on.
            if self.outstanding.remove(&pkt.pkt_num).is_none() {
                continue;
            }

            let rtt = arrival.saturating_duration_since(pkt.time_sent);

            self.sender
                .on_packet_acked(pkt.pkt_num, pkt.size, rtt, arrival);

            self.delivered += pkt.size as u64;
            self.last_progress = arrival;

            self.detect_losses(pkt.pkt_num);
        }
    }

    fn detect_losses(&mut self, largest_acked: u64) {
        let lost: Vec<_> = self
            .outstanding
            .range(..largest_acked.saturating_sub(PACKET_THRESHOLD))
            .map(|(_, pkt)| *pkt)
            .collect();

        for pkt in lost {
            self.outstanding.remove(&pkt.pkt_num);

            self.sender.on_packet_lost(pkt.pkt_num, self.now);
            self.sender
                .on_packet_abandoned(pkt.pkt_num, pkt.size, self.now);
        }
    }

    fn exchange_feedback(&mut self) -> Result<()> {
        if self.now >= self.next_feedback {
            let frame = self.receiver.generate_congestion_feedback();

            let mut buf = vec![0; MAX_FEEDBACK_LEN];
            let len = frame.to_bytes(&mut octets::OctetsMut::with_slice(&mut buf))?;
            buf.truncate(len);

            self.feedback.push_back((self.now + self.config.delay, buf));
            self.next_feedback += self.config.feedback_interval;
        }

        while let Some((arrival, _)) = self.feedback.front() {
            if *arrival > self.now {
                break;
            }

            if let Some((arrival, buf)) = self.feedback.pop_front() {
                let frame =
                    FeedbackFrame::from_bytes(&mut octets::Octets::with_slice(&buf))?;

                self.sender.on_congestion_feedback(&frame, arrival)?;
            }
        }

        Ok(())
    }

    fn check_timeout(&mut self) {
        if self.outstanding.is_empty() {
            self.last_progress = self.now;
            return;
        }

        let rto = self.sender.retransmission_delay();

        if self.now.saturating_duration_since(self.last_progress) < rto {
            return;
        }

        debug!("rto after {:?} with {} outstanding", rto, self.outstanding.len());

        self.sender.on_retransmission_timeout(self.now);

        for (pkt_num, pkt) in std::mem::take(&mut self.outstanding) {
            self.sender.on_packet_abandoned(pkt_num, pkt.size, self.now);
        }

        self.last_progress = self.now;
    }

    fn send_packets(&mut self) {
        loop {
            let delay = self.sender.time_until_send(
                self.now,
                TransmissionType::NotRetransmission,
                true,
                false,
            );

            if !delay.is_zero() {
                break;
            }

            let pkt = Packet {
                pkt_num: self.next_pkt_num,
                size: self.mss,
                time_sent: self.now,
            };

            self.next_pkt_num += 1;

            self.sender.on_packet_sent(
                self.now,
                pkt.pkt_num,
                pkt.size,
                TransmissionType::NotRetransmission,
                true,
            );

            self.outstanding.insert(pkt.pkt_num, pkt);

            self.enqueue(pkt);
        }
    }

    /// Puts `pkt` behind the bottleneck, or drops it if the queue is full.
    fn enqueue(&mut self, pkt: Packet) {
        if self.queue.len() >= self.config.queue {
            trace!("bottleneck drop {}", pkt.pkt_num);

            self.dropped += 1;
            return;
        }

        let departure = self.last_departure.max(self.now) +
            self.config.bandwidth.transfer_time(pkt.size);

        self.last_departure = departure;
        self.queue.push_back(departure);
        self.forward.push_back((departure + self.config.delay, pkt));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use quic_cc::CongestionFeedbackType;

    fn config(cc: CongestionFeedbackType, queue: usize) -> SimConfig {
        SimConfig {
            cc: quic_cc::Config::new(cc),
            bandwidth: Bandwidth::from_kbits_per_second(5_000),
            delay: Duration::from_millis(20),
            queue,
            duration: Duration::from_secs(3),
            feedback_interval: Duration::from_millis(10),
            report_interval: Duration::from_millis(100),
        }
    }

    fn run(cc: CongestionFeedbackType, queue: usize) -> (Simulator, Vec<Report>) {
        let mut sim = Simulator::new(config(cc, queue)).unwrap();
        let mut reports = Vec::new();

        sim.run(|r| reports.push(r.clone())).unwrap();

        (sim, reports)
    }

    #[test]
    fn windows_stay_positive() {
        for cc in [
            CongestionFeedbackType::Reno,
            CongestionFeedbackType::Cubic,
            CongestionFeedbackType::BandwidthEwma,
        ] {
            let (sim, reports) = run(cc, 20);

            assert_eq!(reports.len(), 29);
            assert!(reports.iter().all(|r| r.congestion_window >= 1460));
            assert!(sim.delivered > 0);
            assert!(sim.sender().stats().feedback_frames > 0);
        }
    }

    #[test]
    fn small_queue_causes_loss() {
        let (sim, _) = run(CongestionFeedbackType::Reno, 4);

        assert!(sim.dropped() > 0);

        let stats = sim.sender().stats();
        assert!(stats.lost > 0);
        assert!(stats.congestion_events > 0);
    }

    #[test]
    fn delivery_bounded_by_link() {
        let (sim, _) = run(CongestionFeedbackType::Cubic, 50);

        // 5 Mbps for 3 seconds.
        assert!(sim.delivered <= 5_000_000 / 8 * 3);
        assert!(sim.sender().smoothed_rtt() >= Duration::from_millis(40));
    }
}
