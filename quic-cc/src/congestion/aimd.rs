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

//! Window-based additive-increase/multiplicative-decrease, in its Reno and
//! CUBIC flavours.

mod cubic_bytes;
mod hybrid_slow_start;

use std::time::Duration;
use std::time::Instant;

use cubic_bytes::CubicBytes;
use hybrid_slow_start::HybridSlowStart;
use hybrid_slow_start::LOW_WINDOW;

use super::WindowControl;
use super::MAX_BURST_PACKETS;
use super::MINIMUM_WINDOW_PACKETS;

use crate::estimator::BandwidthEstimator;
use crate::rtt::RttStats;
use crate::Config;

/// Reno multiplier after a loss.
const RENO_BETA: f32 = 0.5;

#[derive(Debug)]
pub(crate) struct Aimd {
    congestion_window: usize,
    max_congestion_window: usize,
    min_congestion_window: usize,
    slow_start_threshold: usize,
    mss: usize,

    largest_sent_packet_number: Option<u64>,
    largest_acked_packet_number: Option<u64>,
    largest_sent_at_last_cutback: Option<u64>,

    /// Acks counted towards the next Reno increase.
    num_acked_packets: usize,

    hybrid_slow_start: Option<HybridSlowStart>,
    cubic: CubicBytes,

    reno: bool,
}

impl Aimd {
    pub(crate) fn new(config: &Config, reno: bool) -> Self {
        let mss = config.max_segment_size;
        let max_congestion_window = config.max_congestion_window_packets * mss;

        Aimd {
            congestion_window: config.initial_congestion_window_packets * mss,
            max_congestion_window,
            min_congestion_window: MINIMUM_WINDOW_PACKETS * mss,
            slow_start_threshold: max_congestion_window,
            mss,

            largest_sent_packet_number: None,
            largest_acked_packet_number: None,
            largest_sent_at_last_cutback: None,

            num_acked_packets: 0,

            hybrid_slow_start: config
                .hybrid_slow_start
                .then(HybridSlowStart::default),
            cubic: CubicBytes::new(mss, config.cubic_num_connections),

            reno,
        }
    }

    fn is_in_slow_start(&self) -> bool {
        self.congestion_window < self.slow_start_threshold
    }

    /// Whether an ack that found `prior_in_flight` bytes outstanding happened
    /// while the sender was using (nearly) the whole window.
    fn is_cwnd_limited(&self, prior_in_flight: usize) -> bool {
        if prior_in_flight >= self.congestion_window {
            return true;
        }

        self.congestion_window - prior_in_flight <= MAX_BURST_PACKETS * self.mss
    }

    /// Packets sent before the last cutback are still being acknowledged.
    fn is_in_recovery(&self) -> bool {
        match (
            self.largest_acked_packet_number,
            self.largest_sent_at_last_cutback,
        ) {
            (Some(largest_acked), Some(largest_sent_at_last_cutback)) =>
                largest_acked <= largest_sent_at_last_cutback,

            _ => false,
        }
    }

    fn exit_slow_start(&mut self) {
        self.slow_start_threshold = self.congestion_window;

        debug!(
            "slow start exit: cwnd={} min_rtt increase detected",
            self.congestion_window
        );
    }

    fn maybe_increase_cwnd(
        &mut self, acked_bytes: usize, prior_in_flight: usize,
        event_time: Instant, min_rtt: Duration,
    ) {
        if !self.is_cwnd_limited(prior_in_flight) {
            self.cubic.on_app_limited();
            return;
        }

        if self.congestion_window >= self.max_congestion_window {
            return;
        }

        if self.is_in_slow_start() {
            self.congestion_window += self.mss;
            return;
        }

        if self.reno {
            self.num_acked_packets += 1;

            if self.num_acked_packets >= self.congestion_window / self.mss {
                self.congestion_window += self.mss;
                self.num_acked_packets = 0;
            }
        } else {
            self.congestion_window = self.max_congestion_window.min(
                self.cubic.congestion_window_after_ack(
                    acked_bytes,
                    self.congestion_window,
                    min_rtt,
                    event_time,
                ),
            );
        }
    }

    /// Applies one multiplicative decrease.
    fn cut_back(&mut self) {
        let before = self.congestion_window;

        self.congestion_window = if self.reno {
            (self.congestion_window as f32 * RENO_BETA) as usize
        } else {
            self.cubic.congestion_window_after_loss(self.congestion_window)
        };

        self.congestion_window =
            self.congestion_window.max(self.min_congestion_window);
        self.slow_start_threshold = self.congestion_window;

        self.largest_sent_at_last_cutback = self.largest_sent_packet_number;
        self.num_acked_packets = 0;

        debug!(
            "congestion event: cwnd {} -> {}, ssthresh={}",
            before, self.congestion_window, self.slow_start_threshold
        );
    }
}

impl WindowControl for Aimd {
    fn state_str(&self) -> &'static str {
        if self.is_in_recovery() {
            "recovery"
        } else if self.is_in_slow_start() {
            "slow_start"
        } else {
            "congestion_avoidance"
        }
    }

    fn congestion_window(
        &self, _estimator: &BandwidthEstimator, _rtt_stats: &RttStats,
    ) -> usize {
        self.congestion_window
    }

    fn set_congestion_window(
        &mut self, window: usize, _estimator: &mut BandwidthEstimator,
        _rtt_stats: &RttStats,
    ) {
        self.congestion_window = window.max(self.min_congestion_window);
    }

    fn on_packet_sent(
        &mut self, _sent_time: Instant, _bytes_in_flight: usize,
        packet_number: u64, _bytes: usize,
    ) {
        self.largest_sent_packet_number = Some(packet_number);

        if let Some(hss) = self.hybrid_slow_start.as_mut() {
            hss.on_packet_sent(packet_number);
        }
    }

    fn on_packet_acked(
        &mut self, packet_number: u64, bytes: usize, prior_in_flight: usize,
        event_time: Instant, rtt_updated: bool, rtt_stats: &RttStats,
    ) {
        self.largest_acked_packet_number = Some(
            self.largest_acked_packet_number
                .map_or(packet_number, |n| n.max(packet_number)),
        );

        let min_rtt = rtt_stats.min_rtt().unwrap_or(rtt_stats.smoothed_rtt());

        let cwnd_packets = self.congestion_window / self.mss;

        if rtt_updated &&
            self.is_in_slow_start() &&
            cwnd_packets >= LOW_WINDOW
        {
            let latest_rtt = rtt_stats.latest_rtt();

            let exit = self.hybrid_slow_start.as_mut().map_or(false, |hss| {
                hss.should_exit_slow_start(latest_rtt, min_rtt, cwnd_packets)
            });

            if exit {
                self.exit_slow_start();
            }
        }

        if self.is_in_recovery() {
            return;
        }

        self.maybe_increase_cwnd(bytes, prior_in_flight, event_time, min_rtt);

        if self.is_in_slow_start() {
            if let Some(hss) = self.hybrid_slow_start.as_mut() {
                hss.on_packet_acked(packet_number);
            }
        }
    }

    fn on_packet_lost(&mut self, packet_number: u64) -> bool {
        // Losses of packets sent before the last cutback belong to the same
        // congestion event.
        if let Some(largest_sent_at_last_cutback) =
            self.largest_sent_at_last_cutback
        {
            if packet_number <= largest_sent_at_last_cutback {
                trace!(
                    "loss of {} ignored, cutback covered up to {}",
                    packet_number,
                    largest_sent_at_last_cutback
                );
                return false;
            }
        }

        self.cut_back();

        true
    }

    fn on_incoming_loss(&mut self) -> bool {
        self.cut_back();

        true
    }

    fn on_retransmission_timeout(
        &mut self, _estimator: &mut BandwidthEstimator, _rtt_stats: &RttStats,
    ) {
        self.largest_sent_at_last_cutback = None;
        self.num_acked_packets = 0;

        if let Some(hss) = self.hybrid_slow_start.as_mut() {
            hss.restart();
        }

        self.cubic.reset();

        self.slow_start_threshold =
            (self.congestion_window / 2).max(self.min_congestion_window);
        self.congestion_window = self.min_congestion_window;
    }

    fn in_slow_start(&self) -> bool {
        self.is_in_slow_start()
    }

    fn slow_start_threshold(&self) -> Option<usize> {
        Some(self.slow_start_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::CongestionFeedbackType;

    const MSS: usize = 1460;

    struct Harness {
        aimd: Aimd,
        rtt_stats: RttStats,
        estimator: BandwidthEstimator,
        now: Instant,
        next_pkt: u64,
        bytes_in_flight: usize,
    }

    impl Harness {
        fn new(reno: bool, config: &Config) -> Self {
            Harness {
                aimd: Aimd::new(config, reno),
                rtt_stats: RttStats::new(config.initial_rtt),
                estimator: BandwidthEstimator::new(config),
                now: Instant::now(),
                next_pkt: 0,
                bytes_in_flight: 0,
            }
        }

        fn cwnd(&self) -> usize {
            self.aimd.congestion_window(&self.estimator, &self.rtt_stats)
        }

        /// Sends until the window is full.
        fn fill(&mut self) {
            while self.bytes_in_flight < self.cwnd() {
                self.aimd.on_packet_sent(
                    self.now,
                    self.bytes_in_flight,
                    self.next_pkt,
                    MSS,
                );
                self.next_pkt += 1;
                self.bytes_in_flight += MSS;
            }
        }

        fn ack(&mut self, pkt: u64, rtt: Duration) {
            let rtt_updated = self.rtt_stats.update_rtt(rtt);
            let prior_in_flight = self.bytes_in_flight;
            self.bytes_in_flight -= MSS;

            self.aimd.on_packet_acked(
                pkt,
                MSS,
                prior_in_flight,
                self.now,
                rtt_updated,
                &self.rtt_stats,
            );
        }
    }

    fn config(max_packets: usize) -> Config {
        let mut config = Config::new(CongestionFeedbackType::Reno);
        config.set_max_congestion_window_packets(max_packets);
        config
    }

    #[test]
    fn slow_start_doubles_per_round() {
        let mut h = Harness::new(true, &config(1000));
        let rtt = Duration::from_millis(50);

        assert_eq!(h.cwnd(), 10 * MSS);
        assert_eq!(h.aimd.slow_start_threshold(), Some(1000 * MSS));

        for pkt in 0..10 {
            h.fill();
            h.ack(pkt, rtt);
        }

        assert_eq!(h.cwnd(), 20 * MSS);
        assert!(h.aimd.in_slow_start());
        assert_eq!(h.aimd.state_str(), "slow_start");
    }

    #[test]
    fn app_limited_acks_do_not_grow() {
        let mut h = Harness::new(true, &config(1000));

        h.fill();

        // Ack most of the window without sending anything new.
        for pkt in 0..10 {
            h.ack(pkt, Duration::from_millis(50));
        }

        // Only the acks within MAX_BURST_PACKETS of a full window counted.
        assert_eq!(h.cwnd(), 12 * MSS);
    }

    #[test]
    fn reno_halves_once_per_event() {
        let mut h = Harness::new(true, &config(1000));

        h.aimd.set_congestion_window(
            20 * MSS,
            &mut h.estimator,
            &h.rtt_stats,
        );
        h.fill();
        let last_sent = h.next_pkt - 1;

        assert!(h.aimd.on_packet_lost(3));
        assert_eq!(h.cwnd(), 10 * MSS);
        assert_eq!(h.aimd.slow_start_threshold(), Some(10 * MSS));
        assert!(!h.aimd.in_slow_start());

        // Further losses from the same flight are the same event.
        assert!(!h.aimd.on_packet_lost(4));
        assert!(!h.aimd.on_packet_lost(last_sent));
        assert_eq!(h.cwnd(), 10 * MSS);

        // Peer-reported losses always apply.
        assert!(h.aimd.on_incoming_loss());
        assert_eq!(h.cwnd(), 5 * MSS);
    }

    #[test]
    fn no_growth_during_recovery() {
        let mut h = Harness::new(true, &config(1000));

        h.fill();
        h.aimd.on_packet_lost(0);
        let cwnd = h.cwnd();

        h.ack(1, Duration::from_millis(50));
        assert_eq!(h.cwnd(), cwnd);
        assert_eq!(h.aimd.state_str(), "recovery");
    }

    #[test]
    fn reno_congestion_avoidance() {
        let mut h = Harness::new(true, &config(1000));

        h.aimd.on_incoming_loss();
        assert_eq!(h.cwnd(), 5 * MSS);

        // One segment per window's worth of acks.
        let mut pkt = h.next_pkt;
        for _ in 0..4 {
            h.fill();
            h.ack(pkt, Duration::from_millis(50));
            pkt += 1;
        }
        assert_eq!(h.cwnd(), 5 * MSS);

        h.fill();
        h.ack(pkt, Duration::from_millis(50));
        assert_eq!(h.cwnd(), 6 * MSS);
    }

    #[test]
    fn cubic_backoff() {
        let mut h = Harness::new(false, &config(1000));

        h.aimd.set_congestion_window(
            100 * MSS,
            &mut h.estimator,
            &h.rtt_stats,
        );
        h.aimd.on_incoming_loss();

        let beta = h.aimd.cubic.beta();
        assert_eq!(h.cwnd(), ((100 * MSS) as f32 * beta) as usize);
        assert_eq!(h.aimd.slow_start_threshold(), Some(h.cwnd()));
    }

    #[test]
    fn window_never_below_one_segment() {
        for reno in [true, false] {
            let mut h = Harness::new(reno, &config(1000));

            for _ in 0..20 {
                h.aimd.on_incoming_loss();
            }
            assert_eq!(h.cwnd(), MSS);

            h.aimd
                .set_congestion_window(0, &mut h.estimator, &h.rtt_stats);
            assert_eq!(h.cwnd(), MSS);
        }
    }

    #[test]
    fn growth_capped_at_max_window() {
        let mut h = Harness::new(true, &config(12));

        for pkt in 0..10 {
            h.fill();
            h.ack(pkt, Duration::from_millis(50));
        }

        assert_eq!(h.cwnd(), 12 * MSS);
    }

    #[test]
    fn retransmission_timeout() {
        let mut h = Harness::new(false, &config(1000));

        h.aimd.set_congestion_window(
            40 * MSS,
            &mut h.estimator,
            &h.rtt_stats,
        );
        h.fill();
        h.aimd.on_packet_lost(0);
        let cwnd = h.cwnd();

        h.aimd
            .on_retransmission_timeout(&mut h.estimator, &h.rtt_stats);

        assert_eq!(h.cwnd(), MSS);
        assert_eq!(h.aimd.slow_start_threshold(), Some(cwnd / 2));
        assert!(h.aimd.in_slow_start());

        // Cutback bookkeeping is gone: an old packet counts as a new event.
        assert!(h.aimd.on_packet_lost(1));
    }

    #[test]
    fn hybrid_slow_start_exit() {
        let mut h = Harness::new(false, &config(1000));
        h.aimd.set_congestion_window(
            20 * MSS,
            &mut h.estimator,
            &h.rtt_stats,
        );

        h.rtt_stats.update_rtt(Duration::from_millis(40));

        // A round of samples well above the minimum. The window grew by one
        // segment on each of the first seven acks.
        for pkt in 0..8 {
            h.fill();
            h.ack(pkt, Duration::from_millis(80));
        }

        assert!(!h.aimd.in_slow_start());
        assert_eq!(h.aimd.slow_start_threshold(), Some(27 * MSS));
        assert!(h.cwnd() >= 27 * MSS);
    }

    #[test]
    fn hybrid_slow_start_ignores_small_windows() {
        let mut h = Harness::new(false, &config(1000));

        h.rtt_stats.update_rtt(Duration::from_millis(40));
        h.fill();

        // Delayed samples without refilling keep the window below 16
        // segments.
        for pkt in 0..9 {
            h.ack(pkt, Duration::from_millis(80));
        }

        assert!(h.cwnd() < 16 * MSS);
        assert!(h.aimd.in_slow_start());
        assert_eq!(h.aimd.slow_start_threshold(), Some(1000 * MSS));
    }
}
