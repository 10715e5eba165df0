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

//! Rate estimation: the window is whatever the measured throughput can
//! deliver within the target delay.

use std::time::Duration;
use std::time::Instant;

use super::WindowControl;
use super::MINIMUM_WINDOW_PACKETS;

use crate::bandwidth::Bandwidth;
use crate::estimator::BandwidthEstimator;
use crate::rtt::RttStats;
use crate::Config;

#[derive(Debug)]
pub(crate) struct RateEstimation {
    initial_congestion_window: usize,
    min_congestion_window: usize,
    target_delay_floor: Duration,
}

impl RateEstimation {
    pub(crate) fn new(config: &Config) -> Self {
        let mss = config.max_segment_size;

        RateEstimation {
            initial_congestion_window: config.initial_congestion_window_packets *
                mss,
            min_congestion_window: MINIMUM_WINDOW_PACKETS * mss,
            target_delay_floor: config.target_delay_floor,
        }
    }

    /// The delay the window is sized for: the path's minimum RTT, but never
    /// less than the configured floor.
    fn target_delay(&self, rtt_stats: &RttStats) -> Duration {
        match rtt_stats.min_rtt() {
            Some(min_rtt) => min_rtt.max(self.target_delay_floor),
            None => self.target_delay_floor,
        }
    }
}

impl WindowControl for RateEstimation {
    fn state_str(&self) -> &'static str {
        "rate_estimation"
    }

    fn congestion_window(
        &self, estimator: &BandwidthEstimator, rtt_stats: &RttStats,
    ) -> usize {
        let throughput = estimator.estimate();

        if throughput.is_zero() {
            return self.initial_congestion_window;
        }

        let window =
            throughput.to_bytes_per_period(self.target_delay(rtt_stats)) as usize;

        window.max(self.min_congestion_window)
    }

    fn set_congestion_window(
        &mut self, window: usize, estimator: &mut BandwidthEstimator,
        rtt_stats: &RttStats,
    ) {
        let window = window.max(self.min_congestion_window);

        estimator.set_estimate(Bandwidth::from_bytes_and_time_delta(
            window,
            self.target_delay(rtt_stats),
        ));
    }

    fn on_packet_sent(
        &mut self, _sent_time: Instant, _bytes_in_flight: usize,
        _packet_number: u64, _bytes: usize,
    ) {
    }

    fn on_packet_acked(
        &mut self, _packet_number: u64, _bytes: usize, _prior_in_flight: usize,
        _event_time: Instant, _rtt_updated: bool, _rtt_stats: &RttStats,
    ) {
    }

    // Losses show up as lower delivered throughput, so the window follows on
    // its own.
    fn on_packet_lost(&mut self, _packet_number: u64) -> bool {
        false
    }

    fn on_incoming_loss(&mut self) -> bool {
        false
    }

    fn on_retransmission_timeout(
        &mut self, estimator: &mut BandwidthEstimator, rtt_stats: &RttStats,
    ) {
        self.set_congestion_window(
            self.min_congestion_window,
            estimator,
            rtt_stats,
        );
    }

    fn in_slow_start(&self) -> bool {
        false
    }

    fn slow_start_threshold(&self) -> Option<usize> {
        None
    }
}
