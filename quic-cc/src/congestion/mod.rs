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

use std::convert::TryFrom;
use std::fmt::Debug;
use std::str::FromStr;
use std::time::Instant;

use crate::bandwidth::Bandwidth;
use crate::estimator::BandwidthEstimator;
use crate::rtt::RttStats;
use crate::Config;
use crate::Error;

mod aimd;
mod rate;

/// Number of segments the window may fall short of being full while still
/// counting as window-limited.
pub(crate) const MAX_BURST_PACKETS: usize = 3;

/// The window never shrinks below this many segments.
pub(crate) const MINIMUM_WINDOW_PACKETS: usize = 1;

/// Available congestion control algorithms.
///
/// The value doubles as the algorithm tag carried in feedback frames, so a
/// sender and receiver only interoperate when both were created for the same
/// variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CongestionFeedbackType {
    /// Reno window growth and halving. `reno` in a string form.
    Reno          = 0,
    /// CUBIC window growth and backoff. `cubic` in a string form.
    Cubic         = 1,
    /// Window derived from an EWMA of the throughput reported by feedback
    /// (default). `bandwidth_ewma` in a string form.
    BandwidthEwma = 2,
}

impl FromStr for CongestionFeedbackType {
    type Err = Error;

    /// Converts a string to `CongestionFeedbackType`.
    ///
    /// If `name` is not valid, `Error::UnknownAlgorithm` is returned.
    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name {
            "reno" => Ok(CongestionFeedbackType::Reno),
            "cubic" => Ok(CongestionFeedbackType::Cubic),
            "bandwidth_ewma" => Ok(CongestionFeedbackType::BandwidthEwma),

            _ => Err(Error::UnknownAlgorithm),
        }
    }
}

impl TryFrom<u8> for CongestionFeedbackType {
    type Error = Error;

    fn try_from(tag: u8) -> std::result::Result<Self, Self::Error> {
        match tag {
            0 => Ok(CongestionFeedbackType::Reno),
            1 => Ok(CongestionFeedbackType::Cubic),
            2 => Ok(CongestionFeedbackType::BandwidthEwma),

            _ => Err(Error::UnknownAlgorithm),
        }
    }
}

impl std::fmt::Display for CongestionFeedbackType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            CongestionFeedbackType::Reno => "reno",
            CongestionFeedbackType::Cubic => "cubic",
            CongestionFeedbackType::BandwidthEwma => "bandwidth_ewma",
        };

        f.write_str(name)
    }
}

/// How a packet relates to earlier transmissions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransmissionType {
    NotRetransmission,

    /// Retransmitted in response to a NACK. Bypasses the congestion window.
    NackRetransmission,

    /// Retransmitted after a retransmission timeout.
    RtoRetransmission,
}

#[enum_dispatch::enum_dispatch(WindowControl)]
#[derive(Debug)]
pub(crate) enum Controller {
    Aimd(aimd::Aimd),
    RateEstimation(rate::RateEstimation),
}

impl Controller {
    pub(crate) fn new(feedback_type: CongestionFeedbackType, config: &Config) -> Self {
        match feedback_type {
            CongestionFeedbackType::Reno =>
                Controller::Aimd(aimd::Aimd::new(config, true)),

            CongestionFeedbackType::Cubic =>
                Controller::Aimd(aimd::Aimd::new(config, false)),

            CongestionFeedbackType::BandwidthEwma =>
                Controller::RateEstimation(rate::RateEstimation::new(config)),
        }
    }
}

/// A window strategy: turns acknowledgments, losses and bandwidth estimates
/// into the number of bytes the sender may have in flight.
#[enum_dispatch::enum_dispatch]
pub(crate) trait WindowControl: Debug {
    /// Returns the name of the current state, for logging.
    fn state_str(&self) -> &'static str;

    /// Returns the size of the current congestion window in bytes. Note, this
    /// is not the *available* window.
    fn congestion_window(
        &self, estimator: &BandwidthEstimator, rtt_stats: &RttStats,
    ) -> usize;

    /// Overrides the congestion window.
    fn set_congestion_window(
        &mut self, window: usize, estimator: &mut BandwidthEstimator,
        rtt_stats: &RttStats,
    );

    /// Inform that a retransmittable packet of `bytes` was sent.
    /// `bytes_in_flight` is the number of bytes in flight before the packet
    /// was sent.
    fn on_packet_sent(
        &mut self, sent_time: Instant, bytes_in_flight: usize,
        packet_number: u64, bytes: usize,
    );

    /// Inform that a packet was acknowledged. `prior_in_flight` is the bytes
    /// in flight before the acknowledged bytes were removed, `rtt_updated`
    /// whether the acknowledgment produced a new RTT sample.
    fn on_packet_acked(
        &mut self, packet_number: u64, bytes: usize, prior_in_flight: usize,
        event_time: Instant, rtt_updated: bool, rtt_stats: &RttStats,
    );

    /// Inform that `packet_number` was declared lost. Returns whether the
    /// window was reduced.
    fn on_packet_lost(&mut self, packet_number: u64) -> bool;

    /// Inform that the peer reported loss without naming a packet. Returns
    /// whether the window was reduced.
    fn on_incoming_loss(&mut self) -> bool;

    /// Called when an RTO fires. Falls back to the most conservative window.
    fn on_retransmission_timeout(
        &mut self, estimator: &mut BandwidthEstimator, rtt_stats: &RttStats,
    );

    fn in_slow_start(&self) -> bool;

    fn slow_start_threshold(&self) -> Option<usize>;

    /// Bandwidth implied by the window, used until feedback has produced a
    /// measured estimate.
    fn bandwidth_estimate(
        &self, estimator: &BandwidthEstimator, rtt_stats: &RttStats,
    ) -> Bandwidth {
        if !rtt_stats.has_sample() {
            // If we haven't measured an rtt, the bandwidth estimate is
            // unknown.
            return Bandwidth::zero();
        }

        Bandwidth::from_bytes_and_time_delta(
            self.congestion_window(estimator, rtt_stats),
            rtt_stats.smoothed_rtt(),
        )
    }
}
