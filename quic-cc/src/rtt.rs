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

/// RTT assumed before the first sample arrives.
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(60);

/// Smoothed round-trip time estimator (Jacobson/Karels).
pub struct RttStats {
    latest_rtt: Duration,

    smoothed_rtt: Option<Duration>,

    // Mean deviation, roughly 1.25 times the standard deviation for a
    // normally distributed signal.
    rttvar: Duration,

    min_rtt: Option<Duration>,

    initial_rtt: Duration,
}

impl RttStats {
    pub fn new(initial_rtt: Duration) -> Self {
        RttStats {
            latest_rtt: Duration::ZERO,

            // Stays `None` until the first sample so that callers can tell
            // an estimate from the bootstrap value, which `smoothed_rtt()`
            // substitutes.
            smoothed_rtt: None,

            rttvar: initial_rtt / 2,

            min_rtt: None,

            initial_rtt,
        }
    }

    /// Folds a new RTT sample into the estimate.
    ///
    /// Zero and infinite samples carry no information and are ignored.
    /// Returns whether the sample was taken.
    pub fn update_rtt(&mut self, latest_rtt: Duration) -> bool {
        if latest_rtt.is_zero() || latest_rtt == Duration::MAX {
            return false;
        }

        self.latest_rtt = latest_rtt;

        self.min_rtt = Some(match self.min_rtt {
            Some(min_rtt) => min_rtt.min(latest_rtt),
            None => latest_rtt,
        });

        match self.smoothed_rtt {
            // First RTT sample.
            None => {
                self.smoothed_rtt = Some(latest_rtt);

                self.rttvar = latest_rtt / 2;
            },

            Some(srtt) => {
                let abs_difference = srtt
                    .saturating_sub(latest_rtt)
                    .max(latest_rtt.saturating_sub(srtt));

                self.rttvar = (self.rttvar.saturating_mul(3) / 4)
                    .saturating_add(abs_difference / 4);

                self.smoothed_rtt = Some(
                    (srtt.saturating_mul(7) / 8).saturating_add(latest_rtt / 8),
                );
            },
        }

        true
    }

    pub fn has_sample(&self) -> bool {
        self.smoothed_rtt.is_some()
    }

    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt.unwrap_or(self.initial_rtt)
    }

    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    pub fn min_rtt(&self) -> Option<Duration> {
        self.min_rtt
    }

    /// The retransmission timeout: `srtt + 4 * rttvar`, saturating at
    /// `Duration::MAX`.
    pub fn retransmission_delay(&self) -> Duration {
        self.smoothed_rtt()
            .saturating_add(self.rttvar.saturating_mul(4))
    }
}

impl Default for RttStats {
    fn default() -> Self {
        RttStats::new(DEFAULT_INITIAL_RTT)
    }
}

impl std::fmt::Debug for RttStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RttStats")
            .field("latest_rtt", &self.latest_rtt)
            .field("srtt", &self.smoothed_rtt)
            .field("min_rtt", &self.min_rtt)
            .field("rttvar", &self.rttvar)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_values() {
        let rtt = RttStats::default();

        assert!(!rtt.has_sample());
        assert_eq!(rtt.smoothed_rtt(), DEFAULT_INITIAL_RTT);
        assert_eq!(rtt.min_rtt(), None);
        assert_eq!(
            rtt.retransmission_delay(),
            DEFAULT_INITIAL_RTT + DEFAULT_INITIAL_RTT * 2
        );
    }

    #[test]
    fn first_sample() {
        let mut rtt = RttStats::default();

        assert!(rtt.update_rtt(Duration::from_millis(100)));

        assert_eq!(rtt.smoothed_rtt(), Duration::from_millis(100));
        assert_eq!(rtt.rttvar(), Duration::from_millis(50));
        assert_eq!(rtt.min_rtt(), Some(Duration::from_millis(100)));
        assert_eq!(rtt.retransmission_delay(), Duration::from_millis(300));
    }

    #[test]
    fn ignores_degenerate_samples() {
        let mut rtt = RttStats::default();

        assert!(!rtt.update_rtt(Duration::ZERO));
        assert!(!rtt.update_rtt(Duration::MAX));
        assert!(!rtt.has_sample());

        rtt.update_rtt(Duration::from_millis(40));

        assert!(!rtt.update_rtt(Duration::ZERO));
        assert_eq!(rtt.smoothed_rtt(), Duration::from_millis(40));
        assert_eq!(rtt.latest_rtt(), Duration::from_millis(40));
    }

    #[test]
    fn near_infinite_samples_saturate() {
        let mut rtt = RttStats::default();
        let huge = Duration::from_secs(u64::MAX);

        assert!(rtt.update_rtt(huge));
        assert_eq!(rtt.retransmission_delay(), Duration::MAX);

        assert!(rtt.update_rtt(huge));
        assert!(rtt.update_rtt(Duration::from_millis(10)));
        assert!(rtt.smoothed_rtt() > Duration::from_secs(u64::MAX / 16));
        assert_eq!(rtt.min_rtt(), Some(Duration::from_millis(10)));
        assert_eq!(rtt.retransmission_delay(), Duration::MAX);
    }

    #[test]
    fn smoothing() {
        let mut rtt = RttStats::default();

        rtt.update_rtt(Duration::from_millis(80));
        rtt.update_rtt(Duration::from_millis(160));

        // rttvar = 3/4 * 40 + 1/4 * |80 - 160|
        assert_eq!(rtt.rttvar(), Duration::from_millis(50));
        // srtt = 7/8 * 80 + 1/8 * 160
        assert_eq!(rtt.smoothed_rtt(), Duration::from_millis(90));
        assert_eq!(rtt.min_rtt(), Some(Duration::from_millis(80)));
    }

    #[test]
    fn converges_to_constant_rtt() {
        let mut rtt = RttStats::default();
        let target = Duration::from_millis(50);

        rtt.update_rtt(Duration::from_millis(500));

        let mut prev_error = rtt.smoothed_rtt() - target;

        for _ in 0..200 {
            rtt.update_rtt(target);

            // Approaches from above and never undershoots.
            let error = rtt.smoothed_rtt() - target;
            assert!(error <= prev_error);
            prev_error = error;
        }

        assert!(prev_error < Duration::from_micros(10));
    }
}
