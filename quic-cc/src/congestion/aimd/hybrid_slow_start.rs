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

/// RTT samples per round taken into account.
const MIN_SAMPLES: usize = 8;

/// The exit threshold is `min_rtt >> DELAY_FACTOR_EXP`, i.e. 1/8 of it.
const DELAY_FACTOR_EXP: u32 = 3;

/// Delay detection is only acted upon from this many segments on.
pub(super) const LOW_WINDOW: usize = 16;

const DELAY_MIN_THRESHOLD: Duration = Duration::from_millis(4);
const DELAY_MAX_THRESHOLD: Duration = Duration::from_millis(16);

/// Delay-increase detection for leaving slow start before the first loss.
///
/// A round lasts until the last packet sent when it began is acknowledged.
/// The lowest of the first `MIN_SAMPLES` RTTs of a round is compared against
/// the connection minimum.
#[derive(Default, Debug)]
pub(super) struct HybridSlowStart {
    in_round: bool,

    found: bool,

    last_sent_packet_number: u64,

    round_end: Option<u64>,

    sample_count: usize,

    round_min_rtt: Option<Duration>,
}

impl HybridSlowStart {
    pub(super) fn restart(&mut self) {
        self.in_round = false;
        self.found = false;
    }

    pub(super) fn on_packet_sent(&mut self, packet_number: u64) {
        self.last_sent_packet_number = packet_number;
    }

    /// Ends the round once its last packet is acknowledged. The next sample
    /// starts a new one.
    pub(super) fn on_packet_acked(&mut self, packet_number: u64) {
        if self.is_end_of_round(packet_number) {
            self.in_round = false;
        }
    }

    fn start_round(&mut self, last_sent: u64) {
        self.round_end = Some(last_sent);
        self.round_min_rtt = None;
        self.sample_count = 0;
        self.in_round = true;
    }

    fn is_end_of_round(&self, packet_number: u64) -> bool {
        self.round_end.map_or(true, |end| end <= packet_number)
    }

    fn threshold(min_rtt: Duration) -> Duration {
        let eighth = min_rtt / (1 << DELAY_FACTOR_EXP);

        eighth.clamp(DELAY_MIN_THRESHOLD, DELAY_MAX_THRESHOLD)
    }

    /// Feeds an RTT sample and returns whether slow start should end.
    /// `congestion_window` is in segments.
    pub(super) fn should_exit_slow_start(
        &mut self, latest_rtt: Duration, min_rtt: Duration,
        congestion_window: usize,
    ) -> bool {
        if !self.in_round {
            self.start_round(self.last_sent_packet_number);
        }

        if self.found {
            return congestion_window >= LOW_WINDOW;
        }

        self.sample_count += 1;

        if self.sample_count <= MIN_SAMPLES {
            self.round_min_rtt = Some(match self.round_min_rtt {
                Some(rtt) => rtt.min(latest_rtt),
                None => latest_rtt,
            });
        }

        if self.sample_count == MIN_SAMPLES {
            if let Some(round_min_rtt) = self.round_min_rtt {
                if round_min_rtt >
                    min_rtt.saturating_add(Self::threshold(min_rtt))
                {
                    self.found = true;
                }
            }
        }

        congestion_window >= LOW_WINDOW && self.found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds() {
        let mut hss = HybridSlowStart::default();

        // Without a round every ack ends it.
        assert!(hss.is_end_of_round(0));

        hss.start_round(5);
        assert!(!hss.is_end_of_round(3));
        assert!(!hss.is_end_of_round(4));
        assert!(!hss.is_end_of_round(4));
        assert!(hss.is_end_of_round(5));
        assert!(hss.is_end_of_round(9));

        hss.on_packet_sent(30);
        hss.on_packet_acked(5);
        assert!(!hss.in_round);

        // The next sample opens a round ending at the last packet sent.
        hss.should_exit_slow_start(
            Duration::from_millis(50),
            Duration::from_millis(50),
            10,
        );
        assert!(hss.in_round);
        assert!(!hss.is_end_of_round(29));
        assert!(hss.is_end_of_round(30));
    }

    #[test]
    fn threshold_is_clamped() {
        assert_eq!(
            HybridSlowStart::threshold(Duration::from_millis(10)),
            DELAY_MIN_THRESHOLD
        );
        assert_eq!(
            HybridSlowStart::threshold(Duration::from_millis(80)),
            Duration::from_millis(10)
        );
        assert_eq!(
            HybridSlowStart::threshold(Duration::from_millis(400)),
            DELAY_MAX_THRESHOLD
        );
    }

    #[test]
    fn exits_on_delay_increase() {
        let mut hss = HybridSlowStart::default();
        let min_rtt = Duration::from_millis(80);

        // Threshold is 10ms. A round whose lowest sample is 5ms above the
        // minimum doesn't trigger.
        hss.start_round(1);
        for n in 0..MIN_SAMPLES as u64 {
            let rtt = min_rtt + Duration::from_millis(5 + n);
            assert!(!hss.should_exit_slow_start(rtt, min_rtt, 100));
        }

        hss.start_round(2);
        for n in 0..MIN_SAMPLES as u64 - 1 {
            let rtt = min_rtt + Duration::from_millis(11 + n);
            assert!(!hss.should_exit_slow_start(rtt, min_rtt, 100));
        }

        assert!(hss.should_exit_slow_start(
            min_rtt + Duration::from_millis(20),
            min_rtt,
            100
        ));
    }

    #[test]
    fn small_windows_stay_in_slow_start() {
        let mut hss = HybridSlowStart::default();
        let min_rtt = Duration::from_millis(40);

        hss.start_round(1);
        for _ in 0..MIN_SAMPLES {
            assert!(!hss.should_exit_slow_start(
                Duration::from_millis(100),
                min_rtt,
                LOW_WINDOW - 1
            ));
        }

        // The delay was detected and applies once the window is large enough.
        assert!(hss.found);
        assert!(!hss.should_exit_slow_start(
            Duration::from_millis(100),
            min_rtt,
            LOW_WINDOW - 1
        ));
        assert!(hss.should_exit_slow_start(
            Duration::from_millis(100),
            min_rtt,
            LOW_WINDOW
        ));
    }
}
