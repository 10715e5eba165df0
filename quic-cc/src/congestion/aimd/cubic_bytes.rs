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

// Time is measured in 2^10 fractions of a second so that a right shift by 10
// divides. The cube scale folds in 0.100^3, 100 ms being the scaling round
// trip time.
const CUBE_SCALE: u64 = 40;
const CUBE_CONGESTION_WINDOW_SCALE: u64 = 410;

const CUBIC_BACKOFF_FACTOR: f32 = 0.7;

// Extra backoff applied to the remembered maximum when a loss happens before
// the window got back to it.
const BETA_LAST_MAX: f32 = 0.85;

/// The CUBIC window function, in bytes, emulating `num_connections` Reno
/// flows.
#[derive(Debug)]
pub(super) struct CubicBytes {
    num_connections: usize,
    mss: usize,

    /// Start of the current growth cycle, i.e. the first ack after the last
    /// loss or app-limited period.
    epoch: Option<Instant>,

    /// Window just before the last loss, possibly lowered for fast
    /// convergence.
    last_max_congestion_window: usize,

    acked_bytes_count: usize,

    /// Reno-equivalent window, so CUBIC never grows slower than Reno would.
    estimated_tcp_congestion_window: usize,

    origin_point_congestion_window: usize,

    /// In 2^10 fractions of a second.
    time_to_origin_point: u64,
}

impl CubicBytes {
    pub(super) fn new(mss: usize, num_connections: usize) -> Self {
        CubicBytes {
            num_connections: num_connections.max(1),
            mss,
            epoch: None,
            last_max_congestion_window: 0,
            acked_bytes_count: 0,
            estimated_tcp_congestion_window: 0,
            origin_point_congestion_window: 0,
            time_to_origin_point: 0,
        }
    }

    fn cube_factor(&self) -> u64 {
        (1u64 << CUBE_SCALE) / CUBE_CONGESTION_WINDOW_SCALE / self.mss as u64
    }

    /// Window multiplier after a loss: `(n - 1 + 0.7) / n`.
    pub(super) fn beta(&self) -> f32 {
        let n = self.num_connections as f32;
        (n - 1. + CUBIC_BACKOFF_FACTOR) / n
    }

    fn beta_last_max(&self) -> f32 {
        let n = self.num_connections as f32;
        (n - 1. + BETA_LAST_MAX) / n
    }

    /// TCP-friendly additive increase for the N-connection emulation.
    fn alpha(&self) -> f32 {
        let beta = self.beta();
        let n = self.num_connections as f32;
        3. * n * n * (1. - beta) / (1. + beta)
    }

    pub(super) fn on_app_limited(&mut self) {
        self.epoch = None;
    }

    pub(super) fn reset(&mut self) {
        self.epoch = None;
        self.last_max_congestion_window = 0;
        self.acked_bytes_count = 0;
        self.estimated_tcp_congestion_window = 0;
        self.origin_point_congestion_window = 0;
        self.time_to_origin_point = 0;
    }

    fn start_epoch(
        &mut self, acked_bytes: usize, current_congestion_window: usize,
        event_time: Instant,
    ) -> Instant {
        self.acked_bytes_count = acked_bytes;
        self.estimated_tcp_congestion_window = current_congestion_window;

        if self.last_max_congestion_window <= current_congestion_window {
            self.time_to_origin_point = 0;
            self.origin_point_congestion_window = current_congestion_window;
        } else {
            let deficit = (self.last_max_congestion_window -
                current_congestion_window) as u64;

            self.time_to_origin_point =
                f32::cbrt((self.cube_factor() * deficit) as f32) as u64;
            self.origin_point_congestion_window =
                self.last_max_congestion_window;
        }

        self.epoch = Some(event_time);

        event_time
    }

    /// Returns the window after `acked_bytes` were acknowledged at
    /// `event_time`.
    pub(super) fn congestion_window_after_ack(
        &mut self, acked_bytes: usize, current_congestion_window: usize,
        delay_min: Duration, event_time: Instant,
    ) -> usize {
        let epoch = match self.epoch {
            Some(epoch) => {
                self.acked_bytes_count += acked_bytes;
                epoch
            },

            None =>
                self.start_epoch(acked_bytes, current_congestion_window, event_time),
        };

        // Account for the round trip so the curve is evaluated one RTT ahead.
        let elapsed = event_time
            .saturating_duration_since(epoch)
            .saturating_add(delay_min);
        let elapsed_time = ((elapsed.as_micros() as u64) << 10) / 1_000_000;

        let offset = self.time_to_origin_point.abs_diff(elapsed_time);

        let delta_congestion_window = ((CUBE_CONGESTION_WINDOW_SCALE *
            offset *
            offset *
            offset *
            self.mss as u64) >>
            CUBE_SCALE) as usize;

        let mut target_congestion_window =
            if elapsed_time > self.time_to_origin_point {
                self.origin_point_congestion_window + delta_congestion_window
            } else {
                self.origin_point_congestion_window
                    .saturating_sub(delta_congestion_window)
            };

        // Never grow by more than half the acked bytes.
        target_congestion_window = target_congestion_window
            .min(current_congestion_window + self.acked_bytes_count / 2);

        // Roughly alpha segments per estimated Reno window of acked bytes.
        let increase = self.acked_bytes_count as f32 *
            (self.alpha() * self.mss as f32) /
            self.estimated_tcp_congestion_window.max(1) as f32;

        self.estimated_tcp_congestion_window =
            (self.estimated_tcp_congestion_window as f32 + increase) as usize;

        self.acked_bytes_count = 0;

        target_congestion_window.max(self.estimated_tcp_congestion_window)
    }

    /// Returns the window after a congestion event, and remembers the old one
    /// as the next origin.
    pub(super) fn congestion_window_after_loss(
        &mut self, current_congestion_window: usize,
    ) -> usize {
        // Byte-wise Reno slightly underestimates, so falling short of the old
        // maximum by less than a segment doesn't count as competition.
        self.last_max_congestion_window =
            if current_congestion_window + self.mss <
                self.last_max_congestion_window
            {
                (self.beta_last_max() * current_congestion_window as f32) as usize
            } else {
                current_congestion_window
            };

        self.epoch = None;

        (current_congestion_window as f32 * self.beta()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: usize = 1460;

    const RTT: Duration = Duration::from_millis(100);

    fn reno_step(cubic: &CubicBytes, cwnd: usize) -> usize {
        let mss = MSS as f32;
        let cwnd_f = cwnd as f32;
        (cwnd_f + mss * (cubic.alpha() * mss) / cwnd_f) as usize
    }

    #[test]
    fn two_connection_constants() {
        let cubic = CubicBytes::new(MSS, 2);

        assert!((cubic.beta() - 0.85).abs() < 1e-6);
        assert!((cubic.beta_last_max() - 0.925).abs() < 1e-6);

        let single = CubicBytes::new(MSS, 1);
        assert!((single.beta() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn first_ack_grows_like_reno() {
        let mut cubic = CubicBytes::new(MSS, 2);
        let now = Instant::now();

        let cwnd = 10 * MSS;
        let expected = reno_step(&cubic, cwnd);

        assert_eq!(cubic.congestion_window_after_ack(MSS, cwnd, RTT, now), expected);
        assert!(expected > cwnd);
    }

    #[test]
    fn growth_is_monotonic_in_time() {
        let mut cubic = CubicBytes::new(MSS, 2);
        let mut now = Instant::now();

        let mut cwnd = 100 * MSS;

        for _ in 0..200 {
            now += Duration::from_millis(10);

            let next = cubic.congestion_window_after_ack(MSS, cwnd, RTT, now);
            assert!(next >= cwnd);

            cwnd = next;
        }

        assert!(cwnd > 100 * MSS);
    }

    #[test]
    fn backoff_and_fast_convergence() {
        let mut cubic = CubicBytes::new(MSS, 2);

        let cwnd = 400 * MSS;

        let after_first = cubic.congestion_window_after_loss(cwnd);
        assert_eq!(after_first, (cwnd as f32 * cubic.beta()) as usize);
        assert_eq!(cubic.last_max_congestion_window, cwnd);

        // A second loss before reaching the old maximum lowers the origin
        // further.
        let after_second = cubic.congestion_window_after_loss(after_first);
        assert_eq!(after_second, (after_first as f32 * cubic.beta()) as usize);
        assert_eq!(
            cubic.last_max_congestion_window,
            (after_first as f32 * cubic.beta_last_max()) as usize
        );
        assert!(cubic.last_max_congestion_window < after_first);
    }

    #[test]
    fn recovers_toward_origin_after_loss() {
        let mut cubic = CubicBytes::new(MSS, 2);
        let mut now = Instant::now();

        let before_loss = 400 * MSS;
        let mut cwnd = cubic.congestion_window_after_loss(before_loss);
        let after_loss = cwnd;

        for _ in 0..10 {
            now += RTT;
            cwnd = cubic.congestion_window_after_ack(MSS, cwnd, RTT, now);
        }

        assert!(cwnd > after_loss);
        assert!(cwnd < before_loss);
    }

    #[test]
    fn reset_forgets_last_max() {
        let mut cubic = CubicBytes::new(MSS, 2);

        cubic.congestion_window_after_loss(100 * MSS);
        assert_eq!(cubic.last_max_congestion_window, 100 * MSS);

        cubic.reset();
        assert_eq!(cubic.last_max_congestion_window, 0);
        assert!(cubic.epoch.is_none());
    }
}
