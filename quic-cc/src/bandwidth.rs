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

const NUM_MICROS_PER_SECOND: u64 = 1_000_000;

/// A throughput value, stored with bit-per-second precision.
#[derive(PartialEq, PartialOrd, Eq, Ord, Clone, Copy, Default)]
pub struct Bandwidth {
    bits_per_second: u64,
}

impl std::ops::Mul<f64> for Bandwidth {
    type Output = Bandwidth;

    fn mul(self, rhs: f64) -> Self::Output {
        Bandwidth {
            bits_per_second: (self.bits_per_second as f64 * rhs).round() as u64,
        }
    }
}

impl std::ops::Add<Bandwidth> for Bandwidth {
    type Output = Bandwidth;

    fn add(self, rhs: Bandwidth) -> Self::Output {
        Bandwidth {
            bits_per_second: self
                .bits_per_second
                .saturating_add(rhs.bits_per_second),
        }
    }
}

impl std::ops::Mul<Duration> for Bandwidth {
    type Output = u64;

    fn mul(self, rhs: Duration) -> Self::Output {
        self.to_bytes_per_period(rhs)
    }
}

impl Bandwidth {
    /// Returns the rate at which `bytes` are transferred over `time_delta`.
    ///
    /// A zero `time_delta` is treated as one microsecond, and any non-zero
    /// byte count yields at least 1 bit per second.
    pub const fn from_bytes_and_time_delta(
        bytes: usize, time_delta: Duration,
    ) -> Self {
        if bytes == 0 {
            return Bandwidth { bits_per_second: 0 };
        }

        let mut micros = time_delta.as_micros();
        if micros == 0 {
            micros = 1;
        }

        // 1 bit is 1000000 micro bits.
        let num_micro_bits =
            8 * bytes as u128 * NUM_MICROS_PER_SECOND as u128;
        if num_micro_bits < micros {
            return Bandwidth { bits_per_second: 1 };
        }

        Bandwidth {
            bits_per_second: saturate(num_micro_bits / micros),
        }
    }

    pub const fn from_bytes_per_second(bytes_per_second: u64) -> Self {
        Bandwidth {
            bits_per_second: bytes_per_second * 8,
        }
    }

    pub const fn from_kbytes_per_second(k_bytes_per_second: u64) -> Self {
        Bandwidth::from_bytes_per_second(k_bytes_per_second * 1_000)
    }

    pub const fn from_kbits_per_second(k_bits_per_second: u64) -> Self {
        Bandwidth {
            bits_per_second: k_bits_per_second * 1_000,
        }
    }

    pub const fn zero() -> Self {
        Bandwidth { bits_per_second: 0 }
    }

    pub const fn is_zero(&self) -> bool {
        self.bits_per_second == 0
    }

    pub const fn to_bits_per_second(self) -> u64 {
        self.bits_per_second
    }

    pub const fn to_bytes_per_second(self) -> u64 {
        self.bits_per_second / 8
    }

    pub fn to_kbytes_per_second(self) -> f64 {
        self.bits_per_second as f64 / 8_000.
    }

    /// Number of bytes that can be sent during `time_period` at this rate.
    pub fn to_bytes_per_period(self, time_period: Duration) -> u64 {
        saturate(
            self.bits_per_second as u128 * time_period.as_micros() /
                8 /
                NUM_MICROS_PER_SECOND as u128,
        )
    }

    /// Time it takes to transfer `bytes` at this rate, zero for a zero rate.
    pub fn transfer_time(&self, bytes: usize) -> Duration {
        if self.bits_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(saturate(
                bytes as u128 * 8 * NUM_MICROS_PER_SECOND as u128 /
                    self.bits_per_second as u128,
            ))
        }
    }

    /// Folds `sample` into `self` as an exponentially weighted moving
    /// average: `(1 - gain) * self + gain * sample`.
    pub fn blend(self, sample: Bandwidth, gain: f64) -> Bandwidth {
        self * (1. - gain) + sample * gain
    }
}

const fn saturate(v: u128) -> u64 {
    if v > u64::MAX as u128 {
        u64::MAX
    } else {
        v as u64
    }
}

impl std::fmt::Debug for Bandwidth {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.bits_per_second {
            x if x < 1_000_000 => write!(f, "{:.2} Kbps", x as f64 / 1_000.),
            x if x < 1_000_000_000 => {
                write!(f, "{:.2} Mbps", x as f64 / 1_000_000.)
            },
            x => write!(f, "{:.2} Gbps", x as f64 / 1_000_000_000.),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_and_time_delta() {
        let bw = Bandwidth::from_bytes_and_time_delta(
            50_000,
            Duration::from_millis(25),
        );
        assert_eq!(bw, Bandwidth::from_kbytes_per_second(2_000));

        assert_eq!(
            Bandwidth::from_bytes_and_time_delta(0, Duration::from_secs(1)),
            Bandwidth::zero()
        );

        // Zero time is treated as 1us rather than dividing by zero.
        assert_eq!(
            Bandwidth::from_bytes_and_time_delta(1, Duration::ZERO)
                .to_bits_per_second(),
            8_000_000
        );
    }

    #[test]
    fn bytes_per_period() {
        let bw = Bandwidth::from_kbytes_per_second(100);

        assert_eq!(bw.to_bytes_per_period(Duration::from_millis(100)), 10_000);
        assert_eq!(bw * Duration::from_secs(2), 200_000);
        assert_eq!(bw.transfer_time(10_000), Duration::from_millis(100));
    }

    #[test]
    fn huge_values_saturate() {
        let bw = Bandwidth::from_bytes_and_time_delta(
            usize::MAX / 2,
            Duration::from_millis(100),
        );
        assert_eq!(bw.to_bits_per_second(), u64::MAX);

        let max = Bandwidth::from_bytes_and_time_delta(
            usize::MAX,
            Duration::from_micros(1),
        );
        assert_eq!(max.to_bytes_per_period(Duration::from_secs(3600)), u64::MAX);

        let slow = Bandwidth::from_bytes_per_second(1);
        assert_eq!(
            slow.transfer_time(usize::MAX),
            Duration::from_micros(u64::MAX)
        );
    }

    #[test]
    fn blend() {
        let prior = Bandwidth::from_kbytes_per_second(100);
        let sample = Bandwidth::from_kbytes_per_second(2_000);

        let blended = prior.blend(sample, 0.125);
        assert_eq!(blended.to_bytes_per_second(), 337_500);

        // A gain of 1 discards history entirely.
        assert_eq!(prior.blend(sample, 1.), sample);
    }
}
