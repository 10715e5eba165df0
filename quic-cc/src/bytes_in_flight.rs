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

/// Bytes sent but not yet acknowledged or abandoned, plus the total time
/// the connection has spent with data outstanding.
///
/// The count can never go negative: removing more bytes than are in flight
/// means the sent/acked event stream is out of sync with the sender.
#[derive(Debug, Default)]
pub struct BytesInFlight {
    bytes_in_flight: usize,

    // Set while bytes_in_flight is >0, to the instant it left 0.
    busy_since: Option<Instant>,

    // Sum of finished busy periods.
    busy_duration: Duration,
}

impl BytesInFlight {
    pub(crate) fn add(&mut self, delta: usize, now: Instant) {
        if delta == 0 {
            return;
        }

        if self.bytes_in_flight == 0 {
            self.busy_since = Some(now);
        }

        self.bytes_in_flight += delta;
    }

    /// Removes `delta` bytes. Panics if fewer than `delta` bytes are in
    /// flight.
    pub(crate) fn subtract(&mut self, delta: usize, now: Instant) {
        self.bytes_in_flight = match self.bytes_in_flight.checked_sub(delta) {
            Some(v) => v,

            None => panic!(
                "bytes in flight underflow: {} in flight, removing {}",
                self.bytes_in_flight, delta
            ),
        };

        if self.bytes_in_flight == 0 {
            if let Some(start) = self.busy_since.take() {
                self.busy_duration += now.saturating_duration_since(start);
            }
        }
    }

    pub(crate) fn get(&self) -> usize {
        self.bytes_in_flight
    }

    /// Total time during which bytes were in flight, up to `now`.
    pub(crate) fn busy_duration(&self, now: Instant) -> Duration {
        match self.busy_since {
            Some(start) =>
                self.busy_duration + now.saturating_duration_since(start),

            None => self.busy_duration,
        }
    }
}
