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

use crate::bandwidth::Bandwidth;

/// Sender counters.
#[derive(Clone, Default)]
pub struct SenderStats {
    /// The number of retransmittable packets sent.
    pub sent: usize,

    /// The number of bytes sent in retransmittable packets.
    pub sent_bytes: u64,

    /// The number of packets acknowledged.
    pub acked: usize,

    /// The number of packets declared lost by the transport.
    pub lost: usize,

    /// The number of packets abandoned by the transport.
    pub abandoned: usize,

    /// The number of window reductions.
    pub congestion_events: usize,

    /// The number of retransmission timeouts.
    pub rtos: usize,

    /// The number of feedback frames processed.
    pub feedback_frames: usize,

    /// The number of feedback frames rejected for carrying another
    /// algorithm's tag.
    pub feedback_mismatches: usize,

    /// The number of bandwidth estimator ticks closed.
    pub bandwidth_ticks: u64,

    /// The number of sent packet records dropped because the history was
    /// full.
    pub history_evictions: usize,

    /// Total time spent with data in flight.
    pub busy_duration: Duration,
}

impl std::fmt::Debug for SenderStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "sent={} sent_bytes={} acked={} lost={} abandoned={}",
            self.sent, self.sent_bytes, self.acked, self.lost, self.abandoned,
        )?;

        write!(
            f,
            " congestion_events={} rtos={} feedback_frames={} feedback_mismatches={}",
            self.congestion_events,
            self.rtos,
            self.feedback_frames,
            self.feedback_mismatches,
        )?;

        write!(
            f,
            " bandwidth_ticks={} history_evictions={} busy_duration={:?}",
            self.bandwidth_ticks, self.history_evictions, self.busy_duration,
        )
    }
}

/// Receiver counters.
#[derive(Clone, Debug, Default)]
pub struct ReceiverStats {
    /// The number of packets recorded.
    pub recv: usize,

    /// The number of bytes recorded.
    pub recv_bytes: u64,

    /// The number of packets recovered by the transport, e.g. through FEC.
    pub revived: usize,

    /// The number of feedback frames generated.
    pub feedback_frames: usize,
}

/// What prompted a [`CongestionSample`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleTrigger {
    Ack,
    Loss,
    Feedback,
    Timeout,
}

/// A snapshot of the sender's congestion state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CongestionSample {
    pub time: Instant,

    pub trigger: SampleTrigger,

    pub congestion_window: usize,

    pub bytes_in_flight: usize,

    pub smoothed_rtt: Duration,

    pub min_rtt: Option<Duration>,

    pub bandwidth: Bandwidth,

    pub in_slow_start: bool,
}

/// Receives the sender's congestion state as it evolves.
///
/// Implementations must not block; they are called inline from the sender's
/// event handlers.
pub trait StatsSink {
    /// Called after every ack, loss, feedback frame and timeout.
    fn on_sample(&mut self, sample: &CongestionSample);

    /// Called when the window was reduced.
    fn on_congestion_event(&mut self, _sample: &CongestionSample) {}
}
