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

//! Throughput estimation from receiver feedback.
//!
//! Arrivals reported by the peer are matched against the sent history and
//! grouped into ticks of at least `min_tick` receiver time. Each closed tick
//! yields a delivery-rate sample that is folded into an EWMA.

use std::time::Duration;
use std::time::Instant;

use crate::bandwidth::Bandwidth;
use crate::frame::FeedbackFrame;
use crate::rtt::RttStats;
use crate::sent_history::SentHistory;
use crate::Config;

pub const DEFAULT_EWMA_GAIN: f64 = 0.3;

pub const DEFAULT_MIN_TICK: Duration = Duration::from_millis(20);

pub const DEFAULT_FORCE_UPDATE_GAP: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct BandwidthEstimator {
    estimate: Bandwidth,

    ewma_gain: f64,

    min_tick: Duration,

    force_update_gap: Duration,

    mss: usize,

    /// Receiver time at which the open tick started, if any.
    tick_start: Option<Duration>,

    bytes_in_tick: usize,

    /// Send time of the previously matched packet.
    last_sent_time: Option<Instant>,

    /// Receive time of the previously matched packet.
    last_receive_time: Option<Duration>,

    ticks_closed: u64,
}

impl BandwidthEstimator {
    pub fn new(config: &Config) -> Self {
        BandwidthEstimator {
            estimate: Bandwidth::zero(),
            ewma_gain: config.ewma_gain,
            min_tick: config.min_tick,
            force_update_gap: config.force_update_gap,
            mss: config.max_segment_size,
            tick_start: None,
            bytes_in_tick: 0,
            last_sent_time: None,
            last_receive_time: None,
            ticks_closed: 0,
        }
    }

    /// Current smoothed throughput, zero until known.
    pub fn estimate(&self) -> Bandwidth {
        self.estimate
    }

    pub fn has_estimate(&self) -> bool {
        !self.estimate.is_zero()
    }

    /// Overrides the smoothed throughput. Later ticks blend into it.
    pub fn set_estimate(&mut self, estimate: Bandwidth) {
        self.estimate = estimate;
    }

    /// Total number of ticks closed so far.
    pub fn ticks_closed(&self) -> u64 {
        self.ticks_closed
    }

    /// Processes the arrivals of `frame` against `history` and returns how
    /// many ticks were closed. Arrivals without a matching sent packet are
    /// skipped.
    pub fn on_feedback(
        &mut self, frame: &FeedbackFrame, history: &SentHistory,
        rtt_stats: &RttStats,
    ) -> usize {
        let mut closed = 0;

        for arrival in &frame.arrivals {
            let sent = match history.get(arrival.pkt_num) {
                Some(sent) => sent,

                None => {
                    trace!("no sent record for {}, skipped", arrival.pkt_num);
                    continue;
                },
            };

            let gap = self.last_sent_time.map_or(false, |t| {
                sent.time_sent.saturating_duration_since(t) >
                    self.force_update_gap
            });

            self.last_sent_time = Some(sent.time_sent);

            let tick_start = match self.tick_start {
                Some(tick_start) if !gap => tick_start,

                Some(_) => {
                    // The sender went quiet, so the receiver-side spacing
                    // across the gap says nothing about the path. Close what
                    // was collected before it and restart here.
                    if let Some(prev) = self.last_receive_time {
                        if self.close_tick(prev, rtt_stats) {
                            closed += 1;
                        }
                    }

                    self.open_tick(arrival.time);
                    continue;
                },

                None => {
                    self.open_tick(arrival.time);
                    continue;
                },
            };

            self.bytes_in_tick += sent.size;

            // Reordered arrivals never move the tick's end backwards.
            let latest = self
                .last_receive_time
                .map_or(arrival.time, |t| t.max(arrival.time));
            self.last_receive_time = Some(latest);

            if arrival.time.saturating_sub(tick_start) > self.min_tick &&
                self.close_tick(latest, rtt_stats)
            {
                closed += 1;
            }
        }

        closed
    }

    fn open_tick(&mut self, start: Duration) {
        self.tick_start = Some(start);
        self.last_receive_time = Some(start);
        self.bytes_in_tick = 0;
    }

    /// Closes the open tick at receiver time `end`, which also opens the next
    /// one. Returns false if the tick was empty.
    fn close_tick(&mut self, end: Duration, rtt_stats: &RttStats) -> bool {
        let tick_start = match self.tick_start {
            Some(tick_start) => tick_start,
            None => return false,
        };

        let length = end.saturating_sub(tick_start);
        let bytes = self.bytes_in_tick;

        self.open_tick(end);

        if length.is_zero() || bytes == 0 {
            return false;
        }

        let sample = Bandwidth::from_bytes_and_time_delta(bytes, length);
        let floor =
            Bandwidth::from_bytes_and_time_delta(self.mss, rtt_stats.smoothed_rtt());

        let previous = self.estimate;
        self.estimate = previous.blend(sample, self.ewma_gain).max(floor);
        self.ticks_closed += 1;

        trace!(
            "tick closed: {} bytes over {:?}, sample={:?} estimate {:?} -> {:?}",
            bytes,
            length,
            sample,
            previous,
            self.estimate
        );

        true
    }
}
