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

//! Feedback-driven congestion control for connection-oriented transports.
//!
//! A [`Sender`] gates outgoing data using a congestion window derived from
//! acknowledgments, losses and [`FeedbackFrame`]s produced by the peer's
//! [`Receiver`]. The algorithm is chosen per connection through
//! [`CongestionFeedbackType`]: Reno and CUBIC grow and shrink a window,
//! bandwidth EWMA sizes it from the throughput the receiver observed.
//!
//! The crate does no I/O and owns no timers: every time-dependent call takes
//! the current [`Instant`](std::time::Instant).
//!
//! ## Setup
//!
//! Both endpoints must use the same algorithm, usually negotiated as the
//! one-byte tag returned by `CongestionFeedbackType as u8`:
//!
//! ```
//! let mut config = quic_cc::Config::default();
//! config.set_feedback_type_name("cubic")?;
//!
//! let tag = quic_cc::CongestionFeedbackType::Cubic as u8;
//!
//! let mut sender = quic_cc::create_sender(tag, &config)?;
//! let mut receiver = quic_cc::create_receiver(tag, &config)?;
//! # Ok::<(), quic_cc::Error>(())
//! ```
//!
//! ## Sending
//!
//! Before transmitting, ask the sender whether the window allows it, and
//! report the packet once sent:
//!
//! ```
//! # use std::time::Duration;
//! # use std::time::Instant;
//! # use quic_cc::TransmissionType;
//! # let config = quic_cc::Config::default();
//! # let mut sender = quic_cc::Sender::new(&config);
//! let now = Instant::now();
//!
//! let delay = sender.time_until_send(
//!     now,
//!     TransmissionType::NotRetransmission,
//!     true,
//!     false,
//! );
//!
//! if delay.is_zero() {
//!     sender.on_packet_sent(now, 1, 1200, TransmissionType::NotRetransmission, true);
//! }
//!
//! // Later, when the transport processes the acknowledgment.
//! sender.on_packet_acked(1, 1200, Duration::from_millis(30), now);
//! ```
//!
//! ## Feedback
//!
//! The receiver records every packet and is periodically asked for a
//! feedback frame, which travels to the sender on the wire:
//!
//! ```
//! # use std::time::Instant;
//! # let config = quic_cc::Config::default();
//! # let mut sender = quic_cc::Sender::new(&config);
//! # let mut receiver = quic_cc::Receiver::new(&config);
//! receiver.record_incoming_packet(1200, 1, Instant::now(), false);
//!
//! let frame = receiver.generate_congestion_feedback();
//!
//! let mut buf = [0; 128];
//! let len = frame.to_bytes(&mut octets::OctetsMut::with_slice(&mut buf))?;
//!
//! let frame = quic_cc::FeedbackFrame::from_bytes(
//!     &mut octets::Octets::with_slice(&buf[..len]),
//! )?;
//!
//! sender.on_congestion_feedback(&frame, Instant::now())?;
//! # Ok::<(), quic_cc::Error>(())
//! ```

#[macro_use]
extern crate log;

use std::convert::TryFrom;
use std::str::FromStr;
use std::time::Duration;

pub use crate::bandwidth::Bandwidth;
pub use crate::congestion::CongestionFeedbackType;
pub use crate::congestion::TransmissionType;
pub use crate::error::Error;
pub use crate::error::Result;
pub use crate::frame::Arrival;
pub use crate::frame::FeedbackFrame;
pub use crate::frame::MAX_ARRIVALS;
pub use crate::receiver::Receiver;
pub use crate::rtt::RttStats;
pub use crate::sender::Sender;
pub use crate::sender::INFINITE_DELAY;
pub use crate::stats::CongestionSample;
pub use crate::stats::ReceiverStats;
pub use crate::stats::SampleTrigger;
pub use crate::stats::SenderStats;
pub use crate::stats::StatsSink;

/// Default maximum segment size in bytes.
pub const DEFAULT_MAX_SEGMENT_SIZE: usize = 1460;

const DEFAULT_INITIAL_CONGESTION_WINDOW_PACKETS: usize = 10;

const DEFAULT_MAX_CONGESTION_WINDOW_PACKETS: usize = 2000;

const DEFAULT_CUBIC_NUM_CONNECTIONS: usize = 2;

const DEFAULT_TARGET_DELAY_FLOOR: Duration = Duration::from_millis(100);

/// Stores configuration shared between a [`Sender`] and a [`Receiver`].
#[derive(Clone, Debug)]
pub struct Config {
    feedback_type: CongestionFeedbackType,

    max_segment_size: usize,

    initial_congestion_window_packets: usize,

    max_congestion_window_packets: usize,

    server_initial_congestion_window: Option<usize>,

    hybrid_slow_start: bool,

    cubic_num_connections: usize,

    ewma_gain: f64,

    min_tick: Duration,

    force_update_gap: Duration,

    target_delay_floor: Duration,

    initial_rtt: Duration,

    max_sent_history: usize,

    receive_window: u64,
}

impl Config {
    /// Creates a config object for the given algorithm, with defaults for
    /// everything else.
    pub fn new(feedback_type: CongestionFeedbackType) -> Config {
        Config {
            feedback_type,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            initial_congestion_window_packets:
                DEFAULT_INITIAL_CONGESTION_WINDOW_PACKETS,
            max_congestion_window_packets: DEFAULT_MAX_CONGESTION_WINDOW_PACKETS,
            server_initial_congestion_window: None,
            hybrid_slow_start: true,
            cubic_num_connections: DEFAULT_CUBIC_NUM_CONNECTIONS,
            ewma_gain: estimator::DEFAULT_EWMA_GAIN,
            min_tick: estimator::DEFAULT_MIN_TICK,
            force_update_gap: estimator::DEFAULT_FORCE_UPDATE_GAP,
            target_delay_floor: DEFAULT_TARGET_DELAY_FLOOR,
            initial_rtt: rtt::DEFAULT_INITIAL_RTT,
            max_sent_history: sent_history::DEFAULT_MAX_SENT_HISTORY,
            receive_window: receiver::DEFAULT_RECEIVE_WINDOW,
        }
    }

    /// Sets the congestion control algorithm by name.
    ///
    /// The default value is `bandwidth_ewma`. On error
    /// `Error::UnknownAlgorithm` is returned.
    ///
    /// ## Examples:
    ///
    /// ```
    /// let mut config = quic_cc::Config::default();
    /// config.set_feedback_type_name("reno")?;
    /// # Ok::<(), quic_cc::Error>(())
    /// ```
    pub fn set_feedback_type_name(&mut self, name: &str) -> Result<()> {
        self.feedback_type = CongestionFeedbackType::from_str(name)?;

        Ok(())
    }

    /// Sets the congestion control algorithm.
    pub fn set_feedback_type(&mut self, feedback_type: CongestionFeedbackType) {
        self.feedback_type = feedback_type;
    }

    pub fn feedback_type(&self) -> CongestionFeedbackType {
        self.feedback_type
    }

    /// Sets the maximum segment size in bytes.
    ///
    /// The default value is 1460. Zero is treated as 1.
    pub fn set_max_segment_size(&mut self, v: usize) {
        self.max_segment_size = v.max(1);
    }

    pub fn max_segment_size(&self) -> usize {
        self.max_segment_size
    }

    /// Sets the initial congestion window in packets.
    ///
    /// The default value is 10.
    pub fn set_initial_congestion_window_packets(&mut self, packets: usize) {
        self.initial_congestion_window_packets = packets;
    }

    /// Sets the window AIMD growth stops at, in packets.
    ///
    /// The default value is 2000.
    pub fn set_max_congestion_window_packets(&mut self, packets: usize) {
        self.max_congestion_window_packets = packets;
    }

    /// Sets the initial congestion window, in packets, used by servers.
    ///
    /// The default value is `None`, leaving the initial window as is.
    pub fn set_server_initial_congestion_window(&mut self, packets: Option<usize>) {
        self.server_initial_congestion_window = packets;
    }

    /// Configures whether to leave slow start on delay increase.
    ///
    /// The default value is `true`.
    pub fn enable_hybrid_slow_start(&mut self, v: bool) {
        self.hybrid_slow_start = v;
    }

    /// Sets the number of Reno flows CUBIC emulates.
    ///
    /// The default value is 2.
    pub fn set_cubic_num_connections(&mut self, v: usize) {
        self.cubic_num_connections = v.max(1);
    }

    /// Sets the weight of a new sample in the throughput EWMA.
    ///
    /// The default value is 0.3. Values outside `(0, 1]` are rejected with
    /// `Error::InvalidConfig`.
    pub fn set_ewma_gain(&mut self, gain: f64) -> Result<()> {
        if !(gain > 0. && gain <= 1.) {
            return Err(Error::InvalidConfig);
        }

        self.ewma_gain = gain;

        Ok(())
    }

    /// Sets the shortest receiver-side interval a throughput sample covers.
    ///
    /// The default value is 20ms.
    pub fn set_min_tick(&mut self, v: Duration) {
        self.min_tick = v;
    }

    /// Sets the send-side gap after which the open throughput tick is closed
    /// early.
    ///
    /// The default value is 100ms.
    pub fn set_force_update_gap(&mut self, v: Duration) {
        self.force_update_gap = v;
    }

    /// Sets the lower bound of the delay the rate estimation window is sized
    /// for.
    ///
    /// The default value is 100ms.
    pub fn set_target_delay_floor(&mut self, v: Duration) {
        self.target_delay_floor = v;
    }

    /// Sets the RTT assumed before the first sample.
    ///
    /// The default value is 60ms.
    pub fn set_initial_rtt(&mut self, v: Duration) {
        self.initial_rtt = v;
    }

    /// Sets how many sent packets are remembered for bandwidth estimation.
    ///
    /// The default value is 1024.
    pub fn set_max_sent_history(&mut self, v: usize) {
        self.max_sent_history = v;
    }

    /// Sets the receive window a receiver advertises, in bytes.
    ///
    /// The default value is 256000.
    pub fn set_receive_window(&mut self, v: u64) {
        self.receive_window = v;
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new(CongestionFeedbackType::BandwidthEwma)
    }
}

/// Creates a sender for the algorithm identified by the wire `tag`, with the
/// rest of `config`.
///
/// Fails with `Error::UnknownAlgorithm` for unknown tags.
pub fn create_sender(tag: u8, config: &Config) -> Result<Sender> {
    let mut config = config.clone();
    config.set_feedback_type(CongestionFeedbackType::try_from(tag)?);

    Ok(Sender::new(&config))
}

/// Creates a receiver for the algorithm identified by the wire `tag`, with
/// the rest of `config`.
///
/// Fails with `Error::UnknownAlgorithm` for unknown tags.
pub fn create_receiver(tag: u8, config: &Config) -> Result<Receiver> {
    let mut config = config.clone();
    config.set_feedback_type(CongestionFeedbackType::try_from(tag)?);

    Ok(Receiver::new(&config))
}


#[cfg(test)]
pub mod test_utils;

mod bandwidth;
mod bytes_in_flight;
mod congestion;
mod error;
mod estimator;
mod frame;
mod receiver;
mod rtt;
mod sender;
mod sent_history;
mod stats;
