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
use std::time::Duration;

use smallvec::SmallVec;

use crate::CongestionFeedbackType;
use crate::Error;
use crate::Result;

/// Maximum number of arrivals a single feedback frame reports.
pub const MAX_ARRIVALS: usize = 8;

const MAX_VARINT: u64 = (1 << 62) - 1;

/// A packet arrival as seen by the receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arrival {
    pub pkt_num: u64,

    /// Receive time, as an offset from the receiver's epoch. Only
    /// differences between arrivals are meaningful to the sender.
    pub time: Duration,
}

/// Congestion feedback sent from the receiver to the sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedbackFrame {
    pub feedback_type: CongestionFeedbackType,

    /// Number of packets the receiver recovered without a retransmission,
    /// since the start of the connection.
    pub recovered_loss_count: u64,

    pub receive_window: u64,

    /// Arrivals since the previous frame, in ascending packet number order.
    pub arrivals: SmallVec<[Arrival; MAX_ARRIVALS]>,
}

impl FeedbackFrame {
    pub fn from_bytes(b: &mut octets::Octets) -> Result<FeedbackFrame> {
        let feedback_type = CongestionFeedbackType::try_from(b.get_u8()?)?;

        let recovered_loss_count = b.get_varint()?;

        let receive_window = b.get_varint()?;

        let count = b.get_varint()?;

        if count > MAX_ARRIVALS as u64 {
            return Err(Error::InvalidFrame);
        }

        let mut arrivals = SmallVec::new();

        let mut prev_pkt_num = None;

        for _ in 0..count {
            let pkt_num = match prev_pkt_num {
                None => b.get_varint()?,

                Some(prev) => {
                    let delta = b.get_varint()?;

                    if delta == 0 {
                        return Err(Error::InvalidFrame);
                    }

                    u64::checked_add(prev, delta).ok_or(Error::InvalidFrame)?
                },
            };

            let time = Duration::from_micros(b.get_varint()?);

            arrivals.push(Arrival { pkt_num, time });

            prev_pkt_num = Some(pkt_num);
        }

        Ok(FeedbackFrame {
            feedback_type,
            recovered_loss_count,
            receive_window,
            arrivals,
        })
    }

    pub fn to_bytes(&self, b: &mut octets::OctetsMut) -> Result<usize> {
        if self.arrivals.len() > MAX_ARRIVALS ||
            self.recovered_loss_count > MAX_VARINT ||
            self.receive_window > MAX_VARINT
        {
            return Err(Error::InvalidFrame);
        }

        let before = b.cap();

        b.put_u8(self.feedback_type as u8)?;

        b.put_varint(self.recovered_loss_count)?;

        b.put_varint(self.receive_window)?;

        b.put_varint(self.arrivals.len() as u64)?;

        let mut prev_pkt_num = None;

        for arrival in &self.arrivals {
            match prev_pkt_num {
                None => {
                    if arrival.pkt_num > MAX_VARINT {
                        return Err(Error::InvalidFrame);
                    }

                    b.put_varint(arrival.pkt_num)?;
                },

                Some(prev) => {
                    // Arrivals must be strictly ascending.
                    if arrival.pkt_num <= prev {
                        return Err(Error::InvalidFrame);
                    }

                    let delta = arrival.pkt_num - prev;

                    if delta > MAX_VARINT {
                        return Err(Error::InvalidFrame);
                    }

                    b.put_varint(delta)?;
                },
            }

            b.put_varint(timestamp_micros(arrival.time)?)?;

            prev_pkt_num = Some(arrival.pkt_num);
        }

        Ok(before - b.cap())
    }

    /// Number of bytes `to_bytes()` writes for this frame. Only meaningful
    /// for frames that encode successfully.
    pub fn wire_len(&self) -> usize {
        let mut len = 1 + // algorithm tag
            octets::varint_len(self.recovered_loss_count.min(MAX_VARINT)) +
            octets::varint_len(self.receive_window.min(MAX_VARINT)) +
            octets::varint_len(self.arrivals.len() as u64);

        let mut prev_pkt_num = None;

        for arrival in &self.arrivals {
            let pkt_num_field = match prev_pkt_num {
                None => arrival.pkt_num,
                Some(prev) => arrival.pkt_num.saturating_sub(prev),
            };

            len += octets::varint_len(pkt_num_field.min(MAX_VARINT));
            len += octets::varint_len(
                (arrival.time.as_micros() as u64).min(MAX_VARINT),
            );

            prev_pkt_num = Some(arrival.pkt_num);
        }

        len
    }

    /// The arrival with the highest packet number, if any.
    pub fn largest_arrival(&self) -> Option<&Arrival> {
        self.arrivals.last()
    }
}

fn timestamp_micros(time: Duration) -> Result<u64> {
    let micros = time.as_micros();

    if micros > MAX_VARINT as u128 {
        return Err(Error::InvalidFrame);
    }

    Ok(micros as u64)
}
