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

use super::*;

use std::collections::VecDeque;
use std::time::Instant;

pub const MSS: usize = DEFAULT_MAX_SEGMENT_SIZE;

/// A packet on the simulated wire.
#[derive(Clone, Copy, Debug)]
pub struct Flight {
    pub pkt_num: u64,
    pub size: usize,
    pub time_sent: Instant,
}

/// A sender and receiver joined by a bottleneck link with a fixed one-way
/// delay. Feedback crosses the wire encoded.
pub struct Pipe {
    pub sender: Sender,
    pub receiver: Receiver,

    pub now: Instant,
    pub one_way_delay: Duration,
    pub link_rate: Bandwidth,

    /// Arrivals recorded between two feedback frames.
    pub feedback_every: usize,

    pub in_flight: VecDeque<Flight>,

    next_pkt_num: u64,
    last_arrival: Option<Instant>,
}

impl Pipe {
    pub fn new(cc_algorithm_name: &str) -> Result<Pipe> {
        let mut config = Config::default();
        assert_eq!(config.set_feedback_type_name(cc_algorithm_name), Ok(()));

        Pipe::with_config(&config)
    }

    pub fn with_config(config: &Config) -> Result<Pipe> {
        let tag = config.feedback_type() as u8;

        let mut sender = create_sender(tag, config)?;
        sender.set_trace_id("sender");

        let mut receiver = create_receiver(tag, config)?;
        receiver.set_trace_id("receiver");

        Ok(Pipe {
            sender,
            receiver,
            now: Instant::now(),
            one_way_delay: Duration::from_millis(20),
            link_rate: Bandwidth::from_kbits_per_second(10_000),
            feedback_every: 4,
            in_flight: VecDeque::new(),
            next_pkt_num: 0,
            last_arrival: None,
        })
    }

    /// Sends one full-sized packet if the sender allows it.
    pub fn send(&mut self) -> Option<u64> {
        let delay = self.sender.time_until_send(
            self.now,
            TransmissionType::NotRetransmission,
            true,
            false,
        );

        if !delay.is_zero() {
            return None;
        }

        let pkt_num = self.next_pkt_num;
        self.next_pkt_num += 1;

        self.sender.on_packet_sent(
            self.now,
            pkt_num,
            MSS,
            TransmissionType::NotRetransmission,
            true,
        );

        self.in_flight.push_back(Flight {
            pkt_num,
            size: MSS,
            time_sent: self.now,
        });

        Some(pkt_num)
    }

    /// Sends until the window is full, returning the number of packets sent.
    pub fn fill(&mut self) -> usize {
        let mut sent = 0;

        while self.send().is_some() {
            sent += 1;
        }

        sent
    }

    /// Drops the oldest packet on the wire. The transport declares it lost
    /// and gives up on it.
    pub fn drop_oldest(&mut self) -> Option<u64> {
        let flight = self.in_flight.pop_front()?;

        self.sender.on_packet_lost(flight.pkt_num, self.now);
        self.sender
            .on_packet_abandoned(flight.pkt_num, flight.size, self.now);

        Some(flight.pkt_num)
    }

    /// Encodes the receiver's feedback, decodes it and hands it to the
    /// sender.
    pub fn exchange_feedback(&mut self) -> Result<()> {
        let frame = self.receiver.generate_congestion_feedback();

        let mut buf = [0; 256];

        let len = {
            let mut b = octets::OctetsMut::with_slice(&mut buf);
            frame.to_bytes(&mut b)?
        };

        assert_eq!(len, frame.wire_len());

        let mut b = octets::Octets::with_slice(&buf[..len]);
        let decoded = FeedbackFrame::from_bytes(&mut b)?;

        assert_eq!(decoded, frame);

        self.sender.on_congestion_feedback(&decoded, self.now)
    }

    /// Delivers everything on the wire through the bottleneck, exchanging
    /// feedback along the way, then acknowledges it all one delay after
    /// the last arrival.
    pub fn deliver(&mut self) -> Result<()> {
        let flights: Vec<_> = self.in_flight.drain(..).collect();

        for (i, flight) in flights.iter().enumerate() {
            let earliest = flight.time_sent + self.one_way_delay;

            let arrival = match self.last_arrival {
                Some(last) =>
                    earliest.max(last + self.link_rate.transfer_time(flight.size)),

                None => earliest,
            };

            self.last_arrival = Some(arrival);

            self.receiver
                .record_incoming_packet(flight.size, flight.pkt_num, arrival, false);

            if (i + 1) % self.feedback_every == 0 {
                self.now = self.now.max(arrival + self.one_way_delay);
                self.exchange_feedback()?;
            }
        }

        if let Some(last) = self.last_arrival {
            self.now = self.now.max(last + self.one_way_delay);
        }

        self.exchange_feedback()?;

        for flight in flights {
            let rtt = self.now.saturating_duration_since(flight.time_sent);

            self.sender
                .on_packet_acked(flight.pkt_num, flight.size, rtt, self.now);
        }

        Ok(())
    }

    /// Fills the window and delivers it, `rounds` times.
    pub fn run(&mut self, rounds: usize) -> Result<()> {
        for _ in 0..rounds {
            self.fill();
            self.deliver()?;
        }

        Ok(())
    }
}
