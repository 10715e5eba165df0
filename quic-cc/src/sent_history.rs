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

use std::collections::BTreeMap;
use std::time::Instant;

/// Default number of outstanding packets remembered for feedback matching.
pub const DEFAULT_MAX_SENT_HISTORY: usize = 1024;

/// A retransmittable packet handed to the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentPacket {
    pub pkt_num: u64,

    pub size: usize,

    pub time_sent: Instant,
}

/// Sent packets keyed by packet number, kept until feedback makes them
/// irrelevant.
///
/// Feedback frames only ever report the newest arrivals, so once packet `n`
/// has been reported nothing at or below `n` can show up again and those
/// entries are retired. The map is also capped: beyond `capacity` entries
/// the oldest packet is dropped.
#[derive(Debug)]
pub struct SentHistory {
    packets: BTreeMap<u64, SentPacket>,

    capacity: usize,
}

impl SentHistory {
    pub fn new(capacity: usize) -> Self {
        SentHistory {
            packets: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Records `pkt`, returning how many old entries were evicted to make
    /// room for it.
    pub fn insert(&mut self, pkt: SentPacket) -> usize {
        self.packets.insert(pkt.pkt_num, pkt);

        let mut evicted = 0;

        while self.packets.len() > self.capacity {
            self.packets.pop_first();
            evicted += 1;
        }

        evicted
    }

    pub fn get(&self, pkt_num: u64) -> Option<&SentPacket> {
        self.packets.get(&pkt_num)
    }

    pub fn remove(&mut self, pkt_num: u64) -> Option<SentPacket> {
        self.packets.remove(&pkt_num)
    }

    /// Drops every packet numbered `pkt_num` or lower.
    pub fn retire_up_to(&mut self, pkt_num: u64) {
        match pkt_num.checked_add(1) {
            Some(first_kept) => {
                self.packets = self.packets.split_off(&first_kept);
            },

            None => self.packets.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &SentPacket> {
        self.packets.values()
    }
}

impl Default for SentHistory {
    fn default() -> Self {
        SentHistory::new(DEFAULT_MAX_SENT_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(pkt_num: u64, now: Instant) -> SentPacket {
        SentPacket {
            pkt_num,
            size: 1000,
            time_sent: now,
        }
    }

    #[test]
    fn lookup_and_remove() {
        let now = Instant::now();
        let mut history = SentHistory::default();

        for pn in 1..=5 {
            assert_eq!(history.insert(sent(pn, now)), 0);
        }

        assert_eq!(history.len(), 5);
        assert_eq!(history.get(3), Some(&sent(3, now)));
        assert_eq!(history.get(6), None);

        assert_eq!(history.remove(3), Some(sent(3, now)));
        assert_eq!(history.remove(3), None);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let now = Instant::now();
        let mut history = SentHistory::new(3);

        history.insert(sent(10, now));
        history.insert(sent(11, now));
        history.insert(sent(12, now));
        assert_eq!(history.insert(sent(13, now)), 1);

        let pkt_nums: Vec<u64> = history.iter().map(|p| p.pkt_num).collect();
        assert_eq!(pkt_nums, vec![11, 12, 13]);
    }

    #[test]
    fn retire_up_to() {
        let now = Instant::now();
        let mut history = SentHistory::default();

        for pn in 0..10 {
            history.insert(sent(pn, now));
        }

        history.retire_up_to(6);

        let pkt_nums: Vec<u64> = history.iter().map(|p| p.pkt_num).collect();
        assert_eq!(pkt_nums, vec![7, 8, 9]);

        history.retire_up_to(u64::MAX);
        assert!(history.is_empty());
    }
}
