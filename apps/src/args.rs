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

use std::str::FromStr;
use std::time::Duration;

use quic_cc::Bandwidth;
use quic_cc::CongestionFeedbackType;

use crate::sim::SimConfig;

pub trait Args {
    fn with_docopt(docopt: &docopt::Docopt) -> Self;
}

/// Arguments of the link simulator.
pub struct SimArgs {
    pub cc_algorithm: CongestionFeedbackType,
    pub bandwidth: Bandwidth,
    pub delay: Duration,
    pub queue: usize,
    pub duration: Duration,
    pub feedback_interval: Duration,
    pub report_interval: Duration,
    pub disable_hystart: bool,
}

/// Creates a new `SimArgs` structure using the provided [`Docopt`].
///
/// The `Docopt` usage String needs to include the following:
///
/// --cc-algorithm NAME         Congestion control algorithm.
/// --bandwidth KBPS            Bottleneck bandwidth in kilobits per second.
/// --delay MS                  One-way propagation delay in milliseconds.
/// --queue PACKETS             Bottleneck queue size in packets.
/// --duration MS               Simulated time in milliseconds.
/// --feedback-interval MS      Interval between feedback frames.
/// --report-interval MS        Interval between printed reports.
/// --disable-hystart           Disable hybrid slow start.
///
/// [`Docopt`]: https://docs.rs/docopt/1.1.0/docopt/
impl Args for SimArgs {
    fn with_docopt(docopt: &docopt::Docopt) -> Self {
        let args = docopt.parse().unwrap_or_else(|e| e.exit());

        let cc_algorithm = parse_or_exit(&args, "--cc-algorithm");

        let bandwidth =
            Bandwidth::from_kbits_per_second(parse_or_exit(&args, "--bandwidth"));

        let delay = Duration::from_millis(parse_or_exit(&args, "--delay"));

        let queue = parse_or_exit(&args, "--queue");

        let duration = Duration::from_millis(parse_or_exit(&args, "--duration"));

        let feedback_interval =
            Duration::from_millis(parse_or_exit(&args, "--feedback-interval"));

        let report_interval =
            Duration::from_millis(parse_or_exit(&args, "--report-interval"));

        let disable_hystart = args.get_bool("--disable-hystart");

        SimArgs {
            cc_algorithm,
            bandwidth,
            delay,
            queue,
            duration,
            feedback_interval,
            report_interval,
            disable_hystart,
        }
    }
}

impl SimArgs {
    pub fn to_sim_config(&self) -> SimConfig {
        let mut config = quic_cc::Config::new(self.cc_algorithm);
        config.enable_hybrid_slow_start(!self.disable_hystart);

        SimConfig {
            cc: config,
            bandwidth: self.bandwidth,
            delay: self.delay,
            queue: self.queue,
            duration: self.duration,
            feedback_interval: self.feedback_interval,
            report_interval: self.report_interval,
        }
    }
}

fn parse_or_exit<T: FromStr>(args: &docopt::ArgvMap, name: &str) -> T {
    let value = args.get_str(name);

    match value.parse() {
        Ok(v) => v,

        Err(_) => {
            eprintln!("invalid value for {name}: {value:?}");
            std::process::exit(1);
        },
    }
}
