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

use quic_cc_apps::args::*;

use quic_cc_apps::sim::Simulator;

const USAGE: &str = "Usage:
  cc-sim [options]
  cc-sim -h | --help

Options:
  --cc-algorithm NAME       Congestion control algorithm: reno, cubic or bandwidth_ewma [default: bandwidth_ewma].
  --bandwidth KBPS          Bottleneck bandwidth in kilobits per second [default: 10000].
  --delay MS                One-way propagation delay in milliseconds [default: 20].
  --queue PACKETS           Bottleneck queue size in packets [default: 50].
  --duration MS             Simulated time in milliseconds [default: 10000].
  --feedback-interval MS    Interval between feedback frames in milliseconds [default: 10].
  --report-interval MS      Interval between reports in milliseconds [default: 100].
  --disable-hystart         Disable hybrid slow start.
  -h --help                 Show this screen.
";

fn main() {
    env_logger::builder().format_timestamp_nanos().init();

    let docopt = docopt::Docopt::new(USAGE).unwrap_or_else(|e| e.exit());
    let args = SimArgs::with_docopt(&docopt);

    let mut sim = match Simulator::new(args.to_sim_config()) {
        Ok(v) => v,

        Err(e) => {
            eprintln!("failed to set up simulation: {e}");
            std::process::exit(1);
        },
    };

    if let Err(e) = sim.run(|report| println!("{report}")) {
        eprintln!("simulation failed: {e}");
        std::process::exit(1);
    }

    println!("{:?}", sim.sender().stats());
    println!("{:?}", sim.receiver().stats());
}
