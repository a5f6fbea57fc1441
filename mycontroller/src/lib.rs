/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! P4Runtime controllers for the BMv2 tutorial topology.
//!
//! Each controller binary validates its pipeline paths, then hands a [`RuleSet`] to [`launch`],
//! which connects to switches `s1` through `s3`, makes this controller their primary, pushes
//! the P4 program, and installs the rules.

pub mod config;
pub mod rules;
pub mod session;
pub mod topology;

pub use config::{ConfigError, Options, PipelinePaths};
pub use rules::RuleSet;
pub use session::{Controller, Error, Interrupt, Sessions};
pub use topology::{tutorial_switches, SwitchSpec};

use anyhow::Result;
use p4ext::{Bmv2SwitchConnection, P4Error};
use tracing::{event, Level};
use tracing_subscriber::EnvFilter;

/// Logs to stderr, at the level given by `RUST_LOG` or `warn` by default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Runs `rules` against the tutorial topology and returns the process exit status.  Failing to
/// load the pipeline is an error; how the session ends is reported by [`report`].
pub fn launch(rules: RuleSet, paths: &PipelinePaths, options: &Options) -> Result<i32> {
    let (helper, pipeline) = paths.load()?;

    let interrupt = Interrupt::new();
    if let Err(err) = interrupt.register_sigint() {
        event!(Level::WARN, "installing SIGINT handler failed ({err})");
    }

    let topology = tutorial_switches(&options.log_dir);
    let controller = Controller {
        rules,
        topology: &topology,
        helper: &helper,
        pipeline: &pipeline,
        show_tables: options.show_tables,
    };
    let result = if options.dry_run {
        controller.run(&interrupt, |spec| {
            Bmv2SwitchConnection::dry_run(
                &spec.name,
                &spec.address,
                spec.device_id,
                Some(spec.proto_dump_file.as_path()),
            )
        })
    } else {
        controller.run(&interrupt, |spec| {
            Bmv2SwitchConnection::new(
                &spec.name,
                &spec.address,
                spec.device_id,
                Some(spec.proto_dump_file.as_path()),
            )
        })
    };
    Ok(report(result))
}

/// Tells the operator how a session ended and returns the matching exit status: 0 for success
/// or an interrupt, 1 for a failure.
pub fn report(result: Result<(), Error>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(Error::Interrupted) => {
            println!(" Shutting down.");
            0
        }
        Err(Error::Switch(P4Error::Rpc(err))) => {
            eprintln!("{}", err.diagnostic());
            1
        }
        Err(Error::Switch(err)) => {
            eprintln!("{err}");
            1
        }
    }
}
