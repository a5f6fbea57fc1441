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

use anyhow::Result;
use clap::{CommandFactory, Parser};
use mycontroller::{launch, Options, PipelinePaths, RuleSet};
use std::path::PathBuf;
use std::process::exit;

/// P4Runtime Controller
///
/// Installs ECMP load-balancing rules on the tutorial switches.
#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    /// p4info proto in text format from p4c
    #[clap(long, default_value = "./build/load_balance.p4.p4info.txt")]
    p4info: PathBuf,

    /// BMv2 JSON file from p4c
    #[clap(long, default_value = "./build/load_balance.json")]
    bmv2_json: PathBuf,

    #[clap(flatten)]
    options: Options,
}

fn main() -> Result<()> {
    mycontroller::init_logging();

    let args = Args::parse();
    let paths = PipelinePaths::check_or_exit(&mut Args::command(), &args.p4info, &args.bmv2_json);
    let status = launch(RuleSet::LoadBalance, &paths, &args.options)?;
    if status != 0 {
        exit(status);
    }
    Ok(())
}
