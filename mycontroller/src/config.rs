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

//! Argument validation and pipeline loading shared by the controller binaries.

use clap::Parser;
use p4ext::{P4Error, P4InfoHelper, PipelineConfig};
use std::io;
use std::path::{Path, PathBuf};
use std::process::exit;
use thiserror::Error;
use tracing::{event, Level};

/// Options accepted by every controller, flattened into each binary's arguments.
#[derive(Clone, Debug, Parser, PartialEq, Eq)]
pub struct Options {
    /// Directory for the per-switch P4Runtime request logs
    #[clap(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Print every request instead of sending it to the switches
    #[clap(long)]
    pub dry_run: bool,

    /// After installing the rules, read back and print every switch's table entries
    #[clap(long)]
    pub show_tables: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("p4info file not found: {}\nHave you run 'make'?", .0.display())]
    MissingP4Info(PathBuf),

    #[error("BMv2 JSON file not found: {}\nHave you run 'make'?", .0.display())]
    MissingBmv2Json(PathBuf),
}

/// The compiler outputs a controller needs, known to exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelinePaths {
    pub p4info: PathBuf,
    pub bmv2_json: PathBuf,
}

impl PipelinePaths {
    /// Checks that both files exist, the P4Info first.
    pub fn check(p4info: &Path, bmv2_json: &Path) -> Result<Self, ConfigError> {
        if !p4info.exists() {
            return Err(ConfigError::MissingP4Info(p4info.to_path_buf()));
        }
        if !bmv2_json.exists() {
            return Err(ConfigError::MissingBmv2Json(bmv2_json.to_path_buf()));
        }
        Ok(PipelinePaths {
            p4info: p4info.to_path_buf(),
            bmv2_json: bmv2_json.to_path_buf(),
        })
    }

    /// Like [`check`](Self::check), but on failure prints `cmd`'s usage and the problem to
    /// stderr and exits with status 1.
    pub fn check_or_exit(cmd: &mut clap::Command<'_>, p4info: &Path, bmv2_json: &Path) -> Self {
        match Self::check(p4info, bmv2_json) {
            Ok(paths) => paths,
            Err(err) => {
                if let Err(e) = cmd.write_help(&mut io::stderr()) {
                    event!(Level::WARN, "writing usage failed ({e})");
                }
                eprintln!("\n{err}");
                exit(1);
            }
        }
    }

    /// Loads the P4Info and wraps it with the BMv2 JSON into the pipeline pushed to every
    /// switch.
    pub fn load(&self) -> Result<(P4InfoHelper, PipelineConfig), P4Error> {
        let helper = P4InfoHelper::load(&self.p4info)?;
        let pipeline = PipelineConfig::load_bmv2(helper.p4info().clone(), &self.bmv2_json)?;
        Ok((helper, pipeline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn p4info_is_checked_first() {
        let dir = tempfile::tempdir().unwrap();
        let p4info = dir.path().join("prog.p4.p4info.txt");
        let json = dir.path().join("prog.json");

        assert_eq!(
            PipelinePaths::check(&p4info, &json),
            Err(ConfigError::MissingP4Info(p4info.clone()))
        );

        fs::write(&p4info, "").unwrap();
        let err = PipelinePaths::check(&p4info, &json).unwrap_err();
        assert_eq!(err, ConfigError::MissingBmv2Json(json.clone()));
        assert_eq!(
            err.to_string(),
            format!("BMv2 JSON file not found: {}\nHave you run 'make'?", json.display())
        );

        fs::write(&json, "{}").unwrap();
        let paths = PipelinePaths::check(&p4info, &json).unwrap();
        assert_eq!(paths.bmv2_json, json);
    }

    #[test]
    fn missing_p4info_message() {
        let err = ConfigError::MissingP4Info(PathBuf::from("./build/qos.p4.p4info.txt"));
        assert_eq!(
            err.to_string(),
            "p4info file not found: ./build/qos.p4.p4info.txt\nHave you run 'make'?"
        );
    }

    #[test]
    fn option_defaults() {
        let options = Options::parse_from(["controller"]);
        assert_eq!(options.log_dir, PathBuf::from("logs"));
        assert!(!options.dry_run);
        assert!(!options.show_tables);

        let options = Options::parse_from(["controller", "--dry-run", "--log-dir", "/tmp/x"]);
        assert!(options.dry_run);
        assert_eq!(options.log_dir, PathBuf::from("/tmp/x"));
    }

    #[test]
    fn unparseable_p4info_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let p4info = dir.path().join("prog.p4.p4info.txt");
        let json = dir.path().join("prog.json");
        fs::write(&p4info, "tables {").unwrap();
        fs::write(&json, "{}").unwrap();
        let paths = PipelinePaths::check(&p4info, &json).unwrap();
        assert!(matches!(paths.load(), Err(P4Error::ParseP4Info { .. })));
    }
}
