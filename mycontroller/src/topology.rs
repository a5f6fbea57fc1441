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

//! The switches of the tutorial topology.

use std::path::{Path, PathBuf};

/// Where to reach one switch and where to log the requests sent to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchSpec {
    pub name: String,
    pub address: String,
    pub device_id: u64,
    pub proto_dump_file: PathBuf,
}

impl SwitchSpec {
    fn new(name: &str, port: u16, device_id: u64, log_dir: &Path) -> Self {
        SwitchSpec {
            name: name.to_string(),
            address: format!("127.0.0.1:{port}"),
            device_id,
            proto_dump_file: log_dir.join(format!("{name}-p4runtime-requests.txt")),
        }
    }
}

/// Switches `s1`, `s2` and `s3`, listening on consecutive ports from 50051, with request
/// logs under `log_dir`.
pub fn tutorial_switches(log_dir: &Path) -> Vec<SwitchSpec> {
    vec![
        SwitchSpec::new("s1", 50051, 0, log_dir),
        SwitchSpec::new("s2", 50052, 1, log_dir),
        SwitchSpec::new("s3", 50053, 2, log_dir),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_switches() {
        let switches = tutorial_switches(Path::new("logs"));
        let summary: Vec<(&str, &str, u64)> = switches
            .iter()
            .map(|s| (s.name.as_str(), s.address.as_str(), s.device_id))
            .collect();
        assert_eq!(
            summary,
            [
                ("s1", "127.0.0.1:50051", 0),
                ("s2", "127.0.0.1:50052", 1),
                ("s3", "127.0.0.1:50053", 2)
            ]
        );
        assert_eq!(
            switches[1].proto_dump_file,
            PathBuf::from("logs/s2-p4runtime-requests.txt")
        );
    }
}
