//! Runs the controller binaries the way an operator would.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct Program {
    exe: &'static str,
    name: &'static str,
}

const LOAD_BALANCE: Program = Program {
    exe: env!("CARGO_BIN_EXE_load-balance-controller"),
    name: "load_balance",
};

const QOS: Program = Program {
    exe: env!("CARGO_BIN_EXE_qos-controller"),
    name: "qos",
};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

impl Program {
    fn p4info(&self) -> String {
        format!("{}.p4.p4info.txt", self.name)
    }

    fn json(&self) -> String {
        format!("{}.json", self.name)
    }

    /// A working directory with the compiler outputs under `build/`, as the defaults expect.
    fn workdir(&self, with_p4info: bool, with_json: bool) -> Result<TempDir> {
        let dir = tempfile::tempdir()?;
        fs::create_dir(dir.path().join("build"))?;
        if with_p4info {
            fs::copy(fixture(&self.p4info()), dir.path().join("build").join(self.p4info()))?;
        }
        if with_json {
            fs::write(dir.path().join("build").join(self.json()), "{\"program\": \"test\"}")?;
        }
        Ok(dir)
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        Ok(Command::new(self.exe)
            .args(args)
            .current_dir(dir)
            .env_remove("RUST_LOG")
            .output()?)
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[test]
fn missing_files_print_usage_and_hint() -> Result<()> {
    for program in [&LOAD_BALANCE, &QOS] {
        for (with_p4info, with_json) in [(false, false), (false, true), (true, false)] {
            let dir = program.workdir(with_p4info, with_json)?;
            let output = program.run(dir.path(), &[])?;
            let stderr = text(&output.stderr);

            assert_eq!(output.status.code(), Some(1), "{stderr}");
            assert!(stderr.contains("--bmv2-json"), "{stderr}");
            let expected = if with_p4info {
                format!("\nBMv2 JSON file not found: ./build/{}\nHave you run 'make'?", program.json())
            } else {
                format!("\np4info file not found: ./build/{}\nHave you run 'make'?", program.p4info())
            };
            assert!(stderr.contains(&expected), "{stderr}");

            // Nothing was attempted, so there are no request logs.
            assert!(!dir.path().join("logs").exists());
        }
    }
    Ok(())
}

#[test]
fn explicit_paths_are_validated() -> Result<()> {
    let dir = QOS.workdir(true, true)?;
    let output = QOS.run(dir.path(), &["--p4info", "elsewhere/qos.p4.p4info.txt"])?;
    assert_eq!(output.status.code(), Some(1));
    assert!(text(&output.stderr).contains("p4info file not found: elsewhere/qos.p4.p4info.txt"));
    Ok(())
}

#[test]
fn unparseable_p4info_fails() -> Result<()> {
    let dir = QOS.workdir(false, true)?;
    fs::write(dir.path().join("build").join(QOS.p4info()), "tables { preamble {")?;
    let output = QOS.run(dir.path(), &["--dry-run"])?;
    assert_eq!(output.status.code(), Some(1));
    assert!(text(&output.stderr).contains("could not parse P4Info"));
    Ok(())
}

#[test]
fn load_balance_dry_run() -> Result<()> {
    let dir = LOAD_BALANCE.workdir(true, true)?;
    let output = LOAD_BALANCE.run(dir.path(), &["--dry-run"])?;
    let stdout = text(&output.stdout);
    assert!(output.status.success(), "{}", text(&output.stderr));

    for (switch, writes) in [("s1", 5), ("s2", 3), ("s3", 3)] {
        assert_eq!(stdout.matches(&format!("P4Runtime MasterArbitrationUpdate ({switch})")).count(), 1);
        assert_eq!(stdout.matches(&format!("P4Runtime SetForwardingPipelineConfig ({switch})")).count(), 1);
        assert_eq!(stdout.matches(&format!("P4Runtime Write ({switch})")).count(), writes);

        let log = fs::read_to_string(dir.path().join("logs").join(format!("{switch}-p4runtime-requests.txt")))?;
        assert_eq!(log.matches("/p4.v1.P4Runtime/SetForwardingPipelineConfig").count(), 1);
        assert_eq!(log.matches("/p4.v1.P4Runtime/Write").count(), writes);
        assert!(log.contains("type: INSERT"));
    }
    assert!(!stdout.contains("Installed Forward rule"));
    Ok(())
}

#[test]
fn qos_dry_run_with_log_dir_and_tables() -> Result<()> {
    let dir = QOS.workdir(true, true)?;
    let output = QOS.run(dir.path(), &["--dry-run", "--show-tables", "--log-dir", "traces"])?;
    let stdout = text(&output.stdout);
    assert!(output.status.success(), "{}", text(&output.stderr));

    for (switch, rules) in [("s1", 4), ("s2", 4), ("s3", 3)] {
        assert_eq!(stdout.matches(&format!("Installed Forward rule on {switch}\n")).count(), rules);
        assert!(stdout.contains(&format!("----- Reading tables rules for {switch} -----")));
        assert!(dir.path().join("traces").join(format!("{switch}-p4runtime-requests.txt")).exists());
    }
    assert!(!dir.path().join("logs").exists());
    Ok(())
}
