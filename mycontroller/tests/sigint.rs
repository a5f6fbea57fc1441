//! SIGINT handling.  Signal dispositions are process-wide, so the repeated-SIGINT case runs in a
//! child copy of this test binary.

use mycontroller::session::FORCED_EXIT_STATUS;
use mycontroller::Interrupt;
use signal_hook::consts::signal::SIGINT;
use signal_hook::low_level::raise;
use std::env;
use std::process::Command;

const CHILD_ENV: &str = "MYCONTROLLER_SIGINT_CHILD";

#[test]
fn first_sigint_raises_flag() {
    if env::var_os(CHILD_ENV).is_some() {
        return;
    }
    let interrupt = Interrupt::new();
    interrupt.register_sigint().unwrap();
    assert!(!interrupt.is_raised());

    // `raise` runs the handler on this thread before returning.
    raise(SIGINT).unwrap();
    assert!(interrupt.is_raised());
}

#[test]
fn second_sigint_exits() {
    let output = Command::new(env::current_exe().unwrap())
        .args(["--exact", "repeated_sigint_child", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .output()
        .unwrap();
    assert_eq!(
        output.status.code(),
        Some(FORCED_EXIT_STATUS),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Only does anything when started by `second_sigint_exits`.
#[test]
fn repeated_sigint_child() {
    if env::var_os(CHILD_ENV).is_none() {
        return;
    }
    let interrupt = Interrupt::new();
    interrupt.register_sigint().unwrap();
    raise(SIGINT).unwrap();
    assert!(interrupt.is_raised());
    raise(SIGINT).unwrap();
    panic!("still running after a second SIGINT");
}
