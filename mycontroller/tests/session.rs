//! Session ordering and cleanup, against switches that record what is done to them.

use grpcio::{RpcStatus, RpcStatusCode};
use mycontroller::session::{Controller, Error, Interrupt};
use mycontroller::{report, tutorial_switches, RuleSet, SwitchSpec};
use p4ext::{Operation, P4Error, P4InfoHelper, PipelineConfig, RpcError, SwitchConnection};
use proto::p4runtime::TableEntry;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq)]
enum Call {
    Connect,
    Arbitrate,
    Pipeline,
    Write(TableEntry),
    Read(u32),
    Shutdown,
}

type Journal = Rc<RefCell<Vec<(String, Call)>>>;

/// Fails the `nth` (counting from 0) write to `switch`.
#[derive(Clone)]
struct WriteFailure {
    switch: &'static str,
    nth: usize,
}

/// Raises the interrupt after the `nth` write to `switch` succeeds.
#[derive(Clone)]
struct InterruptAfter {
    switch: &'static str,
    nth: usize,
    interrupt: Interrupt,
}

struct FakeSwitch {
    name: String,
    device_id: u64,
    journal: Journal,
    writes: usize,
    fail_write: Option<WriteFailure>,
    interrupt_after: Option<InterruptAfter>,
}

impl FakeSwitch {
    fn log(&self, call: Call) {
        self.journal.borrow_mut().push((self.name.clone(), call));
    }
}

impl SwitchConnection for FakeSwitch {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_id(&self) -> u64 {
        self.device_id
    }

    fn master_arbitration_update(&mut self) -> Result<(), P4Error> {
        self.log(Call::Arbitrate);
        Ok(())
    }

    fn set_forwarding_pipeline_config(&mut self, _pipeline: &PipelineConfig) -> Result<(), P4Error> {
        self.log(Call::Pipeline);
        Ok(())
    }

    fn write_table_entry(&mut self, entry: &TableEntry) -> Result<(), P4Error> {
        let nth = self.writes;
        self.writes += 1;
        if let Some(f) = &self.fail_write {
            if f.switch == self.name && f.nth == nth {
                let status = RpcStatus::with_message(RpcStatusCode::ALREADY_EXISTS, "Match entry exists".into());
                return Err(RpcError::new(&self.name, Operation::Write, grpcio::Error::RpcFailure(status)).into());
            }
        }
        self.log(Call::Write(entry.clone()));
        if let Some(i) = &self.interrupt_after {
            if i.switch == self.name && i.nth == nth {
                i.interrupt.raise();
            }
        }
        Ok(())
    }

    fn read_table_entries(&mut self, table_id: u32) -> Result<Vec<TableEntry>, P4Error> {
        self.log(Call::Read(table_id));
        let entries = self
            .journal
            .borrow()
            .iter()
            .filter_map(|(name, call)| match call {
                Call::Write(e) if *name == self.name && e.table_id == table_id => Some(e.clone()),
                _ => None,
            })
            .collect();
        Ok(entries)
    }

    fn shutdown(&mut self) {
        self.log(Call::Shutdown);
    }
}

struct Harness {
    helper: P4InfoHelper,
    pipeline: PipelineConfig,
    topology: Vec<SwitchSpec>,
    journal: Journal,
    interrupt: Interrupt,
    fail_write: Option<WriteFailure>,
    interrupt_after: Option<InterruptAfter>,
    refuse_connect: Option<&'static str>,
}

impl Harness {
    fn new(fixture: &str) -> Self {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(fixture);
        let helper = P4InfoHelper::load(&path).unwrap();
        let pipeline = PipelineConfig::new(helper.p4info().clone(), b"{}".to_vec());
        Harness {
            helper,
            pipeline,
            topology: tutorial_switches(Path::new("logs")),
            journal: Rc::new(RefCell::new(Vec::new())),
            interrupt: Interrupt::new(),
            fail_write: None,
            interrupt_after: None,
            refuse_connect: None,
        }
    }

    fn run(&self, rules: RuleSet, show_tables: bool) -> Result<(), Error> {
        let controller = Controller {
            rules,
            topology: &self.topology,
            helper: &self.helper,
            pipeline: &self.pipeline,
            show_tables,
        };
        controller.run(&self.interrupt, |spec| {
            if self.refuse_connect == Some(spec.name.as_str()) {
                let status = RpcStatus::with_message(RpcStatusCode::UNAVAILABLE, "connection refused".into());
                return Err(RpcError::new(&spec.name, Operation::MasterArbitrationUpdate, grpcio::Error::RpcFailure(status)).into());
            }
            self.journal.borrow_mut().push((spec.name.clone(), Call::Connect));
            Ok(FakeSwitch {
                name: spec.name.clone(),
                device_id: spec.device_id,
                journal: self.journal.clone(),
                writes: 0,
                fail_write: self.fail_write.clone(),
                interrupt_after: self.interrupt_after.clone(),
            })
        })
    }

    fn calls(&self, switch: &str) -> Vec<Call> {
        self.journal
            .borrow()
            .iter()
            .filter(|(name, _)| name == switch)
            .map(|(_, call)| call.clone())
            .collect()
    }

    fn count(&self, switch: &str, pred: fn(&Call) -> bool) -> usize {
        self.calls(switch).iter().filter(|c| pred(c)).count()
    }

    fn writes(&self, switch: &str) -> Vec<TableEntry> {
        self.calls(switch)
            .into_iter()
            .filter_map(|c| match c {
                Call::Write(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn shutdowns(&self, switch: &str) -> usize {
        self.count(switch, |c| *c == Call::Shutdown)
    }
}

fn is_write(c: &Call) -> bool {
    matches!(c, Call::Write(_))
}

#[test]
fn arbitration_and_pipeline_precede_writes() {
    let h = Harness::new("load_balance.p4.p4info.txt");
    h.run(RuleSet::LoadBalance, false).unwrap();

    let phases: Vec<(String, &str)> = h
        .journal
        .borrow()
        .iter()
        .map(|(name, call)| {
            let phase = match call {
                Call::Connect => "connect",
                Call::Arbitrate => "arbitrate",
                Call::Pipeline => "pipeline",
                Call::Write(_) => "write",
                Call::Read(_) => "read",
                Call::Shutdown => "shutdown",
            };
            (name.clone(), phase)
        })
        .collect();
    let mut expected = Vec::new();
    for phase in ["connect", "arbitrate", "pipeline"] {
        for s in ["s1", "s2", "s3"] {
            expected.push((s.to_string(), phase));
        }
    }
    for (s, n) in [("s1", 5), ("s2", 3), ("s3", 3)] {
        for _ in 0..n {
            expected.push((s.to_string(), "write"));
        }
    }
    for s in ["s1", "s2", "s3"] {
        expected.push((s.to_string(), "shutdown"));
    }
    assert_eq!(phases, expected);

    for s in ["s1", "s2", "s3"] {
        assert_eq!(h.count(s, |c| *c == Call::Arbitrate), 1);
        assert_eq!(h.count(s, |c| *c == Call::Pipeline), 1);
        assert_eq!(h.shutdowns(s), 1);
    }
}

#[test]
fn load_balance_requests_match_fixture_bytes() {
    let h = Harness::new("load_balance.p4.p4info.txt");
    h.run(RuleSet::LoadBalance, false).unwrap();

    let s1 = h.writes("s1");
    let group = &s1[0];
    assert_eq!(group.table_id, 33574068);
    assert!(!group.is_default_action);
    let lpm = group.get_field_match()[0].get_lpm();
    assert_eq!(lpm.get_value(), &[10, 0, 0, 1]);
    assert_eq!(lpm.prefix_len, 32);
    let action = group.get_action().get_action();
    assert_eq!(action.action_id, 16799162);
    let params: Vec<(u32, &[u8])> = action.get_params().iter().map(|p| (p.param_id, p.get_value())).collect();
    assert_eq!(params, [(1, &[0u8, 0][..]), (2, &[0u8, 0, 0, 2][..])]);

    let nhop = &s1[2];
    assert_eq!(nhop.table_id, 33555591);
    assert_eq!(nhop.get_field_match()[0].get_exact().get_value(), &[0, 1]);
    let params: Vec<(u32, &[u8])> = nhop
        .get_action()
        .get_action()
        .get_params()
        .iter()
        .map(|p| (p.param_id, p.get_value()))
        .collect();
    assert_eq!(
        params,
        [
            (1, &[0u8, 0, 0, 0, 1, 3][..]),
            (2, &[10u8, 0, 3, 3][..]),
            (3, &[0u8, 3][..])
        ]
    );

    let s3 = h.writes("s3");
    let frame = &s3[2];
    assert_eq!(frame.table_id, 33605373);
    assert_eq!(frame.get_field_match()[0].get_exact().get_value(), &[0, 1]);
    assert_eq!(
        frame.get_action().get_action().get_params()[0].get_value(),
        &[0, 0, 0, 3, 1, 0]
    );
}

#[test]
fn qos_rules_use_prefix_lengths() {
    let h = Harness::new("qos.p4.p4info.txt");
    h.run(RuleSet::Qos, false).unwrap();

    let s2: Vec<(Vec<u8>, i32)> = h
        .writes("s2")
        .iter()
        .map(|e| {
            let lpm = e.get_field_match()[0].get_lpm();
            (lpm.get_value().to_vec(), lpm.prefix_len)
        })
        .collect();
    assert_eq!(
        s2,
        [
            (vec![10, 0, 2, 2], 32),
            (vec![10, 0, 2, 22], 32),
            (vec![10, 0, 1, 0], 24),
            (vec![10, 0, 3, 0], 24)
        ]
    );
    assert_eq!(h.writes("s1").len(), 4);
    assert_eq!(h.writes("s3").len(), 3);
}

#[test]
fn failed_write_closes_every_connection() {
    let mut h = Harness::new("load_balance.p4.p4info.txt");
    h.fail_write = Some(WriteFailure { switch: "s2", nth: 1 });

    let result = h.run(RuleSet::LoadBalance, false);
    match &result {
        Err(Error::Switch(P4Error::Rpc(e))) => {
            assert_eq!(e.diagnostic(), "gRPC Error: Match entry exists (ALREADY_EXISTS) [s2: Write]");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(report(result), 1);

    assert_eq!(h.writes("s1").len(), 5);
    assert_eq!(h.writes("s2").len(), 1);
    assert_eq!(h.count("s3", is_write), 0);
    for s in ["s1", "s2", "s3"] {
        assert_eq!(h.shutdowns(s), 1, "{s}");
    }
}

#[test]
fn interrupt_between_writes_closes_every_connection() {
    let mut h = Harness::new("qos.p4.p4info.txt");
    h.interrupt_after = Some(InterruptAfter {
        switch: "s1",
        nth: 1,
        interrupt: h.interrupt.clone(),
    });

    let result = h.run(RuleSet::Qos, false);
    assert!(matches!(result, Err(Error::Interrupted)));
    assert_eq!(report(result), 0);

    assert_eq!(h.writes("s1").len(), 2);
    assert_eq!(h.count("s2", is_write), 0);
    for s in ["s1", "s2", "s3"] {
        assert_eq!(h.shutdowns(s), 1, "{s}");
    }
}

#[test]
fn interrupt_during_last_write_is_reported() {
    let mut h = Harness::new("load_balance.p4.p4info.txt");
    h.interrupt_after = Some(InterruptAfter {
        switch: "s3",
        nth: 2,
        interrupt: h.interrupt.clone(),
    });

    let result = h.run(RuleSet::LoadBalance, false);
    assert!(matches!(result, Err(Error::Interrupted)));
    assert_eq!(report(result), 0);

    assert_eq!(h.writes("s3").len(), 3);
    for s in ["s1", "s2", "s3"] {
        assert_eq!(h.shutdowns(s), 1, "{s}");
    }
}

#[test]
fn interrupt_before_start_opens_nothing() {
    let h = Harness::new("qos.p4.p4info.txt");
    h.interrupt.raise();
    assert!(matches!(h.run(RuleSet::Qos, false), Err(Error::Interrupted)));
    assert!(h.journal.borrow().is_empty());
}

#[test]
fn connect_failure_closes_opened_connections() {
    let mut h = Harness::new("load_balance.p4.p4info.txt");
    h.refuse_connect = Some("s2");

    let result = h.run(RuleSet::LoadBalance, false);
    assert!(matches!(result, Err(Error::Switch(P4Error::Rpc(_)))));
    assert_eq!(h.calls("s1"), [Call::Connect, Call::Shutdown]);
    assert!(h.calls("s2").is_empty());
    assert!(h.calls("s3").is_empty());
}

#[test]
fn entry_build_errors_close_connections() {
    // Load-balance rules against the qos program: the first table is unknown.
    let h = Harness::new("qos.p4.p4info.txt");
    let result = h.run(RuleSet::LoadBalance, false);
    match &result {
        Err(Error::Switch(P4Error::UnknownTable(name))) => assert_eq!(name, "MyIngress.ecmp_group"),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(report(result), 1);
    for s in ["s1", "s2", "s3"] {
        assert_eq!(h.count(s, is_write), 0);
        assert_eq!(h.shutdowns(s), 1);
    }
}

#[test]
fn show_tables_reads_every_table() {
    let h = Harness::new("load_balance.p4.p4info.txt");
    h.run(RuleSet::LoadBalance, true).unwrap();

    for s in ["s1", "s2", "s3"] {
        let reads: Vec<u32> = h
            .calls(s)
            .into_iter()
            .filter_map(|c| match c {
                Call::Read(id) => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(reads, [33574068, 33555591, 33605373]);
        assert_eq!(h.calls(s).last(), Some(&Call::Shutdown));
    }
}
