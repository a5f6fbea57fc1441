extern crate p4ext;

use p4ext::{
    Bmv2SwitchConnection,
    Match,
    MacAddr,
    Operation,
    P4Error,
    P4InfoHelper,
    PipelineConfig,
    SwitchConnection,
    TableEntryRequest,
};

use std::fs;
use std::net::Ipv4Addr;

const P4INFO: &str = r#"pkg_info {
  arch: "v1model"
}
tables {
  preamble {
    id: 37375156
    name: "MyIngress.ipv4_lpm"
    alias: "ipv4_lpm"
  }
  match_fields {
    id: 1
    name: "hdr.ipv4.dstAddr"
    bitwidth: 32
    match_type: LPM
  }
  action_refs {
    id: 28792405
  }
  size: 1024
}
actions {
  preamble {
    id: 28792405
    name: "MyIngress.ipv4_forward"
    alias: "ipv4_forward"
  }
  params {
    id: 1
    name: "dstAddr"
    bitwidth: 48
  }
  params {
    id: 2
    name: "port"
    bitwidth: 9
  }
}
"#;

struct Setup {
    _dir: tempfile::TempDir,
    helper: P4InfoHelper,
    pipeline: PipelineConfig,
    log: std::path::PathBuf,
}

impl Setup {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let p4info = dir.path().join("basic.p4.p4info.txt");
        let json = dir.path().join("basic.json");
        fs::write(&p4info, P4INFO).unwrap();
        fs::write(&json, "{}").unwrap();

        let helper = P4InfoHelper::load(&p4info).unwrap();
        let pipeline = PipelineConfig::load_bmv2(helper.p4info().clone(), &json).unwrap();
        let log = dir.path().join("logs").join("s1-p4runtime-requests.txt");
        Self {
            _dir: dir,
            helper,
            pipeline,
            log,
        }
    }

    fn request(&self) -> TableEntryRequest {
        TableEntryRequest::new("MyIngress.ipv4_lpm", "MyIngress.ipv4_forward")
            .with_match("hdr.ipv4.dstAddr", Match::Lpm(Ipv4Addr::new(10, 0, 1, 1).into(), 32))
            .with_param("dstAddr", MacAddr([8, 0, 0, 0, 1, 1]))
            .with_param("port", 2u32)
    }
}

#[test]
fn dry_run_session() {
    let setup = Setup::new();
    let entry = setup.helper.build_table_entry(&setup.request()).unwrap();

    let mut switch =
        Bmv2SwitchConnection::dry_run("s1", "127.0.0.1:50051", 0, Some(setup.log.as_path())).unwrap();
    switch.master_arbitration_update().unwrap();
    switch.set_forwarding_pipeline_config(&setup.pipeline).unwrap();
    switch.write_table_entry(&entry).unwrap();
    switch.shutdown();

    let log = fs::read_to_string(&setup.log).unwrap();
    assert_eq!(log.matches("/p4.v1.P4Runtime/Write").count(), 1);
    assert_eq!(log.matches("/p4.v1.P4Runtime/SetForwardingPipelineConfig").count(), 1);
    assert!(log.contains("table_id: 37375156"));
}

#[test]
fn unreachable_switch_reports_rpc_error() {
    let setup = Setup::new();

    // Nothing listens on the discard port.
    let mut switch = Bmv2SwitchConnection::new("s1", "127.0.0.1:9", 0, None).unwrap();
    match switch.set_forwarding_pipeline_config(&setup.pipeline) {
        Err(P4Error::Rpc(e)) => {
            assert_eq!(e.target, "s1");
            assert_eq!(e.operation, Operation::SetForwardingPipelineConfig);
            let diagnostic = e.diagnostic();
            assert!(diagnostic.starts_with("gRPC Error: "), "{}", diagnostic);
            assert!(diagnostic.ends_with("[s1: SetForwardingPipelineConfig]"), "{}", diagnostic);
        }
        other => panic!("expected an RPC error, got {:?}", other),
    }
    switch.shutdown();
}
