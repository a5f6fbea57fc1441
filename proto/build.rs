extern crate protobuf_codegen_pure;

// Generates the P4Runtime message types into src/.  The gRPC client stub
// (src/p4runtime_grpc.rs) is maintained by hand because the pure-Rust code
// generator only emits messages.
fn main() {
    let protos = [
        ("p4runtime/proto", "p4/v1/p4runtime.proto"),
        ("p4runtime/proto", "p4/config/v1/p4info.proto"),
        ("p4runtime/proto", "p4/config/v1/p4types.proto"),
        ("googleapis", "google/rpc/status.proto"),
    ];
    for proto in &protos {
        println!("cargo:rerun-if-changed={}/{}", proto.0, proto.1);
    }
    protobuf_codegen_pure::Codegen::new()
        .out_dir("src")
        .includes(&["p4runtime/proto", "googleapis"])
        .inputs(protos.iter().map(|x| format!("{}/{}", x.0, x.1)))
        .run()
        .expect("Failed to compile P4Runtime protobuf definitions!");
}
