//! Rust bindings for the P4Runtime v1 API: protobuf messages generated by `build.rs` and the
//! `P4RuntimeClient` gRPC stub.

pub mod p4info;
pub mod p4runtime;
pub mod p4runtime_grpc;
pub mod p4types;
pub mod status;
