//! Client side of the `p4.v1.P4Runtime` gRPC service.
//!
//! This mirrors what `grpcio-compiler` would emit for `p4/v1/p4runtime.proto`, restricted to the
//! client calls a controller makes: `Write`, `Read`, `SetForwardingPipelineConfig` and
//! `StreamChannel`.

#![allow(clippy::all)]

use super::p4runtime::{
    ReadRequest,
    ReadResponse,
    SetForwardingPipelineConfigRequest,
    SetForwardingPipelineConfigResponse,
    StreamMessageRequest,
    StreamMessageResponse,
    WriteRequest,
    WriteResponse,
};

/// Full gRPC method paths, as they appear on the wire and in request logs.
pub const WRITE: &str = "/p4.v1.P4Runtime/Write";
pub const READ: &str = "/p4.v1.P4Runtime/Read";
pub const SET_FORWARDING_PIPELINE_CONFIG: &str = "/p4.v1.P4Runtime/SetForwardingPipelineConfig";
pub const STREAM_CHANNEL: &str = "/p4.v1.P4Runtime/StreamChannel";

macro_rules! method {
    ($ty:ident, $name:expr) => {
        ::grpcio::Method {
            ty: ::grpcio::MethodType::$ty,
            name: $name,
            req_mar: ::grpcio::Marshaller { ser: ::grpcio::pb_ser, de: ::grpcio::pb_de },
            resp_mar: ::grpcio::Marshaller { ser: ::grpcio::pb_ser, de: ::grpcio::pb_de },
        }
    };
}

const METHOD_WRITE: ::grpcio::Method<WriteRequest, WriteResponse> = method!(Unary, WRITE);
const METHOD_READ: ::grpcio::Method<ReadRequest, ReadResponse> = method!(ServerStreaming, READ);
const METHOD_SET_FORWARDING_PIPELINE_CONFIG: ::grpcio::Method<SetForwardingPipelineConfigRequest, SetForwardingPipelineConfigResponse> =
    method!(Unary, SET_FORWARDING_PIPELINE_CONFIG);
const METHOD_STREAM_CHANNEL: ::grpcio::Method<StreamMessageRequest, StreamMessageResponse> =
    method!(Duplex, STREAM_CHANNEL);

#[derive(Clone)]
pub struct P4RuntimeClient {
    client: ::grpcio::Client,
}

impl P4RuntimeClient {
    pub fn new(channel: ::grpcio::Channel) -> Self {
        P4RuntimeClient {
            client: ::grpcio::Client::new(channel),
        }
    }

    pub fn write_opt(&self, req: &WriteRequest, opt: ::grpcio::CallOption) -> ::grpcio::Result<WriteResponse> {
        self.client.unary_call(&METHOD_WRITE, req, opt)
    }

    pub fn write(&self, req: &WriteRequest) -> ::grpcio::Result<WriteResponse> {
        self.write_opt(req, ::grpcio::CallOption::default())
    }

    pub fn read_opt(&self, req: &ReadRequest, opt: ::grpcio::CallOption) -> ::grpcio::Result<::grpcio::ClientSStreamReceiver<ReadResponse>> {
        self.client.server_streaming(&METHOD_READ, req, opt)
    }

    pub fn read(&self, req: &ReadRequest) -> ::grpcio::Result<::grpcio::ClientSStreamReceiver<ReadResponse>> {
        self.read_opt(req, ::grpcio::CallOption::default())
    }

    pub fn set_forwarding_pipeline_config_opt(&self, req: &SetForwardingPipelineConfigRequest, opt: ::grpcio::CallOption) -> ::grpcio::Result<SetForwardingPipelineConfigResponse> {
        self.client.unary_call(&METHOD_SET_FORWARDING_PIPELINE_CONFIG, req, opt)
    }

    pub fn set_forwarding_pipeline_config(&self, req: &SetForwardingPipelineConfigRequest) -> ::grpcio::Result<SetForwardingPipelineConfigResponse> {
        self.set_forwarding_pipeline_config_opt(req, ::grpcio::CallOption::default())
    }

    pub fn stream_channel_opt(&self, opt: ::grpcio::CallOption) -> ::grpcio::Result<(::grpcio::ClientDuplexSender<StreamMessageRequest>, ::grpcio::ClientDuplexReceiver<StreamMessageResponse>)> {
        self.client.duplex_streaming(&METHOD_STREAM_CHANNEL, opt)
    }

    pub fn stream_channel(&self) -> ::grpcio::Result<(::grpcio::ClientDuplexSender<StreamMessageRequest>, ::grpcio::ClientDuplexReceiver<StreamMessageResponse>)> {
        self.stream_channel_opt(::grpcio::CallOption::default())
    }
}
