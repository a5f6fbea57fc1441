/*
Copyright (c) 2021 VMware, Inc.
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

use chrono::Utc;

use crate::{Operation, P4Error, RpcError};

use futures::executor::block_on;
use futures::{SinkExt, StreamExt};

use grpcio::{
    ChannelBuilder,
    ClientDuplexReceiver,
    ClientDuplexSender,
    ClientSStreamReceiver,
    EnvBuilder,
    Environment,
    WriteFlags,
};

use proto::p4info::P4Info;
use proto::p4runtime::{
    Entity,
    ForwardingPipelineConfig,
    ForwardingPipelineConfig_Cookie,
    MasterArbitrationUpdate,
    ReadRequest,
    ReadResponse,
    SetForwardingPipelineConfigRequest,
    SetForwardingPipelineConfigRequest_Action,
    StreamMessageRequest,
    StreamMessageResponse,
    TableEntry,
    Uint128,
    Update,
    Update_Type,
    WriteRequest,
};
use proto::p4runtime_grpc::P4RuntimeClient;

use protobuf::{Message, RepeatedField};

use lazy_static::lazy_static;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, event, info, Level};

/// Election id `(high, low)` this controller claims mastership with.
pub const ELECTION_ID: (u64, u64) = (0, 1);

/// Requests this large or larger are not written to the request log.
const MSG_LOG_MAX_LEN: u32 = 1024;

/// The gRPC environment, with its completion queue threads, shared by every connection.
fn grpc_env() -> Arc<Environment> {
    lazy_static! {
        static ref ENV: Arc<Environment> = Arc::new(EnvBuilder::new().name_prefix("p4runtime").build());
    }
    ENV.clone()
}

fn election_id() -> Uint128 {
    let mut id = Uint128::new();
    id.set_high(ELECTION_ID.0);
    id.set_low(ELECTION_ID.1);
    id
}

/// The forwarding pipeline pushed to a switch: P4Info plus the target-specific device
/// configuration (for BMv2, the compiled JSON).
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    p4info: P4Info,
    device_config: Vec<u8>,
    cookie: Option<u64>,
}

impl PipelineConfig {
    pub fn new(p4info: P4Info, device_config: Vec<u8>) -> Self {
        PipelineConfig {
            p4info,
            device_config,
            cookie: None,
        }
    }

    /// Reads the BMv2 JSON at `bmv2_json` as the device configuration.
    pub fn load_bmv2<P: AsRef<Path>>(p4info: P4Info, bmv2_json: P) -> Result<Self, P4Error> {
        let path = bmv2_json.as_ref();
        let device_config = fs::read(path).map_err(|source| P4Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(p4info, device_config))
    }

    pub fn with_cookie(self, cookie: u64) -> Self {
        PipelineConfig {
            cookie: Some(cookie),
            ..self
        }
    }

    pub fn p4info(&self) -> &P4Info {
        &self.p4info
    }

    pub fn device_config(&self) -> &[u8] {
        &self.device_config
    }

    pub fn cookie(&self) -> Option<u64> {
        self.cookie
    }

    fn to_proto(&self) -> ForwardingPipelineConfig {
        let mut config = ForwardingPipelineConfig::new();
        config.set_p4info(self.p4info.clone());
        config.set_p4_device_config(self.device_config.clone());
        if let Some(cookie) = self.cookie {
            let mut cookie_jar = ForwardingPipelineConfig_Cookie::new();
            cookie_jar.set_cookie(cookie);
            config.set_cookie(cookie_jar);
        }
        config
    }
}

/// The calls a controller makes on one switch.  All of them block until the switch answers.
pub trait SwitchConnection {
    fn name(&self) -> &str;

    fn device_id(&self) -> u64;

    /// Claims mastership of the device.  The stream that carries the claim stays open until
    /// [`shutdown`](SwitchConnection::shutdown), since mastership ends with it.
    fn master_arbitration_update(&mut self) -> Result<(), P4Error>;

    fn set_forwarding_pipeline_config(&mut self, pipeline: &PipelineConfig) -> Result<(), P4Error>;

    /// Inserts `entry`, or modifies the table's default action if `entry` is a default entry.
    fn write_table_entry(&mut self, entry: &TableEntry) -> Result<(), P4Error>;

    /// Reads the entries of table `table_id`, or of every table if `table_id` is 0.
    fn read_table_entries(&mut self, table_id: u32) -> Result<Vec<TableEntry>, P4Error>;

    /// Closes the connection.  Calling it again does nothing.
    fn shutdown(&mut self);
}

/// Appends every request sent to one switch to a text file, for debugging.
pub struct RequestLog {
    path: PathBuf,
    file: File,
}

impl RequestLog {
    /// Creates (or truncates) the log at `path`, along with any missing parent directories.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, P4Error> {
        let path = path.as_ref();
        let io_error = |source| P4Error::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_error)?;
        }
        let file = File::create(path).map_err(io_error)?;
        Ok(RequestLog {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `request`, sent as `method`, with a timestamp.  Failures are logged, not
    /// returned: losing a trace must not abort the request.
    pub fn record<M: Message>(&mut self, method: &str, request: &M) {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let size = request.compute_size();
        let body = if size < MSG_LOG_MAX_LEN {
            format!("{:#?}", request).trim_end().to_string()
        } else {
            format!("Message too long ({} bytes)! Skipping log...", size)
        };
        if let Err(e) = write!(self.file, "\n[{}] {}\n---\n{}\n---\n", timestamp, method, body) {
            event!(Level::WARN, "{}: could not log request ({})", self.path.display(), e);
        }
    }
}

type StreamChannel = (
    ClientDuplexSender<StreamMessageRequest>,
    ClientDuplexReceiver<StreamMessageResponse>,
);

/// A P4Runtime connection to a BMv2 `simple_switch_grpc` instance.
///
/// A dry-run connection opens no channel: it prints every request it would send and reports
/// success.
pub struct Bmv2SwitchConnection {
    name: String,
    address: String,
    device_id: u64,
    client: Option<P4RuntimeClient>,
    stream: Option<StreamChannel>,
    log: Option<RequestLog>,
    closed: bool,
}

impl Bmv2SwitchConnection {
    /// Opens a channel to `address`.  The channel connects lazily, so an unreachable switch is
    /// only reported by the first call.  If `proto_dump_file` is given, requests are logged
    /// there.
    pub fn new(
        name: &str,
        address: &str,
        device_id: u64,
        proto_dump_file: Option<&Path>,
    ) -> Result<Self, P4Error> {
        let ch = ChannelBuilder::new(grpc_env()).connect(address);
        let client = P4RuntimeClient::new(ch);
        info!("{}: connecting to {} (device id {})", name, address, device_id);
        Self::with_client(name, address, device_id, Some(client), proto_dump_file)
    }

    pub fn dry_run(
        name: &str,
        address: &str,
        device_id: u64,
        proto_dump_file: Option<&Path>,
    ) -> Result<Self, P4Error> {
        Self::with_client(name, address, device_id, None, proto_dump_file)
    }

    fn with_client(
        name: &str,
        address: &str,
        device_id: u64,
        client: Option<P4RuntimeClient>,
        proto_dump_file: Option<&Path>,
    ) -> Result<Self, P4Error> {
        let log = proto_dump_file.map(RequestLog::create).transpose()?;
        Ok(Bmv2SwitchConnection {
            name: name.to_string(),
            address: address.to_string(),
            device_id,
            client,
            stream: None,
            log,
            closed: false,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_dry_run(&self) -> bool {
        self.client.is_none()
    }

    fn rpc_error(&self, operation: Operation, source: grpcio::Error) -> P4Error {
        RpcError::new(&self.name, operation, source).into()
    }

    /// Logs `request` and, on a dry run, prints it.
    fn record<M: Message>(&mut self, operation: Operation, request: &M) {
        if let Some(log) = self.log.as_mut() {
            log.record(operation.method(), request);
        }
        self.print_if_dry_run(operation, request);
    }

    fn print_if_dry_run<M: Message>(&self, operation: Operation, request: &M) {
        if self.is_dry_run() {
            println!("P4Runtime {} ({}):\n{:#?}", operation, self.name, request);
        }
    }
}

/// Sends `request` and waits for the switch's answer to it: an arbitration update or a stream
/// error.  Anything else arriving on the stream first is skipped.
async fn arbitrate(
    stream: &mut StreamChannel,
    request: StreamMessageRequest,
) -> grpcio::Result<Option<StreamMessageResponse>> {
    let (sink, receiver) = stream;
    sink.send((request, WriteFlags::default())).await?;
    while let Some(response) = receiver.next().await {
        let response = response?;
        if response.has_arbitration() || response.has_error() {
            return Ok(Some(response));
        }
        debug!("skipping stream message received before arbitration: {:?}", response);
    }
    Ok(None)
}

/// Whether `response` makes this controller the primary of `target`.
fn arbitration_result(target: &str, response: &StreamMessageResponse) -> Result<(), P4Error> {
    if response.has_error() {
        let error = response.get_error();
        return Err(P4Error::StreamError {
            target: target.to_string(),
            code: error.canonical_code,
            message: error.message.clone(),
        });
    }
    if !response.has_arbitration() {
        return Err(P4Error::StreamClosed {
            target: target.to_string(),
        });
    }
    let status = response.get_arbitration().get_status();
    if status.code != 0 {
        return Err(P4Error::NotPrimary {
            target: target.to_string(),
            code: status.code,
            message: status.message.clone(),
        });
    }
    Ok(())
}

async fn collect_table_entries(
    stream: &mut ClientSStreamReceiver<ReadResponse>,
) -> grpcio::Result<Vec<TableEntry>> {
    let mut entries = Vec::new();
    while let Some(response) = stream.next().await {
        for entity in response?.get_entities() {
            if entity.has_table_entry() {
                entries.push(entity.get_table_entry().clone());
            }
        }
    }
    Ok(entries)
}

impl SwitchConnection for Bmv2SwitchConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_id(&self) -> u64 {
        self.device_id
    }

    fn master_arbitration_update(&mut self) -> Result<(), P4Error> {
        let mut update = MasterArbitrationUpdate::new();
        update.set_device_id(self.device_id);
        update.set_election_id(election_id());
        let mut request = StreamMessageRequest::new();
        request.set_arbitration(update);

        let client = match &self.client {
            Some(client) => client.clone(),
            None => {
                self.print_if_dry_run(Operation::MasterArbitrationUpdate, &request);
                return Ok(());
            }
        };
        let mut stream = client
            .stream_channel()
            .map_err(|e| self.rpc_error(Operation::MasterArbitrationUpdate, e))?;
        let response = block_on(arbitrate(&mut stream, request))
            .map_err(|e| self.rpc_error(Operation::MasterArbitrationUpdate, e))?
            .ok_or_else(|| P4Error::StreamClosed {
                target: self.name.clone(),
            })?;

        arbitration_result(&self.name, &response)?;
        debug!("{}: master arbitration succeeded", self.name);
        self.stream = Some(stream);
        Ok(())
    }

    fn set_forwarding_pipeline_config(&mut self, pipeline: &PipelineConfig) -> Result<(), P4Error> {
        let mut request = SetForwardingPipelineConfigRequest::new();
        request.set_device_id(self.device_id);
        request.set_election_id(election_id());
        request.set_action(SetForwardingPipelineConfigRequest_Action::VERIFY_AND_COMMIT);
        request.set_config(pipeline.to_proto());
        self.record(Operation::SetForwardingPipelineConfig, &request);

        if let Some(client) = &self.client {
            client
                .set_forwarding_pipeline_config(&request)
                .map_err(|e| self.rpc_error(Operation::SetForwardingPipelineConfig, e))?;
        }
        info!("{}: installed P4 program", self.name);
        Ok(())
    }

    fn write_table_entry(&mut self, entry: &TableEntry) -> Result<(), P4Error> {
        let mut entity = Entity::new();
        entity.set_table_entry(entry.clone());
        let mut update = Update::new();
        update.set_field_type(if entry.is_default_action {
            Update_Type::MODIFY
        } else {
            Update_Type::INSERT
        });
        update.set_entity(entity);

        let mut request = WriteRequest::new();
        request.set_device_id(self.device_id);
        request.set_election_id(election_id());
        request.set_updates(RepeatedField::from_vec(vec![update]));
        self.record(Operation::Write, &request);

        if let Some(client) = &self.client {
            client
                .write(&request)
                .map_err(|e| self.rpc_error(Operation::Write, e))?;
        }
        debug!("{}: wrote entry to table {}", self.name, entry.table_id);
        Ok(())
    }

    fn read_table_entries(&mut self, table_id: u32) -> Result<Vec<TableEntry>, P4Error> {
        let mut table_entry = TableEntry::new();
        table_entry.set_table_id(table_id);
        let mut entity = Entity::new();
        entity.set_table_entry(table_entry);
        let mut request = ReadRequest::new();
        request.set_device_id(self.device_id);
        request.set_entities(RepeatedField::from_vec(vec![entity]));
        self.record(Operation::Read, &request);

        let client = match &self.client {
            Some(client) => client.clone(),
            None => return Ok(Vec::new()),
        };
        let mut stream = client
            .read(&request)
            .map_err(|e| self.rpc_error(Operation::Read, e))?;
        block_on(collect_table_entries(&mut stream)).map_err(|e| self.rpc_error(Operation::Read, e))
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some((mut sink, receiver)) = self.stream.take() {
            if let Err(e) = block_on(sink.close()) {
                debug!("{}: closing stream channel failed ({})", self.name, e);
            }
            drop(receiver);
        }
        self.client = None;
        info!("{}: connection closed", self.name);
    }
}

impl Drop for Bmv2SwitchConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::p4runtime::{FieldMatch, StreamError};

    fn table_entry(table_id: u32) -> TableEntry {
        let mut entry = TableEntry::new();
        entry.set_table_id(table_id);
        let mut fm = FieldMatch::new();
        fm.set_field_id(1);
        entry.mut_field_match().push(fm);
        entry
    }

    #[test]
    fn connections_share_one_environment() {
        assert!(Arc::ptr_eq(&grpc_env(), &grpc_env()));
    }

    #[test]
    fn arbitration_responses() {
        let mut update = MasterArbitrationUpdate::new();
        update.set_device_id(1);
        let mut primary = StreamMessageResponse::new();
        primary.set_arbitration(update.clone());
        assert!(arbitration_result("s2", &primary).is_ok());

        update.mut_status().set_code(6);
        update.mut_status().set_message("Another controller is primary".into());
        let mut backup = StreamMessageResponse::new();
        backup.set_arbitration(update);
        match arbitration_result("s2", &backup) {
            Err(P4Error::NotPrimary { target, code, message }) => {
                assert_eq!(target, "s2");
                assert_eq!(code, 6);
                assert_eq!(message, "Another controller is primary");
            }
            other => panic!("unexpected result {:?}", other),
        }

        let mut error = StreamError::new();
        error.set_canonical_code(3);
        error.set_message("bad election id".into());
        let mut stream_error = StreamMessageResponse::new();
        stream_error.set_error(error);
        let err = arbitration_result("s2", &stream_error).unwrap_err();
        assert_eq!(
            err.to_string(),
            "s2: stream error during master arbitration (INVALID_ARGUMENT: bad election id)"
        );

        let mut other = StreamMessageResponse::new();
        other.set_other(protobuf::well_known_types::Any::new());
        assert!(matches!(
            arbitration_result("s2", &other),
            Err(P4Error::StreamClosed { .. })
        ));
    }

    #[test]
    fn log_records_requests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("s1-p4runtime-requests.txt");

        let mut log = RequestLog::create(&path).unwrap();
        let mut request = WriteRequest::new();
        request.set_device_id(1);
        log.record("/p4.v1.P4Runtime/Write", &request);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("\n["), "{:?}", text);
        assert!(text.contains("] /p4.v1.P4Runtime/Write\n---\ndevice_id: 1"), "{:?}", text);
        assert!(text.ends_with("\n---\n"));

        // Reopening truncates.
        RequestLog::create(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn log_skips_long_requests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s2-p4runtime-requests.txt");
        let mut log = RequestLog::create(&path).unwrap();

        let mut request = SetForwardingPipelineConfigRequest::new();
        request.set_config(PipelineConfig::new(P4Info::new(), vec![b'x'; 2000]).to_proto());
        let size = request.compute_size();
        log.record("/p4.v1.P4Runtime/SetForwardingPipelineConfig", &request);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(&format!("Message too long ({} bytes)! Skipping log...", size)));
        assert!(!text.contains("xxxx"));
    }

    #[test]
    fn dry_run_logs_without_a_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s3-p4runtime-requests.txt");
        let mut switch =
            Bmv2SwitchConnection::dry_run("s3", "127.0.0.1:50053", 2, Some(path.as_path())).unwrap();
        assert!(switch.is_dry_run());
        assert_eq!(switch.name(), "s3");
        assert_eq!(switch.device_id(), 2);

        switch.master_arbitration_update().unwrap();
        switch
            .set_forwarding_pipeline_config(&PipelineConfig::new(P4Info::new(), b"{}".to_vec()).with_cookie(7))
            .unwrap();
        switch.write_table_entry(&table_entry(33574068)).unwrap();
        assert!(switch.read_table_entries(0).unwrap().is_empty());
        switch.shutdown();
        switch.shutdown();

        let text = fs::read_to_string(&path).unwrap();
        let methods: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with('['))
            .filter_map(|l| l.split("] ").nth(1))
            .collect();
        assert_eq!(
            methods,
            [
                "/p4.v1.P4Runtime/SetForwardingPipelineConfig",
                "/p4.v1.P4Runtime/Write",
                "/p4.v1.P4Runtime/Read"
            ]
        );
        assert!(text.contains("type: INSERT"));
        assert!(text.contains("table_id: 33574068"));
        assert!(text.contains("election_id {"));
        assert!(text.contains("cookie: 7"));
    }

    #[test]
    fn default_entries_are_modified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s1.txt");
        let mut switch = Bmv2SwitchConnection::dry_run("s1", "127.0.0.1:50051", 0, Some(path.as_path())).unwrap();
        let mut entry = TableEntry::new();
        entry.set_table_id(1);
        entry.set_is_default_action(true);
        switch.write_table_entry(&entry).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("type: MODIFY"));
    }

    #[test]
    fn pipeline_config_from_bmv2_json() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("prog.json");
        fs::write(&json, "{\"pipelines\": []}").unwrap();
        let pipeline = PipelineConfig::load_bmv2(P4Info::new(), &json).unwrap();
        assert_eq!(pipeline.device_config(), b"{\"pipelines\": []}");
        assert_eq!(pipeline.cookie(), None);
        assert!(!pipeline.to_proto().has_cookie());

        assert!(matches!(
            PipelineConfig::load_bmv2(P4Info::new(), dir.path().join("missing.json")),
            Err(P4Error::Io { .. })
        ));
    }
}
