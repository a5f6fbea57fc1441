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

use crate::MatchType;

use proto::p4runtime;
use proto::p4runtime_grpc;
use proto::status::Status;

use protobuf::Message;

use std::fmt::{self, Display, Write};
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The P4Runtime calls a switch connection makes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    MasterArbitrationUpdate,
    SetForwardingPipelineConfig,
    Write,
    Read,
}

impl Operation {
    /// The gRPC method that carries this operation.
    pub fn method(&self) -> &'static str {
        match self {
            Operation::MasterArbitrationUpdate => p4runtime_grpc::STREAM_CHANNEL,
            Operation::SetForwardingPipelineConfig => p4runtime_grpc::SET_FORWARDING_PIPELINE_CONFIG,
            Operation::Write => p4runtime_grpc::WRITE,
            Operation::Read => p4runtime_grpc::READ,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::MasterArbitrationUpdate => "MasterArbitrationUpdate",
            Operation::SetForwardingPipelineConfig => "SetForwardingPipelineConfig",
            Operation::Write => "Write",
            Operation::Read => "Read",
        };
        write!(f, "{}", s)
    }
}

/// Name of a canonical gRPC status code, as used by `google.rpc.Code`.
pub fn code_name(code: i32) -> &'static str {
    match code {
        0 => "OK",
        1 => "CANCELLED",
        2 => "UNKNOWN",
        3 => "INVALID_ARGUMENT",
        4 => "DEADLINE_EXCEEDED",
        5 => "NOT_FOUND",
        6 => "ALREADY_EXISTS",
        7 => "PERMISSION_DENIED",
        8 => "RESOURCE_EXHAUSTED",
        9 => "FAILED_PRECONDITION",
        10 => "ABORTED",
        11 => "OUT_OF_RANGE",
        12 => "UNIMPLEMENTED",
        13 => "INTERNAL",
        14 => "UNAVAILABLE",
        15 => "DATA_LOSS",
        16 => "UNAUTHENTICATED",
        _ => "UNKNOWN",
    }
}

/// A failed P4Runtime call to one switch.
#[derive(Debug, Error)]
#[error("{target}: {operation} failed ({source})")]
pub struct RpcError {
    pub target: String,
    pub operation: Operation,
    #[source]
    pub source: grpcio::Error,
}

impl RpcError {
    pub fn new(target: &str, operation: Operation, source: grpcio::Error) -> Self {
        RpcError {
            target: target.to_string(),
            operation,
            source,
        }
    }

    /// The canonical status code the server replied with, if the call got that far.
    pub fn code(&self) -> Option<i32> {
        match &self.source {
            grpcio::Error::RpcFailure(status) => Some(status.code().into()),
            _ => None,
        }
    }

    /// The per-update `p4.v1.Error`s that a P4Runtime server packs into the status details of
    /// a failed `Write`, paired with the index of the update they refer to.  Entries whose
    /// code is OK are left out.
    pub fn batch_errors(&self) -> Vec<(usize, p4runtime::Error)> {
        let details = match &self.source {
            grpcio::Error::RpcFailure(status) if !status.details().is_empty() => status.details(),
            _ => return Vec::new(),
        };
        let status: Status = match Message::parse_from_bytes(details) {
            Ok(status) => status,
            Err(_) => return Vec::new(),
        };
        status
            .get_details()
            .iter()
            .enumerate()
            .filter_map(|(index, any)| match any.unpack::<p4runtime::Error>() {
                Ok(Some(error)) if error.canonical_code != 0 => Some((index, error)),
                _ => None,
            })
            .collect()
    }

    /// Renders the failure for an operator: status, code name and the call that failed,
    /// followed by the decoded per-update errors of a batch.
    pub fn diagnostic(&self) -> String {
        let mut s = match &self.source {
            grpcio::Error::RpcFailure(status) => format!(
                "gRPC Error: {} ({}) [{}: {}]",
                status.message(),
                code_name(status.code().into()),
                self.target,
                self.operation
            ),
            other => format!("gRPC Error: {} [{}: {}]", other, self.target, self.operation),
        };
        let errors = self.batch_errors();
        if !errors.is_empty() {
            s.push_str("\nErrors in batch:");
            for (index, error) in errors {
                // Writing to a String cannot fail.
                let _ = write!(
                    s,
                    "\n\t* At index {}: {}, '{}'",
                    index,
                    code_name(error.canonical_code),
                    error.message
                );
            }
        }
        s
    }
}

#[derive(Debug, Error)]
pub enum P4Error {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: could not parse P4Info ({message})", .path.display())]
    ParseP4Info { path: PathBuf, message: String },

    #[error("table {table} refers to action id {id}, which is not in P4Info")]
    UnknownActionId { table: String, id: u32 },

    #[error("no table named {0:?} in P4Info")]
    UnknownTable(String),

    #[error("no action named {0:?} in P4Info")]
    UnknownAction(String),

    #[error("table {table} has no action {action:?}")]
    ActionNotInTable { table: String, action: String },

    #[error("action {action} may not be used {} in table {table}", if *.default_action { "as the default action" } else { "in an entry" })]
    ActionScope {
        table: String,
        action: String,
        default_action: bool,
    },

    #[error("table {table} has no match field {field:?}")]
    UnknownMatchField { table: String, field: String },

    #[error("match field {field} is a {expected}-match, not {requested}")]
    MatchKindMismatch {
        field: String,
        expected: MatchType,
        requested: MatchType,
    },

    #[error("prefix length {prefix_len} is out of range for {bit_width}-bit field {field}")]
    InvalidPrefixLength {
        field: String,
        prefix_len: i32,
        bit_width: i32,
    },

    #[error("default action for table {table} cannot carry match fields")]
    DefaultActionWithMatch { table: String },

    #[error("action {action} has no parameter {param:?}")]
    UnknownActionParam { action: String, param: String },

    #[error("action {action} requires parameter {param}")]
    MissingActionParam { action: String, param: String },

    #[error("value {value} does not fit in {bit_width} bits")]
    ValueTooWide { value: String, bit_width: i32 },

    #[error("{0:?} is not an integer, IPv4 address or MAC address")]
    InvalidValue(String),

    #[error("{target}: not the primary controller ({}: {message})", code_name(*.code))]
    NotPrimary {
        target: String,
        code: i32,
        message: String,
    },

    #[error("{target}: stream channel closed before master arbitration completed")]
    StreamClosed { target: String },

    #[error("{target}: stream error during master arbitration ({}: {message})", code_name(*.code))]
    StreamError {
        target: String,
        code: i32,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use grpcio::{RpcStatus, RpcStatusCode};
    use protobuf::well_known_types::Any;

    fn p4_error(code: i32, message: &str) -> Any {
        let mut error = p4runtime::Error::new();
        error.set_canonical_code(code);
        error.set_message(message.into());
        Any::pack(&error).unwrap()
    }

    fn failed_write(details: Vec<Any>) -> RpcError {
        let mut status = Status::new();
        status.set_code(2);
        status.set_message("Write failure.".into());
        status.set_details(details.into());
        let details = status.write_to_bytes().unwrap();
        let source = grpcio::Error::RpcFailure(RpcStatus::with_details(
            RpcStatusCode::UNKNOWN,
            "Write failure.".to_string(),
            details,
        ));
        RpcError::new("s1", Operation::Write, source)
    }

    #[test]
    fn diagnostic_lists_failed_updates() {
        let e = failed_write(vec![
            p4_error(0, ""),
            p4_error(6, "Match entry exists, use MODIFY if you wish to change action"),
        ]);
        assert_eq!(e.code(), Some(2));
        assert_eq!(
            e.diagnostic(),
            "gRPC Error: Write failure. (UNKNOWN) [s1: Write]\n\
             Errors in batch:\n\
             \t* At index 1: ALREADY_EXISTS, 'Match entry exists, use MODIFY if you wish to change action'"
        );
    }

    #[test]
    fn diagnostic_without_details() {
        let source = grpcio::Error::RpcFailure(RpcStatus::with_message(
            RpcStatusCode::UNAVAILABLE,
            "failed to connect to all addresses".to_string(),
        ));
        let e = RpcError::new("s2", Operation::SetForwardingPipelineConfig, source);
        assert_eq!(
            e.diagnostic(),
            "gRPC Error: failed to connect to all addresses (UNAVAILABLE) [s2: SetForwardingPipelineConfig]"
        );
        assert!(e.batch_errors().is_empty());
    }

    #[test]
    fn code_names() {
        assert_eq!(code_name(0), "OK");
        assert_eq!(code_name(5), "NOT_FOUND");
        assert_eq!(code_name(16), "UNAUTHENTICATED");
        assert_eq!(code_name(42), "UNKNOWN");
    }

    #[test]
    fn operation_methods() {
        assert_eq!(Operation::Write.method(), "/p4.v1.P4Runtime/Write");
        assert_eq!(
            Operation::MasterArbitrationUpdate.method(),
            "/p4.v1.P4Runtime/StreamChannel"
        );
    }
}
