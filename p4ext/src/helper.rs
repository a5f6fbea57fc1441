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

use crate::{
    decode_value, parse_tables, Action, ActionRef, Match, MatchField, MatchType, P4Error, Table,
    TableEntryRequest, Value,
};

use itertools::Itertools;

use proto::p4info::P4Info;
use proto::p4runtime::{
    Action as RuntimeAction,
    Action_Param,
    FieldMatch,
    FieldMatch_Exact,
    FieldMatch_LPM,
    FieldMatch_Optional,
    FieldMatch_Range,
    FieldMatch_Ternary,
    FieldMatch_oneof_field_match_type,
    TableAction,
    TableEntry,
};

use protobuf::{Message, RepeatedField};

use std::convert::TryFrom;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use tracing::debug;

/// Name-based access to a P4 program's tables and actions, as described by its P4Info.
#[derive(Clone, Debug)]
pub struct P4InfoHelper {
    p4info: P4Info,
    tables: Vec<Table>,
    actions: Vec<Action>,
}

impl P4InfoHelper {
    /// Reads P4Info from `path`: text format if the file name ends in `.txt`, binary protobuf
    /// otherwise.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, P4Error> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| P4Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| P4Error::ParseP4Info {
            path: path.to_path_buf(),
            message,
        };
        let p4info: P4Info = if path.extension() == Some(OsStr::new("txt")) {
            let text = String::from_utf8(bytes).map_err(|e| parse_error(e.to_string()))?;
            protobuf::text_format::parse_from_str(&strip_comments(&text))
                .map_err(|e| parse_error(e.to_string()))?
        } else {
            Message::parse_from_bytes(&bytes).map_err(|e| parse_error(e.to_string()))?
        };
        let helper = Self::try_from(&p4info)?;
        debug!(
            "{}: {} tables, {} actions",
            path.display(),
            helper.tables.len(),
            helper.actions.len()
        );
        Ok(helper)
    }

    pub fn p4info(&self) -> &P4Info {
        &self.p4info
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Looks up a table by fully qualified name or alias.
    pub fn table(&self, name: &str) -> Result<&Table, P4Error> {
        self.tables
            .iter()
            .find(|t| t.preamble.is_named(name))
            .ok_or_else(|| P4Error::UnknownTable(name.to_string()))
    }

    pub fn table_by_id(&self, id: u32) -> Option<&Table> {
        self.tables.iter().find(|t| t.preamble.id == id)
    }

    /// Looks up an action by fully qualified name or alias.
    pub fn action(&self, name: &str) -> Result<&Action, P4Error> {
        self.actions
            .iter()
            .find(|a| a.preamble.is_named(name))
            .ok_or_else(|| P4Error::UnknownAction(name.to_string()))
    }

    pub fn action_by_id(&self, id: u32) -> Option<&Action> {
        self.actions.iter().find(|a| a.preamble.id == id)
    }

    /// Resolves `request` against P4Info into the `TableEntry` P4Runtime expects.
    pub fn build_table_entry(&self, request: &TableEntryRequest) -> Result<TableEntry, P4Error> {
        let table = self.table(request.table_name())?;
        let table_name = &table.preamble.name;

        if request.is_default_action() && !request.match_fields().is_empty() {
            return Err(P4Error::DefaultActionWithMatch {
                table: table_name.clone(),
            });
        }

        let mut field_matches = RepeatedField::<FieldMatch>::new();
        for (name, m) in request.match_fields() {
            let field = table
                .match_field(name)
                .ok_or_else(|| P4Error::UnknownMatchField {
                    table: table_name.clone(),
                    field: name.clone(),
                })?;
            if let Some(field_match) = field_match(field, m)? {
                field_matches.push(field_match);
            }
        }

        let action_ref = self.action_ref(table, request)?;
        let mut table_action = TableAction::new();
        table_action.set_action(runtime_action(&action_ref.action, request.action_params())?);

        let mut table_entry = TableEntry::new();
        table_entry.set_table_id(table.preamble.id);
        table_entry.set_field_match(field_matches);
        table_entry.set_action(table_action);
        if request.priority() != 0 {
            table_entry.set_priority(request.priority());
        }
        if request.is_default_action() {
            table_entry.set_is_default_action(true);
        }
        Ok(table_entry)
    }

    fn action_ref<'a>(
        &self,
        table: &'a Table,
        request: &TableEntryRequest,
    ) -> Result<&'a ActionRef, P4Error> {
        let name = request.action_name();
        let action_ref = match table.action(name) {
            Some(action_ref) => action_ref,
            None => {
                // Distinguish a typo from an action that exists but is not bound to this table.
                self.action(name)?;
                return Err(P4Error::ActionNotInTable {
                    table: table.preamble.name.clone(),
                    action: name.to_string(),
                });
            }
        };
        let allowed = if request.is_default_action() {
            action_ref.may_be_default
        } else {
            action_ref.may_be_entry
        };
        if !allowed {
            return Err(P4Error::ActionScope {
                table: table.preamble.name.clone(),
                action: action_ref.action.preamble.name.clone(),
                default_action: request.is_default_action(),
            });
        }
        Ok(action_ref)
    }

    /// Renders an entry read back from a switch with P4 names, for example
    /// `MyIngress.ipv4_lpm: hdr.ipv4.dstAddr=10.0.2.0/24 -> MyIngress.ipv4_forward(dstAddr=08:00:00:00:02:00, port=3)`.
    /// Ids that P4Info does not know are shown as numbers.
    pub fn format_table_entry(&self, entry: &TableEntry) -> String {
        let table = self.table_by_id(entry.table_id);
        let table_name = table
            .map(|t| t.preamble.name.clone())
            .unwrap_or_else(|| entry.table_id.to_string());

        let matches = if entry.is_default_action {
            "(default)".to_string()
        } else if entry.get_field_match().is_empty() {
            "*".to_string()
        } else {
            entry
                .get_field_match()
                .iter()
                .map(|fm| {
                    let field = table.and_then(|t| t.match_field_by_id(fm.field_id));
                    format_field_match(fm, field)
                })
                .join(", ")
        };

        let runtime_action = entry.get_action().get_action();
        let action = self.action_by_id(runtime_action.action_id);
        let action_name = action
            .map(|a| a.preamble.name.clone())
            .unwrap_or_else(|| runtime_action.action_id.to_string());
        let params = runtime_action
            .get_params()
            .iter()
            .map(|p| match action.and_then(|a| a.param_by_id(p.param_id)) {
                Some(param) => format!(
                    "{}={}",
                    param.preamble.name,
                    decode_value(p.get_value(), param.bit_width)
                ),
                None => format!("{}={}", p.param_id, Value::Bytes(p.get_value().to_vec())),
            })
            .join(", ");

        let mut s = format!("{}: {} -> {}({})", table_name, matches, action_name, params);
        if entry.priority != 0 {
            s.push_str(&format!(" priority {}", entry.priority));
        }
        s
    }
}

impl TryFrom<&P4Info> for P4InfoHelper {
    type Error = P4Error;

    fn try_from(p4info: &P4Info) -> Result<Self, Self::Error> {
        let (tables, actions) = parse_tables(p4info)?;
        Ok(P4InfoHelper {
            p4info: p4info.clone(),
            tables,
            actions,
        })
    }
}

/// Drops `#` comment lines, which p4c puts at the top of text-format P4Info.
fn strip_comments(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .join("\n")
}

/// Builds the P4Runtime match for `field`.  Returns `None` for a zero-length LPM prefix,
/// which P4Runtime expresses by leaving the field out.
fn field_match(field: &MatchField, m: &Match) -> Result<Option<FieldMatch>, P4Error> {
    if m.kind() != field.match_type {
        return Err(P4Error::MatchKindMismatch {
            field: field.preamble.name.clone(),
            expected: field.match_type.clone(),
            requested: m.kind(),
        });
    }
    let bit_width = field.bit_width;
    let mut field_match = FieldMatch::new();
    field_match.set_field_id(field.preamble.id);
    match m {
        Match::Exact(v) => {
            let mut exact_match = FieldMatch_Exact::new();
            exact_match.set_value(v.encode(bit_width)?);
            field_match.set_exact(exact_match);
        }
        Match::Lpm(v, prefix_len) => {
            if *prefix_len < 0 || *prefix_len > bit_width {
                return Err(P4Error::InvalidPrefixLength {
                    field: field.preamble.name.clone(),
                    prefix_len: *prefix_len,
                    bit_width,
                });
            }
            if *prefix_len == 0 {
                return Ok(None);
            }
            let mut lpm_match = FieldMatch_LPM::new();
            lpm_match.set_value(mask_prefix(v.encode(bit_width)?, *prefix_len, bit_width));
            lpm_match.set_prefix_len(*prefix_len);
            field_match.set_lpm(lpm_match);
        }
        Match::Ternary(v, mask) => {
            let mask = mask.encode(bit_width)?;
            let value = v
                .encode(bit_width)?
                .iter()
                .zip(&mask)
                .map(|(v, m)| v & m)
                .collect();
            let mut ternary_match = FieldMatch_Ternary::new();
            ternary_match.set_value(value);
            ternary_match.set_mask(mask);
            field_match.set_ternary(ternary_match);
        }
        Match::Range(low, high) => {
            let mut range_match = FieldMatch_Range::new();
            range_match.set_low(low.encode(bit_width)?);
            range_match.set_high(high.encode(bit_width)?);
            field_match.set_range(range_match);
        }
        Match::Optional(v) => {
            let mut optional_match = FieldMatch_Optional::new();
            optional_match.set_value(v.encode(bit_width)?);
            field_match.set_optional(optional_match);
        }
    }
    Ok(Some(field_match))
}

/// Clears the bits of `value` past the first `prefix_len` bits of a `bit_width`-bit field.
fn mask_prefix(mut value: Vec<u8>, prefix_len: i32, bit_width: i32) -> Vec<u8> {
    // The field occupies the low `bit_width` bits of the byte string.
    let keep = value.len() * 8 - bit_width as usize + prefix_len as usize;
    for (i, byte) in value.iter_mut().enumerate() {
        let start = i * 8;
        if start + 8 <= keep {
            continue;
        } else if start >= keep {
            *byte = 0;
        } else {
            *byte &= 0xffu8 << (8 - (keep - start));
        }
    }
    value
}

/// Builds the P4Runtime action, with parameters in the order P4Info declares them.
fn runtime_action(action: &Action, params: &[(String, Value)]) -> Result<RuntimeAction, P4Error> {
    let action_name = &action.preamble.name;
    if let Some((name, _)) = params.iter().find(|(name, _)| action.param(name).is_none()) {
        return Err(P4Error::UnknownActionParam {
            action: action_name.clone(),
            param: name.clone(),
        });
    }

    let mut runtime_params = Vec::with_capacity(action.params.len());
    for param in &action.params {
        let value = params
            .iter()
            .find(|(name, _)| *name == param.preamble.name)
            .map(|(_, value)| value)
            .ok_or_else(|| P4Error::MissingActionParam {
                action: action_name.clone(),
                param: param.preamble.name.clone(),
            })?;
        let mut runtime_param = Action_Param::new();
        runtime_param.set_param_id(param.preamble.id);
        runtime_param.set_value(value.encode(param.bit_width)?);
        runtime_params.push(runtime_param);
    }

    let mut runtime_action = RuntimeAction::new();
    runtime_action.set_action_id(action.preamble.id);
    runtime_action.set_params(RepeatedField::from_vec(runtime_params));
    Ok(runtime_action)
}

fn format_field_match(fm: &FieldMatch, field: Option<&MatchField>) -> String {
    let (name, bit_width) = match field {
        Some(f) => (f.preamble.name.clone(), f.bit_width),
        None => (fm.field_id.to_string(), 0),
    };
    let decode = |bytes: &[u8]| {
        if field.is_some() {
            decode_value(bytes, bit_width)
        } else {
            Value::Bytes(bytes.to_vec())
        }
    };
    use FieldMatch_oneof_field_match_type::*;
    let m = match &fm.field_match_type {
        Some(exact(e)) => Match::Exact(decode(e.get_value())),
        Some(lpm(l)) => Match::Lpm(decode(l.get_value()), l.prefix_len),
        Some(ternary(t)) => Match::Ternary(decode(t.get_value()), decode(t.get_mask())),
        Some(range(r)) => Match::Range(decode(r.get_low()), decode(r.get_high())),
        Some(optional(o)) => Match::Optional(decode(o.get_value())),
        Some(other(_)) | None => return format!("{}=?", name),
    };
    format!("{}={}", name, m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MacAddr;
    use std::io::Write;
    use std::net::Ipv4Addr;

    const P4INFO: &str = r#"# proto-file: p4/config/v1/p4info.proto
# proto-message: p4.config.v1.P4Info

pkg_info {
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
  action_refs {
    id: 25652968
  }
  size: 1024
}
tables {
  preamble {
    id: 40000001
    name: "MyIngress.acl"
    alias: "acl"
  }
  match_fields {
    id: 1
    name: "hdr.ethernet.etherType"
    bitwidth: 16
    match_type: TERNARY
  }
  match_fields {
    id: 2
    name: "standard_metadata.ingress_port"
    bitwidth: 9
    match_type: EXACT
  }
  action_refs {
    id: 25652968
  }
  size: 64
}
actions {
  preamble {
    id: 25652968
    name: "MyIngress.drop"
    alias: "drop"
  }
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

    fn helper() -> P4InfoHelper {
        let p4info: P4Info = protobuf::text_format::parse_from_str(&strip_comments(P4INFO)).unwrap();
        P4InfoHelper::try_from(&p4info).unwrap()
    }

    fn forward(dst: Ipv4Addr, prefix_len: i32) -> TableEntryRequest {
        TableEntryRequest::new("MyIngress.ipv4_lpm", "MyIngress.ipv4_forward")
            .with_match("hdr.ipv4.dstAddr", Match::Lpm(dst.into(), prefix_len))
            .with_param("dstAddr", MacAddr([8, 0, 0, 0, 2, 0]))
            .with_param("port", 3u32)
    }

    #[test]
    fn lookups_by_name_alias_and_id() {
        let helper = helper();
        assert_eq!(helper.table("ipv4_lpm").unwrap().preamble.id, 37375156);
        assert_eq!(helper.table("MyIngress.ipv4_lpm").unwrap().preamble.id, 37375156);
        assert_eq!(helper.action("drop").unwrap().preamble.name, "MyIngress.drop");
        assert_eq!(helper.table_by_id(40000001).unwrap().preamble.name, "MyIngress.acl");
        assert!(helper.action_by_id(7).is_none());
        assert!(matches!(helper.table("nope"), Err(P4Error::UnknownTable(_))));
    }

    #[test]
    fn builds_lpm_entry() {
        let entry = helper()
            .build_table_entry(&forward(Ipv4Addr::new(10, 0, 2, 0), 24))
            .unwrap();
        assert_eq!(entry.table_id, 37375156);
        assert_eq!(entry.priority, 0);
        let fm = &entry.get_field_match()[0];
        assert_eq!(fm.field_id, 1);
        assert_eq!(fm.get_lpm().get_value(), &[10, 0, 2, 0]);
        assert_eq!(fm.get_lpm().prefix_len, 24);
        let action = entry.get_action().get_action();
        assert_eq!(action.action_id, 28792405);
        let params: Vec<(u32, Vec<u8>)> = action
            .get_params()
            .iter()
            .map(|p| (p.param_id, p.get_value().to_vec()))
            .collect();
        assert_eq!(params, vec![(1, vec![8, 0, 0, 0, 2, 0]), (2, vec![0, 3])]);
    }

    #[test]
    fn lpm_value_is_masked_and_zero_prefix_omitted() {
        let helper = helper();
        let entry = helper
            .build_table_entry(&forward(Ipv4Addr::new(10, 0, 2, 77), 20))
            .unwrap();
        assert_eq!(entry.get_field_match()[0].get_lpm().get_value(), &[10, 0, 0, 0]);

        let entry = helper
            .build_table_entry(&forward(Ipv4Addr::new(10, 0, 2, 77), 0))
            .unwrap();
        assert!(entry.get_field_match().is_empty());

        assert!(matches!(
            helper.build_table_entry(&forward(Ipv4Addr::new(10, 0, 2, 77), 33)),
            Err(P4Error::InvalidPrefixLength { prefix_len: 33, bit_width: 32, .. })
        ));
    }

    #[test]
    fn mask_prefix_respects_field_width() {
        // 9-bit field in two bytes: the first 7 bits are padding.
        assert_eq!(mask_prefix(vec![0x01, 0xff], 1, 9), vec![0x01, 0x00]);
        assert_eq!(mask_prefix(vec![0x01, 0xff], 5, 9), vec![0x01, 0xf0]);
        assert_eq!(mask_prefix(vec![0xff, 0xff, 0xff, 0xff], 32, 32), vec![0xff; 4]);
    }

    #[test]
    fn ternary_and_priority() {
        let request = TableEntryRequest::new("acl", "drop")
            .with_match("hdr.ethernet.etherType", Match::Ternary(0x0806u32.into(), 0xff00u32.into()))
            .with_match("standard_metadata.ingress_port", Match::Exact(1u32.into()))
            .with_priority(7);
        let entry = helper().build_table_entry(&request).unwrap();
        assert_eq!(entry.priority, 7);
        let ternary = entry.get_field_match()[0].get_ternary();
        assert_eq!(ternary.get_value(), &[0x08, 0x00]);
        assert_eq!(ternary.get_mask(), &[0xff, 0x00]);
        assert_eq!(entry.get_field_match()[1].get_exact().get_value(), &[0, 1]);
    }

    #[test]
    fn rejects_bad_requests() {
        let helper = helper();

        let r = TableEntryRequest::new("ipv4_lpm", "ipv4_forward")
            .with_match("hdr.ipv4.srcAddr", Match::Lpm(Ipv4Addr::new(10, 0, 0, 0).into(), 8));
        assert!(matches!(helper.build_table_entry(&r), Err(P4Error::UnknownMatchField { .. })));

        let r = TableEntryRequest::new("ipv4_lpm", "ipv4_forward")
            .with_match("hdr.ipv4.dstAddr", Match::Exact(Ipv4Addr::new(10, 0, 0, 1).into()));
        assert!(matches!(helper.build_table_entry(&r), Err(P4Error::MatchKindMismatch { .. })));

        let r = forward(Ipv4Addr::new(10, 0, 0, 1), 32).with_param("ttl", 1u32);
        assert!(matches!(helper.build_table_entry(&r), Err(P4Error::UnknownActionParam { .. })));

        let r = TableEntryRequest::new("ipv4_lpm", "ipv4_forward")
            .with_match("hdr.ipv4.dstAddr", Match::Lpm(Ipv4Addr::new(10, 0, 0, 1).into(), 32))
            .with_param("port", 1u32);
        match helper.build_table_entry(&r) {
            Err(P4Error::MissingActionParam { param, .. }) => assert_eq!(param, "dstAddr"),
            other => panic!("unexpected result {:?}", other),
        }

        let r = TableEntryRequest::new("ipv4_lpm", "MyIngress.set_ecmp_select");
        assert!(matches!(helper.build_table_entry(&r), Err(P4Error::UnknownAction(_))));

        let r = TableEntryRequest::new("acl", "ipv4_forward");
        assert!(matches!(helper.build_table_entry(&r), Err(P4Error::ActionNotInTable { .. })));

        let r = TableEntryRequest::default_action("ipv4_lpm", "drop")
            .with_match("hdr.ipv4.dstAddr", Match::Lpm(Ipv4Addr::new(10, 0, 0, 1).into(), 32));
        assert!(matches!(helper.build_table_entry(&r), Err(P4Error::DefaultActionWithMatch { .. })));

        let r = TableEntryRequest::new("ipv4_lpm", "ipv4_forward")
            .with_match("hdr.ipv4.dstAddr", Match::Lpm(Ipv4Addr::new(10, 0, 0, 1).into(), 32))
            .with_param("dstAddr", MacAddr::default())
            .with_param("port", 512u32);
        assert!(matches!(helper.build_table_entry(&r), Err(P4Error::ValueTooWide { bit_width: 9, .. })));
    }

    #[test]
    fn default_action_entry() {
        let entry = helper()
            .build_table_entry(&TableEntryRequest::default_action("ipv4_lpm", "drop"))
            .unwrap();
        assert!(entry.is_default_action);
        assert!(entry.get_field_match().is_empty());
        assert_eq!(
            helper().format_table_entry(&entry),
            "MyIngress.ipv4_lpm: (default) -> MyIngress.drop()"
        );
    }

    #[test]
    fn formats_entries_with_names() {
        let helper = helper();
        let entry = helper
            .build_table_entry(&forward(Ipv4Addr::new(10, 0, 2, 0), 24))
            .unwrap();
        assert_eq!(
            helper.format_table_entry(&entry),
            "MyIngress.ipv4_lpm: hdr.ipv4.dstAddr=10.0.2.0/24 -> \
             MyIngress.ipv4_forward(dstAddr=08:00:00:00:02:00, port=3)"
        );

        let mut unknown = entry.clone();
        unknown.set_table_id(5);
        assert!(helper.format_table_entry(&unknown).starts_with("5: 1=0x0a000200/24 -> "));
    }

    #[test]
    fn loads_text_and_binary_p4info() {
        let dir = tempfile::tempdir().unwrap();

        let text_path = dir.path().join("prog.p4.p4info.txt");
        std::fs::File::create(&text_path)
            .unwrap()
            .write_all(P4INFO.as_bytes())
            .unwrap();
        let from_text = P4InfoHelper::load(&text_path).unwrap();
        assert_eq!(from_text.tables().len(), 2);

        let bin_path = dir.path().join("prog.p4info.bin");
        std::fs::write(&bin_path, from_text.p4info().write_to_bytes().unwrap()).unwrap();
        let from_bin = P4InfoHelper::load(&bin_path).unwrap();
        assert_eq!(from_bin.p4info(), from_text.p4info());

        let garbage = dir.path().join("garbage.txt");
        std::fs::write(&garbage, "tables { preamble { id: }").unwrap();
        assert!(matches!(P4InfoHelper::load(&garbage), Err(P4Error::ParseP4Info { .. })));

        assert!(matches!(
            P4InfoHelper::load(dir.path().join("missing.txt")),
            Err(P4Error::Io { .. })
        ));
    }
}
