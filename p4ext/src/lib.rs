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

//! P4Runtime client helpers: a typed view of P4Info, match and action value encoding, table
//! entry construction, and switch connections for BMv2 targets.

mod entry;
mod error;
mod helper;
mod switch;
mod value;

pub use entry::{Match, TableEntryRequest};
pub use error::{code_name, Operation, P4Error, RpcError};
pub use helper::P4InfoHelper;
pub use switch::{Bmv2SwitchConnection, PipelineConfig, RequestLog, SwitchConnection, ELECTION_ID};
pub use value::{decode_value, MacAddr, Value};

use proto::p4info;

use std::collections::HashMap;
use std::fmt::{self, Display};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Preamble {
    pub id: u32,
    pub name: String,
    pub alias: String,
    pub annotations: Vec<String>,
}

impl Preamble {
    /// Returns true if `name` is this object's fully qualified name or its alias.
    pub fn is_named(&self, name: &str) -> bool {
        self.name == name || (!self.alias.is_empty() && self.alias == name)
    }
}

impl From<&p4info::Preamble> for Preamble {
    fn from(p: &p4info::Preamble) -> Self {
        Preamble {
            id: p.id,
            name: p.name.clone(),
            alias: p.alias.clone(),
            annotations: p.get_annotations().to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchType {
    Unspecified,
    Exact,
    Lpm,
    Ternary,
    Range,
    Optional,
    Other(String),
}

impl Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MatchType::*;
        let s = match self {
            Unspecified => "unspecified",
            Exact => "exact",
            Lpm => "LPM",
            Ternary => "ternary",
            Range => "range",
            Optional => "optional",
            Other(s) => s,
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchField {
    // The protobuf representation of MatchField doesn't include a
    // Preamble but it includes everything in the preamble except
    // 'alias'.  It seems more uniform to just use Preamble here.
    pub preamble: Preamble,
    pub bit_width: i32,
    pub match_type: MatchType,
}

impl From<&p4info::MatchField> for MatchField {
    fn from(mf: &p4info::MatchField) -> Self {
        use p4info::MatchField_MatchType::*;
        MatchField {
            preamble: Preamble {
                id: mf.id,
                name: mf.name.clone(),
                alias: String::new(),
                annotations: mf.get_annotations().to_vec(),
            },
            bit_width: mf.bitwidth,
            match_type: match mf.get_match_type() {
                EXACT => MatchType::Exact,
                LPM => MatchType::Lpm,
                TERNARY => MatchType::Ternary,
                RANGE => MatchType::Range,
                OPTIONAL => MatchType::Optional,
                UNSPECIFIED => {
                    if mf.has_other_match_type() {
                        MatchType::Other(mf.get_other_match_type().into())
                    } else {
                        MatchType::Unspecified
                    }
                }
            },
        }
    }
}

impl Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field {}: bit<{}> {}-match",
            self.preamble.name, self.bit_width, self.match_type
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Param {
    pub preamble: Preamble,
    pub bit_width: i32,
}

impl From<&p4info::Action_Param> for Param {
    fn from(ap: &p4info::Action_Param) -> Self {
        Param {
            preamble: Preamble {
                id: ap.id,
                name: ap.name.clone(),
                alias: String::new(),
                annotations: ap.get_annotations().to_vec(),
            },
            bit_width: ap.bitwidth,
        }
    }
}

impl Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: bit<{}>", self.preamble.name, self.bit_width)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Action {
    pub preamble: Preamble,
    pub params: Vec<Param>,
}

impl From<&p4info::Action> for Action {
    fn from(a: &p4info::Action) -> Self {
        Action {
            preamble: a.get_preamble().into(),
            params: a.get_params().iter().map(|x| x.into()).collect(),
        }
    }
}

impl Action {
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.preamble.name == name)
    }

    pub fn param_by_id(&self, id: u32) -> Option<&Param> {
        self.params.iter().find(|p| p.preamble.id == id)
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action {}(", self.preamble.name)?;
        for (p_index, p) in self.params.iter().enumerate() {
            if p_index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ")")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionRef {
    pub action: Action,
    pub may_be_default: bool, // Allowed as the default action?
    pub may_be_entry: bool,   // Allowed as an entry's action?
}

impl ActionRef {
    fn new_from_proto(
        table: &str,
        ar: &p4info::ActionRef,
        actions: &HashMap<u32, Action>,
    ) -> Result<Self, P4Error> {
        let action = actions.get(&ar.id).ok_or_else(|| P4Error::UnknownActionId {
            table: table.to_string(),
            id: ar.id,
        })?;
        Ok(ActionRef {
            action: action.clone(),
            may_be_default: ar.scope != p4info::ActionRef_Scope::TABLE_ONLY,
            may_be_entry: ar.scope != p4info::ActionRef_Scope::DEFAULT_ONLY,
        })
    }
}

impl Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.may_be_entry {
            write!(f, "default-only ")?;
        } else if !self.may_be_default {
            write!(f, "not-default ")?;
        }
        write!(f, "{}", self.action)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    pub preamble: Preamble,
    pub match_fields: Vec<MatchField>,
    pub actions: Vec<ActionRef>,
    pub max_entries: Option<u64>,
    pub is_const_table: bool,
}

impl Table {
    fn new_from_proto(t: &p4info::Table, actions: &HashMap<u32, Action>) -> Result<Self, P4Error> {
        let preamble: Preamble = t.get_preamble().into();
        let actions = t
            .get_action_refs()
            .iter()
            .map(|x| ActionRef::new_from_proto(&preamble.name, x, actions))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Table {
            match_fields: t.get_match_fields().iter().map(|x| x.into()).collect(),
            actions,
            max_entries: if t.size > 0 {
                Some(t.size as u64)
            } else {
                None
            },
            is_const_table: t.is_const_table,
            preamble,
        })
    }

    pub fn match_field(&self, name: &str) -> Option<&MatchField> {
        self.match_fields.iter().find(|mf| mf.preamble.name == name)
    }

    pub fn match_field_by_id(&self, id: u32) -> Option<&MatchField> {
        self.match_fields.iter().find(|mf| mf.preamble.id == id)
    }

    /// Looks up one of this table's actions by fully qualified name or alias.
    pub fn action(&self, name: &str) -> Option<&ActionRef> {
        self.actions.iter().find(|ar| ar.action.preamble.is_named(name))
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table {}:", self.preamble.name)?;
        for mf in &self.match_fields {
            write!(f, "\t{}", mf)?;
        }
        for ar in &self.actions {
            write!(f, "\t{}", ar)?;
        }
        if let Some(max_entries) = self.max_entries {
            write!(f, "\tsize: {}", max_entries)?;
        }
        if self.is_const_table {
            write!(f, "\tconst table")?;
        }
        Ok(())
    }
}

/// Converts every table of `p4i`, resolving action references against its actions.
fn parse_tables(p4i: &p4info::P4Info) -> Result<(Vec<Table>, Vec<Action>), P4Error> {
    let actions: Vec<Action> = p4i.get_actions().iter().map(|x| x.into()).collect();
    let by_id: HashMap<u32, Action> = actions
        .iter()
        .map(|a| (a.preamble.id, a.clone()))
        .collect();
    let tables = p4i
        .get_tables()
        .iter()
        .map(|x| Table::new_from_proto(x, &by_id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((tables, actions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::p4info::{ActionRef_Scope, MatchField_MatchType};

    fn preamble(id: u32, name: &str, alias: &str) -> p4info::Preamble {
        let mut p = p4info::Preamble::new();
        p.set_id(id);
        p.set_name(name.into());
        p.set_alias(alias.into());
        p
    }

    #[test]
    fn table_resolves_action_refs() {
        let mut action = p4info::Action::new();
        action.set_preamble(preamble(16777217, "MyIngress.drop", "drop"));

        let mut mf = p4info::MatchField::new();
        mf.set_id(1);
        mf.set_name("hdr.ipv4.dstAddr".into());
        mf.set_bitwidth(32);
        mf.set_match_type(MatchField_MatchType::LPM);

        let mut ar = p4info::ActionRef::new();
        ar.set_id(16777217);
        ar.set_scope(ActionRef_Scope::DEFAULT_ONLY);

        let mut table = p4info::Table::new();
        table.set_preamble(preamble(33554433, "MyIngress.ipv4_lpm", "ipv4_lpm"));
        table.mut_match_fields().push(mf);
        table.mut_action_refs().push(ar);
        table.set_size(1024);

        let mut p4i = p4info::P4Info::new();
        p4i.mut_actions().push(action);
        p4i.mut_tables().push(table);

        let (tables, actions) = parse_tables(&p4i).unwrap();
        assert_eq!(actions.len(), 1);
        let t = &tables[0];
        assert_eq!(t.max_entries, Some(1024));
        assert_eq!(t.match_field("hdr.ipv4.dstAddr").unwrap().match_type, MatchType::Lpm);
        let drop = t.action("drop").unwrap();
        assert!(drop.may_be_default);
        assert!(!drop.may_be_entry);
        assert_eq!(
            t.to_string(),
            "table MyIngress.ipv4_lpm:\tfield hdr.ipv4.dstAddr: bit<32> LPM-match\
             \tdefault-only action MyIngress.drop()\tsize: 1024"
        );
    }

    #[test]
    fn dangling_action_ref_is_an_error() {
        let mut ar = p4info::ActionRef::new();
        ar.set_id(99);
        let mut table = p4info::Table::new();
        table.set_preamble(preamble(1, "t", "t"));
        table.mut_action_refs().push(ar);
        let mut p4i = p4info::P4Info::new();
        p4i.mut_tables().push(table);

        match parse_tables(&p4i) {
            Err(P4Error::UnknownActionId { table, id }) => {
                assert_eq!(table, "t");
                assert_eq!(id, 99);
            }
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }
}
