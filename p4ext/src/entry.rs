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

use crate::{MatchType, Value};

use itertools::Itertools;

use std::fmt::{self, Display};

/// How one match field of a table entry is matched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Match {
    Exact(Value),
    /// Value and prefix length in bits.
    Lpm(Value, i32),
    /// Value and mask.
    Ternary(Value, Value),
    /// Inclusive low and high bounds.
    Range(Value, Value),
    Optional(Value),
}

impl Match {
    /// The P4Info match type this match is valid for.
    pub fn kind(&self) -> MatchType {
        match self {
            Match::Exact(_) => MatchType::Exact,
            Match::Lpm(..) => MatchType::Lpm,
            Match::Ternary(..) => MatchType::Ternary,
            Match::Range(..) => MatchType::Range,
            Match::Optional(_) => MatchType::Optional,
        }
    }
}

impl Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Match::Exact(v) | Match::Optional(v) => write!(f, "{}", v),
            Match::Lpm(v, prefix_len) => write!(f, "{}/{}", v, prefix_len),
            Match::Ternary(v, mask) => write!(f, "{} &&& {}", v, mask),
            Match::Range(low, high) => write!(f, "{}..{}", low, high),
        }
    }
}

/// A table entry described by P4 names, to be resolved against P4Info by
/// [`P4InfoHelper::build_table_entry`](crate::P4InfoHelper::build_table_entry).
///
/// Requests are built by chaining the consuming `with_*` methods and do not change afterward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableEntryRequest {
    table_name: String,
    match_fields: Vec<(String, Match)>,
    action_name: String,
    action_params: Vec<(String, Value)>,
    default_action: bool,
    priority: i32,
}

impl TableEntryRequest {
    pub fn new(table_name: impl Into<String>, action_name: impl Into<String>) -> Self {
        TableEntryRequest {
            table_name: table_name.into(),
            match_fields: Vec::new(),
            action_name: action_name.into(),
            action_params: Vec::new(),
            default_action: false,
            priority: 0,
        }
    }

    /// A request that sets the default action of `table_name` rather than adding an entry.
    pub fn default_action(table_name: impl Into<String>, action_name: impl Into<String>) -> Self {
        TableEntryRequest {
            default_action: true,
            ..Self::new(table_name, action_name)
        }
    }

    pub fn with_match(mut self, field_name: impl Into<String>, m: Match) -> Self {
        self.match_fields.push((field_name.into(), m));
        self
    }

    pub fn with_param(mut self, param_name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.action_params.push((param_name.into(), value.into()));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn match_fields(&self) -> &[(String, Match)] {
        &self.match_fields
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    pub fn action_params(&self) -> &[(String, Value)] {
        &self.action_params
    }

    pub fn is_default_action(&self) -> bool {
        self.default_action
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

impl Display for TableEntryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table_name)?;
        if self.default_action {
            write!(f, " (default)")?;
        } else {
            write!(
                f,
                "({})",
                self.match_fields
                    .iter()
                    .format_with(", ", |(name, m), f| f(&format_args!("{}={}", name, m)))
            )?;
        }
        write!(
            f,
            " -> {}({})",
            self.action_name,
            self.action_params
                .iter()
                .format_with(", ", |(name, v), f| f(&format_args!("{}={}", name, v)))
        )?;
        if self.priority != 0 {
            write!(f, " priority {}", self.priority)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MacAddr;
    use std::net::Ipv4Addr;

    #[test]
    fn builder_keeps_order_and_displays() {
        let request = TableEntryRequest::new("MyIngress.ecmp_nhop", "MyIngress.set_nhop")
            .with_match("meta.ecmp_select", Match::Exact(0u32.into()))
            .with_param("nhop_dmac", MacAddr([0, 0, 0, 0, 1, 2]))
            .with_param("nhop_ipv4", Ipv4Addr::new(10, 0, 2, 2))
            .with_param("port", 2u32);

        assert!(!request.is_default_action());
        assert_eq!(request.priority(), 0);
        let names: Vec<&str> = request.action_params().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["nhop_dmac", "nhop_ipv4", "port"]);
        assert_eq!(
            request.to_string(),
            "MyIngress.ecmp_nhop(meta.ecmp_select=0) -> \
             MyIngress.set_nhop(nhop_dmac=00:00:00:00:01:02, nhop_ipv4=10.0.2.2, port=2)"
        );
    }

    #[test]
    fn default_action_request() {
        let request = TableEntryRequest::default_action("MyIngress.ipv4_lpm", "MyIngress.drop")
            .with_priority(10);
        assert!(request.is_default_action());
        assert!(request.match_fields().is_empty());
        assert_eq!(request.to_string(), "MyIngress.ipv4_lpm (default) -> MyIngress.drop() priority 10");
    }

    #[test]
    fn match_kinds() {
        assert_eq!(Match::Lpm(Ipv4Addr::new(10, 0, 0, 0).into(), 8).kind(), MatchType::Lpm);
        assert_eq!(Match::Ternary(1u8.into(), 3u8.into()).to_string(), "1 &&& 3");
        assert_eq!(Match::Range(1u8.into(), 9u8.into()).kind(), MatchType::Range);
    }
}
