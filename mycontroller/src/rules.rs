/*
Copyright (c) 2022 VMware, Inc.
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

//! The flow rules each controller installs, per switch.

use p4ext::{MacAddr, Match, TableEntryRequest};
use std::net::Ipv4Addr;

/// Which program's rules to install.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleSet {
    /// ECMP: hash flows to `10.0.0.1` over next hops, then rewrite source MACs on egress.
    LoadBalance,
    /// Longest-prefix-match IPv4 forwarding.
    Qos,
}

impl RuleSet {
    /// The entries for switch `switch`, in the order they are written.  Unknown switches get
    /// no entries.
    pub fn entries(&self, switch: &str) -> Vec<TableEntryRequest> {
        match self {
            RuleSet::LoadBalance => load_balance_entries(switch),
            RuleSet::Qos => qos_entries(switch),
        }
    }

    /// What to print after writing one entry to `switch`, if anything.
    pub fn confirmation(&self, switch: &str) -> Option<String> {
        match self {
            RuleSet::LoadBalance => None,
            RuleSet::Qos => Some(format!("Installed Forward rule on {switch}")),
        }
    }
}

fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
    Ipv4Addr::new(a, b, c, d)
}

fn mac(octets: [u8; 6]) -> MacAddr {
    MacAddr(octets)
}

fn ecmp_group(dst_addr: Ipv4Addr, prefix_len: i32, ecmp_base: u32, ecmp_count: u32) -> TableEntryRequest {
    TableEntryRequest::new("MyIngress.ecmp_group", "MyIngress.set_ecmp_select")
        .with_match("hdr.ipv4.dstAddr", Match::Lpm(dst_addr.into(), prefix_len))
        .with_param("ecmp_base", ecmp_base)
        .with_param("ecmp_count", ecmp_count)
}

fn ecmp_nhop(ecmp_select: u32, nhop_dmac: MacAddr, nhop_ipv4: Ipv4Addr, port: u32) -> TableEntryRequest {
    TableEntryRequest::new("MyIngress.ecmp_nhop", "MyIngress.set_nhop")
        .with_match("meta.ecmp_select", Match::Exact(ecmp_select.into()))
        .with_param("nhop_dmac", nhop_dmac)
        .with_param("nhop_ipv4", nhop_ipv4)
        .with_param("port", port)
}

fn send_frame(egress_port: u32, smac: MacAddr) -> TableEntryRequest {
    TableEntryRequest::new("MyEgress.send_frame", "MyEgress.rewrite_mac")
        .with_match("standard_metadata.egress_port", Match::Exact(egress_port.into()))
        .with_param("smac", smac)
}

fn load_balance_entries(switch: &str) -> Vec<TableEntryRequest> {
    match switch {
        "s1" => vec![
            ecmp_group(ip(10, 0, 0, 1), 32, 0, 2),
            ecmp_nhop(0, mac([0x00, 0x00, 0x00, 0x00, 0x01, 0x02]), ip(10, 0, 2, 2), 2),
            ecmp_nhop(1, mac([0x00, 0x00, 0x00, 0x00, 0x01, 0x03]), ip(10, 0, 3, 3), 3),
            send_frame(2, mac([0x00, 0x00, 0x00, 0x01, 0x02, 0x00])),
            send_frame(3, mac([0x00, 0x00, 0x00, 0x01, 0x03, 0x00])),
        ],
        "s2" => vec![
            ecmp_group(ip(10, 0, 2, 2), 32, 0, 1),
            ecmp_nhop(0, mac([0x00, 0x00, 0x00, 0x00, 0x02, 0x02]), ip(10, 0, 2, 2), 1),
            send_frame(1, mac([0x00, 0x00, 0x00, 0x02, 0x01, 0x00])),
        ],
        "s3" => vec![
            ecmp_group(ip(10, 0, 3, 3), 32, 0, 1),
            ecmp_nhop(0, mac([0x00, 0x00, 0x00, 0x00, 0x03, 0x03]), ip(10, 0, 3, 3), 1),
            send_frame(1, mac([0x00, 0x00, 0x00, 0x03, 0x01, 0x00])),
        ],
        _ => Vec::new(),
    }
}

fn ipv4_forward(dst_addr: Ipv4Addr, prefix_len: i32, dst_mac: MacAddr, port: u32) -> TableEntryRequest {
    TableEntryRequest::new("MyIngress.ipv4_lpm", "MyIngress.ipv4_forward")
        .with_match("hdr.ipv4.dstAddr", Match::Lpm(dst_addr.into(), prefix_len))
        .with_param("dstAddr", dst_mac)
        .with_param("port", port)
}

fn qos_entries(switch: &str) -> Vec<TableEntryRequest> {
    match switch {
        "s1" => vec![
            ipv4_forward(ip(10, 0, 1, 1), 32, mac([0x08, 0x00, 0x00, 0x00, 0x01, 0x01]), 2),
            ipv4_forward(ip(10, 0, 1, 11), 32, mac([0x08, 0x00, 0x00, 0x00, 0x01, 0x11]), 1),
            ipv4_forward(ip(10, 0, 2, 0), 24, mac([0x08, 0x00, 0x00, 0x00, 0x02, 0x00]), 3),
            ipv4_forward(ip(10, 0, 3, 0), 24, mac([0x08, 0x00, 0x00, 0x00, 0x03, 0x00]), 4),
        ],
        "s2" => vec![
            ipv4_forward(ip(10, 0, 2, 2), 32, mac([0x08, 0x00, 0x00, 0x00, 0x02, 0x02]), 2),
            ipv4_forward(ip(10, 0, 2, 22), 32, mac([0x08, 0x00, 0x00, 0x00, 0x02, 0x22]), 1),
            ipv4_forward(ip(10, 0, 1, 0), 24, mac([0x08, 0x00, 0x00, 0x00, 0x01, 0x00]), 3),
            ipv4_forward(ip(10, 0, 3, 0), 24, mac([0x08, 0x00, 0x00, 0x00, 0x03, 0x00]), 4),
        ],
        "s3" => vec![
            ipv4_forward(ip(10, 0, 3, 3), 32, mac([0x08, 0x00, 0x00, 0x00, 0x03, 0x03]), 1),
            ipv4_forward(ip(10, 0, 1, 0), 24, mac([0x08, 0x00, 0x00, 0x00, 0x01, 0x00]), 2),
            ipv4_forward(ip(10, 0, 2, 0), 24, mac([0x08, 0x00, 0x00, 0x00, 0x02, 0x00]), 3),
        ],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(rules: RuleSet) -> Vec<usize> {
        ["s1", "s2", "s3", "s4"]
            .iter()
            .map(|s| rules.entries(s).len())
            .collect()
    }

    #[test]
    fn entries_per_switch() {
        assert_eq!(counts(RuleSet::LoadBalance), [5, 3, 3, 0]);
        assert_eq!(counts(RuleSet::Qos), [4, 4, 3, 0]);
    }

    #[test]
    fn load_balance_rules_read_as_written() {
        let s1: Vec<String> = RuleSet::LoadBalance
            .entries("s1")
            .iter()
            .map(|e| e.to_string())
            .collect();
        assert_eq!(
            s1,
            [
                "MyIngress.ecmp_group(hdr.ipv4.dstAddr=10.0.0.1/32) -> MyIngress.set_ecmp_select(ecmp_base=0, ecmp_count=2)",
                "MyIngress.ecmp_nhop(meta.ecmp_select=0) -> MyIngress.set_nhop(nhop_dmac=00:00:00:00:01:02, nhop_ipv4=10.0.2.2, port=2)",
                "MyIngress.ecmp_nhop(meta.ecmp_select=1) -> MyIngress.set_nhop(nhop_dmac=00:00:00:00:01:03, nhop_ipv4=10.0.3.3, port=3)",
                "MyEgress.send_frame(standard_metadata.egress_port=2) -> MyEgress.rewrite_mac(smac=00:00:00:01:02:00)",
                "MyEgress.send_frame(standard_metadata.egress_port=3) -> MyEgress.rewrite_mac(smac=00:00:00:01:03:00)",
            ]
        );
    }

    #[test]
    fn qos_rules_read_as_written() {
        let s3: Vec<String> = RuleSet::Qos.entries("s3").iter().map(|e| e.to_string()).collect();
        assert_eq!(
            s3,
            [
                "MyIngress.ipv4_lpm(hdr.ipv4.dstAddr=10.0.3.3/32) -> MyIngress.ipv4_forward(dstAddr=08:00:00:00:03:03, port=1)",
                "MyIngress.ipv4_lpm(hdr.ipv4.dstAddr=10.0.1.0/24) -> MyIngress.ipv4_forward(dstAddr=08:00:00:00:01:00, port=2)",
                "MyIngress.ipv4_lpm(hdr.ipv4.dstAddr=10.0.2.0/24) -> MyIngress.ipv4_forward(dstAddr=08:00:00:00:02:00, port=3)",
            ]
        );
        assert_eq!(
            RuleSet::Qos.confirmation("s2").as_deref(),
            Some("Installed Forward rule on s2")
        );
        assert_eq!(RuleSet::LoadBalance.confirmation("s2"), None);
    }
}
