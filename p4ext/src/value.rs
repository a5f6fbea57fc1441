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

use byteorder::{BigEndian, ByteOrder};

use crate::P4Error;

use itertools::Itertools;

use std::fmt::{self, Display};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A 48-bit Ethernet address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0.iter().format(":"))
    }
}

impl FromStr for MacAddr {
    type Err = P4Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || P4Error::InvalidValue(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || part.len() > 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddr(octets))
    }
}

/// A match or action parameter value, before it is sized to a field's bit width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Int(u128),
    Ipv4(Ipv4Addr),
    Mac(MacAddr),
    Bytes(Vec<u8>),
}

macro_rules! value_from_uint {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(x: $t) -> Self {
                    Value::Int(x.into())
                }
            }
        )*
    };
}
value_from_uint!(u8, u16, u32, u64, u128);

impl From<Ipv4Addr> for Value {
    fn from(a: Ipv4Addr) -> Self {
        Value::Ipv4(a)
    }
}

impl From<MacAddr> for Value {
    fn from(m: MacAddr) -> Self {
        Value::Mac(m)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl FromStr for Value {
    type Err = P4Error;

    /// Accepts a dotted-quad IPv4 address, a colon-separated MAC address, a `0x` hex integer
    /// or a decimal integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(a) = s.parse::<Ipv4Addr>() {
            return Ok(Value::Ipv4(a));
        }
        if s.contains(':') {
            return s.parse::<MacAddr>().map(Value::Mac);
        }
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => u128::from_str_radix(hex, 16),
            None => s.parse::<u128>(),
        };
        parsed
            .map(Value::Int)
            .map_err(|_| P4Error::InvalidValue(s.to_string()))
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(x) => write!(f, "{}", x),
            Value::Ipv4(a) => write!(f, "{}", a),
            Value::Mac(m) => write!(f, "{}", m),
            Value::Bytes(b) => write!(f, "0x{:02x}", b.iter().format("")),
        }
    }
}

impl Value {
    fn to_be_bytes(&self) -> Vec<u8> {
        match self {
            Value::Int(x) => {
                let mut buf = [0u8; 16];
                BigEndian::write_u128(&mut buf, *x);
                buf.to_vec()
            }
            Value::Ipv4(a) => a.octets().to_vec(),
            Value::Mac(m) => m.0.to_vec(),
            Value::Bytes(b) => b.clone(),
        }
    }

    /// Encodes the value the way P4Runtime expects it for a field of `bit_width` bits: a
    /// big-endian byte string of exactly `(bit_width + 7) / 8` bytes.
    pub fn encode(&self, bit_width: i32) -> Result<Vec<u8>, P4Error> {
        let too_wide = || P4Error::ValueTooWide {
            value: self.to_string(),
            bit_width,
        };
        let num_bytes = (bit_width.max(0) as usize + 7) / 8;
        let raw = self.to_be_bytes();

        let excess = raw.len().saturating_sub(num_bytes);
        if raw[..excess].iter().any(|&b| b != 0) {
            return Err(too_wide());
        }
        let mut enc_val = vec![0u8; num_bytes - (raw.len() - excess)];
        enc_val.extend_from_slice(&raw[excess..]);

        let spare_bits = num_bytes * 8 - bit_width.max(0) as usize;
        if spare_bits > 0 && enc_val[0] >> (8 - spare_bits) != 0 {
            return Err(too_wide());
        }
        Ok(enc_val)
    }
}

/// Interprets `bytes`, read back from a field of `bit_width` bits.  48-bit fields are shown as
/// MAC addresses and 32-bit fields as IPv4 addresses.  Servers may strip leading zero bytes,
/// so shorter strings are widened first.
pub fn decode_value(bytes: &[u8], bit_width: i32) -> Value {
    let num_bytes = (bit_width.max(0) as usize + 7) / 8;
    let mut padded = vec![0u8; num_bytes.saturating_sub(bytes.len())];
    padded.extend_from_slice(bytes);
    match (bit_width, padded.len()) {
        (48, 6) => {
            let mut octets = [0u8; 6];
            octets.copy_from_slice(&padded);
            Value::Mac(MacAddr(octets))
        }
        (32, 4) => Value::Ipv4(Ipv4Addr::new(padded[0], padded[1], padded[2], padded[3])),
        (_, n) if n == 0 => Value::Int(0),
        (_, n) if n <= 16 => Value::Int(BigEndian::read_uint128(&padded, n)),
        _ => Value::Bytes(padded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_exactly_field_width() {
        assert_eq!(Value::from(2u32).encode(9).unwrap(), vec![0, 2]);
        assert_eq!(Value::from(0u32).encode(16).unwrap(), vec![0, 0]);
        assert_eq!(Value::from(2u32).encode(32).unwrap(), vec![0, 0, 0, 2]);
        assert_eq!(Value::from(1u8).encode(1).unwrap(), vec![1]);
        assert_eq!(
            Value::from(Ipv4Addr::new(10, 0, 0, 1)).encode(32).unwrap(),
            vec![10, 0, 0, 1]
        );
        assert_eq!(
            Value::from(MacAddr([0, 0, 0, 0, 1, 2])).encode(48).unwrap(),
            vec![0, 0, 0, 0, 1, 2]
        );
    }

    #[test]
    fn encode_rejects_values_wider_than_field() {
        assert!(Value::from(512u32).encode(9).is_err());
        assert!(Value::from(511u32).encode(9).is_ok());
        assert!(Value::from(256u32).encode(8).is_err());
        match Value::from(Ipv4Addr::new(10, 0, 0, 1)).encode(16) {
            Err(P4Error::ValueTooWide { value, bit_width }) => {
                assert_eq!(value, "10.0.0.1");
                assert_eq!(bit_width, 16);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn encode_pads_short_byte_strings() {
        assert_eq!(Value::from(vec![0xab]).encode(24).unwrap(), vec![0, 0, 0xab]);
        assert_eq!(Value::from(vec![0, 0, 0x01]).encode(8).unwrap(), vec![1]);
    }

    #[test]
    fn mac_parse_and_display() {
        let mac: MacAddr = "08:00:00:00:01:11".parse().unwrap();
        assert_eq!(mac, MacAddr([8, 0, 0, 0, 1, 0x11]));
        assert_eq!(mac.to_string(), "08:00:00:00:01:11");
        assert!("08:00:00:00:01".parse::<MacAddr>().is_err());
        assert!("08:00:00:00:01:11:22".parse::<MacAddr>().is_err());
        assert!("08:00:00:00:01:zz".parse::<MacAddr>().is_err());
    }

    #[test]
    fn value_parse() {
        assert_eq!("10.0.2.2".parse::<Value>().unwrap(), Value::Ipv4(Ipv4Addr::new(10, 0, 2, 2)));
        assert_eq!(
            "00:00:00:01:02:00".parse::<Value>().unwrap(),
            Value::Mac(MacAddr([0, 0, 0, 1, 2, 0]))
        );
        assert_eq!("0x1f".parse::<Value>().unwrap(), Value::Int(31));
        assert_eq!("42".parse::<Value>().unwrap(), Value::Int(42));
        assert!("forty-two".parse::<Value>().is_err());
    }

    #[test]
    fn decode_by_width() {
        assert_eq!(decode_value(&[10, 0, 1, 1], 32).to_string(), "10.0.1.1");
        assert_eq!(decode_value(&[8, 0, 0, 0, 2, 0], 48).to_string(), "08:00:00:00:02:00");
        assert_eq!(decode_value(&[1, 2, 0], 48).to_string(), "00:00:00:01:02:00");
        assert_eq!(decode_value(&[0, 3], 9), Value::Int(3));
        assert_eq!(decode_value(&[], 14), Value::Int(0));
    }
}
