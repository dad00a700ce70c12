// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Length-prefixed framing and the field codecs shared by every message.
//!
//! All integers on the wire are little-endian. Strings are a `u32` length
//! followed by raw octets. Booleans are one byte, zero/non-zero. IPv4
//! addresses are carried as 4 bytes in reverse network order: the wire holds
//! the big-endian octets and the parsed value is obtained by reversing them.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, SlskError};

/// Upper bound on a single frame's payload. Anything larger is treated as a
/// corrupted length prefix rather than an allocation request.
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024 * 1024;

/// Cursor over a received payload, yielding typed fields.
#[derive(Debug)]
pub struct MessageReader {
    buf: Bytes,
}

impl MessageReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(SlskError::protocol(format!(
                "truncated message: needed {n} bytes for {what}, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64_le())
    }

    /// Strings are a u32 length followed by raw octets; decoding is lossy so
    /// a peer sending non-UTF-8 filenames cannot poison the session.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        self.need(len, "string body")?;
        let raw = self.buf.split_to(len);
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// 4 bytes in reverse network order.
    pub fn read_ipv4(&mut self) -> Result<Ipv4Addr> {
        self.need(4, "ipv4")?;
        let mut octets = [0u8; 4];
        self.buf.copy_to_slice(&mut octets);
        octets.reverse();
        Ok(Ipv4Addr::from(octets))
    }
}

/// Builder for an outbound payload; [`MessageWriter::into_frame`] prepends
/// the length prefix.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    /// Start a server or peer session payload (u32 code field).
    pub fn with_code(code: u32) -> Self {
        let mut w = Self {
            buf: BytesMut::with_capacity(64),
        };
        w.buf.put_u32_le(code);
        w
    }

    /// Start a peer init payload (single code byte).
    pub fn with_init_code(code: u8) -> Self {
        let mut w = Self {
            buf: BytesMut::with_capacity(32),
        };
        w.buf.put_u8(code);
        w
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn write_bool(&mut self, v: bool) -> &mut Self {
        self.buf.put_u8(v as u8);
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32_le(v);
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64_le(v);
        self
    }

    pub fn write_string(&mut self, v: &str) -> &mut Self {
        self.buf.put_u32_le(v.len() as u32);
        self.buf.put_slice(v.as_bytes());
        self
    }

    pub fn write_ipv4(&mut self, v: Ipv4Addr) -> &mut Self {
        let mut octets = v.octets();
        octets.reverse();
        self.buf.put_slice(&octets);
        self
    }

    /// Finish the payload and produce the full frame, length prefix included.
    pub fn into_frame(self) -> Bytes {
        let mut framed = BytesMut::with_capacity(4 + self.buf.len());
        framed.put_u32_le(self.buf.len() as u32);
        framed.extend_from_slice(&self.buf);
        framed.freeze()
    }

    /// The bare payload, for tests that inspect fields without the prefix.
    pub fn into_payload(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Validates a frame's length prefix and returns the payload length.
pub fn payload_len(prefix: [u8; 4]) -> Result<usize> {
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_PAYLOAD_BYTES {
        return Err(SlskError::protocol(format!(
            "frame length {len} exceeds the {MAX_PAYLOAD_BYTES}-byte cap"
        )));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn round_trips_every_field_type() -> Result<()> {
        let mut w = MessageWriter::with_code(7);
        w.write_string("alice")
            .write_u32(42)
            .write_u64(1 << 40)
            .write_bool(true)
            .write_ipv4(Ipv4Addr::new(192, 168, 0, 1));
        let frame = w.into_frame();

        let len = payload_len(frame[..4].try_into().expect("prefix"))?;
        assert_eq!(len, frame.len() - 4);

        let mut r = MessageReader::new(frame.slice(4..));
        assert_eq!(r.read_u32()?, 7);
        assert_eq!(r.read_string()?, "alice");
        assert_eq!(r.read_u32()?, 42);
        assert_eq!(r.read_u64()?, 1 << 40);
        assert!(r.read_bool()?);
        assert_eq!(r.read_ipv4()?, Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(r.remaining(), 0);
        Ok(())
    }

    #[test]
    fn ipv4_is_reversed_on_the_wire() {
        let mut w = MessageWriter::with_code(3);
        w.write_ipv4(Ipv4Addr::new(1, 2, 3, 4));
        let payload = w.into_payload();
        assert_eq!(&payload[..], &hex!("03000000 04030201")[..]);
    }

    #[test]
    fn truncated_string_is_a_protocol_error() {
        let mut w = MessageWriter::default();
        w.write_u32(100);
        let mut r = MessageReader::new(w.into_payload());
        let err = r.read_string().expect_err("must fail");
        assert_eq!(err.kind(), crate::error::ErrorKind::ProtocolError);
    }

    #[test]
    fn oversized_prefix_is_rejected() {
        let prefix = (MAX_PAYLOAD_BYTES as u32 + 1).to_le_bytes();
        assert!(payload_len(prefix).is_err());
    }
}
