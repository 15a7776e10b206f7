//! Serialization and deserialization of telemetry packets.
//!
//! This module defines the packed little-endian wire format used to send
//! and receive [`TelemetryPacket`]s, along with:
//! - [`serialize_packet`] / [`deserialize_packet`] for full packets.
//! - [`peek_envelope`] for header-only inspection without touching the payload.
//! - Size helpers like [`SERIALIZED_HEADER_BYTES`] and [`packet_wire_size`].
//!
//! Layout:
//!
//! ```text
//!   u16 ty            -- DataType discriminant
//!   u16 flags         -- element kind in bits 0..2, elem-size log2 in bits 3..5
//!   u32 timestamp_ms
//!   u16 payload_len
//!   payload bytes     -- raw payload, length = payload_len
//! ```
//!
//! All fields little-endian. Strings carry their actual length with no NUL
//! terminator; the sink pads or truncates to the schema width when needed.

use crate::config::{DataType, ElemKind};
use crate::telemetry_packet::TelemetryPacket;
use crate::{TelemetryError, TelemetryResult};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Fixed header size of the wire format.
pub const SERIALIZED_HEADER_BYTES: usize = 10;

const KIND_MASK: u16 = 0b0000_0111;
const SIZE_SHIFT: u16 = 3;
const SIZE_MASK: u16 = 0b0011_1000;

/// Lightweight header-only view of a serialized [`TelemetryPacket`].
///
/// Produced by [`peek_envelope`] without allocating or copying the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TelemetryEnvelope {
    pub ty: DataType,
    pub kind: ElemKind,
    pub elem_size: usize,
    /// Timestamp in milliseconds (as stored on the wire).
    pub timestamp_ms: u64,
    pub payload_len: usize,
}

// ===========================================================================
// Flags field
// ===========================================================================

/// Pack element kind and size into the 16-bit flags field.
pub fn encode_flags(kind: ElemKind, elem_size: usize) -> TelemetryResult<u16> {
    let log2 = match elem_size {
        1 => 0u16,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => return Err(TelemetryError::BadArg),
    };
    Ok((kind as u16 & KIND_MASK) | (log2 << SIZE_SHIFT))
}

/// Unpack the flags field.
pub fn decode_flags(flags: u16) -> TelemetryResult<(ElemKind, usize)> {
    let kind = ElemKind::try_from_u32((flags & KIND_MASK) as u32)
        .ok_or(TelemetryError::Deserialize("bad element kind"))?;
    let elem_size = 1usize << ((flags & SIZE_MASK) >> SIZE_SHIFT);
    Ok((kind, elem_size))
}

// ===========================================================================
// ByteReader: tiny cursor over a byte slice
// ===========================================================================

#[derive(Clone, Copy)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.off)
    }

    /// Read exactly `n` bytes, advancing the internal offset.
    pub fn read_bytes(&mut self, n: usize) -> TelemetryResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(TelemetryError::Deserialize("short read"));
        }
        let s = &self.buf[self.off..self.off + n];
        self.off += n;
        Ok(s)
    }

    pub fn read_u16(&mut self) -> TelemetryResult<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> TelemetryResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// ===========================================================================
// Serialization
// ===========================================================================

/// Serialize a [`TelemetryPacket`] into the packed wire format.
///
/// The returned `Arc<[u8]>` owns the encoded bytes and can be shared cheaply.
pub fn serialize_packet(pkt: &TelemetryPacket) -> Arc<[u8]> {
    let payload = pkt.payload();
    let mut out = Vec::with_capacity(SERIALIZED_HEADER_BYTES + payload.len());

    // Flags are validated at packet construction; this cannot fail here.
    let flags = encode_flags(pkt.kind(), pkt.elem_size()).unwrap_or(0);

    out.extend_from_slice(&(pkt.data_type() as u32 as u16).to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&(pkt.timestamp() as u32).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);

    Arc::<[u8]>::from(out)
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn read_header(r: &mut ByteReader<'_>) -> TelemetryResult<TelemetryEnvelope> {
    let ty_raw = r.read_u16()?;
    let flags = r.read_u16()?;
    let ts = r.read_u32()?;
    let payload_len = r.read_u16()? as usize;

    let ty = DataType::try_from_u32(ty_raw as u32).ok_or(TelemetryError::InvalidType)?;
    let (kind, elem_size) = decode_flags(flags)?;

    Ok(TelemetryEnvelope {
        ty,
        kind,
        elem_size,
        timestamp_ms: ts as u64,
        payload_len,
    })
}

/// Deserialize a full [`TelemetryPacket`] from the wire format.
///
/// # Errors
/// - `TelemetryError::Deserialize` if the buffer is malformed or short.
/// - `TelemetryError::InvalidType` if the data type is unknown.
pub fn deserialize_packet(buf: &[u8]) -> TelemetryResult<TelemetryPacket> {
    let mut r = ByteReader::new(buf);
    let env = read_header(&mut r)?;
    let payload = r.read_bytes(env.payload_len)?;

    TelemetryPacket::new(
        env.ty,
        env.kind,
        env.elem_size,
        env.timestamp_ms,
        Arc::<[u8]>::from(payload),
    )
}

/// Decode only the envelope of a serialized packet. Does not touch or
/// allocate the payload (the buffer may even be truncated after the header).
pub fn peek_envelope(buf: &[u8]) -> TelemetryResult<TelemetryEnvelope> {
    let mut r = ByteReader::new(buf);
    read_header(&mut r)
}

// ===========================================================================
// Size helpers
// ===========================================================================

/// Total wire size (header + payload) of a packet, in bytes.
pub fn packet_wire_size(pkt: &TelemetryPacket) -> usize {
    SERIALIZED_HEADER_BYTES + pkt.payload().len()
}
