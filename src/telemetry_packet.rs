// src/telemetry_packet.rs
//! Payload-bearing telemetry packet (safe, heap-backed, shareable) plus
//! typed accessors and pretty printing.

use crate::config::{DataType, ElemKind};
use crate::router::SideId;
use crate::schema::message_meta;
use crate::{TelemetryError, TelemetryResult};
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::convert::TryInto;
use core::fmt::Write;
use time::OffsetDateTime;

// Timestamps at or above this are wall-clock epoch ms, not an uptime counter.
const EPOCH_MS_THRESHOLD: u64 = 1_000_000_000_000;

#[derive(Clone, Debug)]
pub struct TelemetryPacket {
    ty: DataType,
    kind: ElemKind,
    elem_size: usize,
    timestamp: u64,
    payload: Arc<[u8]>,
    /// Side the packet arrived on, when known. Relay forwarding must not
    /// re-emit to this side.
    src_side: Option<SideId>,
}

impl TelemetryPacket {
    /// Create a packet, validating kind/size against the schema.
    pub fn new(
        ty: DataType,
        kind: ElemKind,
        elem_size: usize,
        timestamp: u64,
        payload: Arc<[u8]>,
    ) -> TelemetryResult<Self> {
        let pkt = Self {
            ty,
            kind,
            elem_size,
            timestamp,
            payload,
            src_side: None,
        };
        pkt.validate()?;
        Ok(pkt)
    }

    /// Convenience: raw bytes with schema-derived kind and element size.
    pub fn from_u8_slice(ty: DataType, bytes: &[u8], timestamp: u64) -> TelemetryResult<Self> {
        let meta = message_meta(ty);
        Self::new(
            ty,
            meta.kind,
            meta.elem_size,
            timestamp,
            Arc::<[u8]>::from(bytes),
        )
    }

    /// Convenience: create from a slice of `f32` (copied, little-endian).
    pub fn from_f32_slice(ty: DataType, values: &[f32], timestamp: u64) -> TelemetryResult<Self> {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let meta = message_meta(ty);
        Self::new(ty, meta.kind, 4, timestamp, Arc::<[u8]>::from(bytes))
    }

    /// Convenience: create from a slice of `u64` (copied, little-endian).
    pub fn from_u64_slice(ty: DataType, values: &[u64], timestamp: u64) -> TelemetryResult<Self> {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let meta = message_meta(ty);
        Self::new(ty, meta.kind, 8, timestamp, Arc::<[u8]>::from(bytes))
    }

    /// Convenience: a string payload, silently truncated to the schema's
    /// fixed pad width.
    pub fn from_str(ty: DataType, s: &str, timestamp: u64) -> TelemetryResult<Self> {
        let meta = message_meta(ty);
        let bytes = s.as_bytes();
        let n = bytes.len().min(meta.data_size);
        Self::new(
            ty,
            ElemKind::String,
            1,
            timestamp,
            Arc::<[u8]>::from(&bytes[..n]),
        )
    }

    /// Convenience: a payload-less packet (e.g. heartbeat).
    pub fn from_no_data(ty: DataType, timestamp: u64) -> TelemetryResult<Self> {
        Self::from_u8_slice(ty, &[], timestamp)
    }

    /// Validate internal invariants against the schema.
    pub fn validate(&self) -> TelemetryResult<()> {
        let meta = message_meta(self.ty);
        if self.kind != meta.kind {
            return Err(TelemetryError::BadArg);
        }
        if self.elem_size != meta.elem_size {
            return Err(TelemetryError::SizeMismatch {
                expected: meta.elem_size,
                got: self.elem_size,
            });
        }
        let len = self.payload.len();
        let size_ok = match meta.kind {
            // Strings may run short; the sink pads/truncates to the fixed width.
            ElemKind::String => len <= meta.data_size,
            _ => len == meta.data_size,
        };
        if !size_ok {
            return Err(TelemetryError::SizeMismatch {
                expected: meta.data_size,
                got: len,
            });
        }
        Ok(())
    }

    // ---------------- accessors ----------------

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.ty
    }
    #[inline]
    pub fn kind(&self) -> ElemKind {
        self.kind
    }
    #[inline]
    pub fn elem_size(&self) -> usize {
        self.elem_size
    }
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
    /// Destination endpoints, from the schema.
    #[inline]
    pub fn endpoints(&self) -> &'static [crate::config::DataEndpoint] {
        message_meta(self.ty).endpoints
    }
    #[inline]
    pub fn src_side(&self) -> Option<SideId> {
        self.src_side
    }

    /// Tag the packet with the side it arrived on.
    pub fn with_src_side(mut self, side: SideId) -> Self {
        self.src_side = Some(side);
        self
    }

    // ---------------- typed views ----------------

    /// Decode the payload as little-endian `u64` words.
    pub fn data_as_u64(&self) -> TelemetryResult<Vec<u64>> {
        if self.payload.len() % 8 != 0 {
            return Err(TelemetryError::SizeMismatch {
                expected: (self.payload.len() / 8 + 1) * 8,
                got: self.payload.len(),
            });
        }
        Ok(self
            .payload
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }

    /// String payloads as UTF-8 with trailing NULs trimmed; `None` for
    /// non-string types or invalid UTF-8.
    pub fn data_as_utf8(&self) -> Option<String> {
        if self.kind != ElemKind::String {
            return None;
        }
        let end = self
            .payload
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        core::str::from_utf8(&self.payload[..end])
            .ok()
            .map(|s| s.to_string())
    }

    // ---------------- pretty printing ----------------

    /// Header line without the data portion.
    pub fn header_string(&self) -> String {
        let mut endpoints = String::new();
        for (i, ep) in self.endpoints().iter().enumerate() {
            if i > 0 {
                endpoints.push_str(", ");
            }
            endpoints.push_str(ep.as_str());
        }

        let total_ms = self.timestamp;
        let human_time = if total_ms >= EPOCH_MS_THRESHOLD {
            let secs = (total_ms / 1_000) as i64;
            let sub_ms = (total_ms % 1_000) as u32;
            let mut s = String::new();
            match OffsetDateTime::from_unix_timestamp(secs) {
                Ok(dt) => {
                    let _ = write!(
                        s,
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}Z",
                        dt.year(),
                        dt.month() as u8,
                        dt.day(),
                        dt.hour(),
                        dt.minute(),
                        dt.second(),
                        sub_ms
                    );
                }
                Err(_) => {
                    let _ = write!(s, "Invalid epoch ({})", total_ms);
                }
            }
            s
        } else {
            // Uptime in ms since boot
            let hours = total_ms / 3_600_000;
            let minutes = (total_ms % 3_600_000) / 60_000;
            let seconds = (total_ms % 60_000) / 1_000;
            let milliseconds = total_ms % 1_000;

            let mut s = String::new();
            if hours > 0 {
                let _ = write!(s, "{hours}h {minutes:02}m {seconds:02}s {milliseconds:03}ms");
            } else if minutes > 0 {
                let _ = write!(s, "{minutes}m {seconds:02}s {milliseconds:03}ms");
            } else {
                let _ = write!(s, "{seconds}s {milliseconds:03}ms");
            }
            s
        };

        let mut out = String::new();
        let _ = write!(
            out,
            "Type: {}, Size: {}, Endpoints: [{}], Timestamp: {} ({})",
            self.ty.as_str(),
            self.payload.len(),
            endpoints,
            self.timestamp,
            human_time
        );
        out
    }

    /// Full pretty string including the decoded data portion.
    pub fn to_display_string(&self) -> String {
        const MAX_PRECISION: usize = 12;
        let mut s = String::new();
        s.push_str(&self.header_string());

        if self.payload.is_empty() {
            s.push_str(", Data: <empty>");
            return s;
        }

        if self.ty == DataType::GenericError {
            s.push_str(", Error: ");
        } else {
            s.push_str(", Data: ");
        }

        if let Some(msg) = self.data_as_utf8() {
            s.push_str(&msg);
            return s;
        }

        match (self.kind, self.elem_size) {
            (ElemKind::Float, 4) => {
                let n = self.payload.len() / 4;
                for (i, chunk) in self.payload.chunks_exact(4).enumerate() {
                    let v = f32::from_le_bytes(chunk.try_into().unwrap());
                    let _ = write!(s, "{v:.prec$}", prec = MAX_PRECISION);
                    if i + 1 < n {
                        s.push_str(", ");
                    }
                }
            }
            (ElemKind::Float, 8) => {
                let n = self.payload.len() / 8;
                for (i, chunk) in self.payload.chunks_exact(8).enumerate() {
                    let v = f64::from_le_bytes(chunk.try_into().unwrap());
                    let _ = write!(s, "{v:.prec$}", prec = MAX_PRECISION);
                    if i + 1 < n {
                        s.push_str(", ");
                    }
                }
            }
            (ElemKind::Unsigned, 8) => {
                let n = self.payload.len() / 8;
                for (i, chunk) in self.payload.chunks_exact(8).enumerate() {
                    let v = u64::from_le_bytes(chunk.try_into().unwrap());
                    let _ = write!(s, "{v}");
                    if i + 1 < n {
                        s.push_str(", ");
                    }
                }
            }
            (ElemKind::Bool, _) => {
                for (i, b) in self.payload.iter().enumerate() {
                    let _ = write!(s, "{}", *b != 0);
                    if i + 1 < self.payload.len() {
                        s.push_str(", ");
                    }
                }
            }
            _ => {
                for (i, b) in self.payload.iter().enumerate() {
                    let _ = write!(s, "0x{:02x}", b);
                    if i + 1 < self.payload.len() {
                        s.push(' ');
                    }
                }
            }
        }

        s
    }
}

impl core::fmt::Display for TelemetryPacket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.to_display_string())
    }
}
