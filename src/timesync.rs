// src/timesync.rs
//! NTP-style time synchronization over the router's TimeSync endpoint.
//!
//! This node is strictly the requestor; the master is an external peer.
//! Request payload: `{u64 seq, u64 t1}`. Reply: `{u64 seq, u64 t1, u64 t2,
//! u64 t3}`; `t4` is captured the moment the reply handler is entered.
//! Stale replies are accepted: the math is self-correcting.

use crate::clock::TickClock;
use crate::config::{DataEndpoint, DataType};
use crate::router::{EndpointHandler, Router};
use crate::telemetry_packet::TelemetryPacket;
use crate::{TelemetryError, TelemetryResult};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

pub const TIMESYNC_REQUEST_WORDS: usize = 2;
pub const TIMESYNC_RESPONSE_WORDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncRequestFields {
    pub seq: u64,
    pub t1_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncResponseFields {
    pub seq: u64,
    pub t1_ms: u64,
    pub t2_ms: u64,
    pub t3_ms: u64,
}

/// One completed four-timestamp exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncSample {
    pub offset_ms: i64,
    pub delay_ms: u64,
}

/// Standard NTP offset/delay estimate from the four timestamps.
pub fn compute_offset_delay(t1_ms: u64, t2_ms: u64, t3_ms: u64, t4_ms: u64) -> TimeSyncSample {
    let t1 = t1_ms as i64;
    let t2 = t2_ms as i64;
    let t3 = t3_ms as i64;
    let t4 = t4_ms as i64;

    let offset = ((t2 - t1) + (t3 - t4)) / 2;
    let delay = (t4 - t1) - (t3 - t2);

    TimeSyncSample {
        offset_ms: offset,
        delay_ms: if delay < 0 { 0 } else { delay as u64 },
    }
}

// ---------------- wire helpers ----------------

pub fn build_timesync_request(seq: u64, t1_ms: u64) -> TelemetryResult<TelemetryPacket> {
    TelemetryPacket::from_u64_slice(DataType::TimeSyncRequest, &[seq, t1_ms], t1_ms)
}

pub fn build_timesync_response(
    seq: u64,
    t1_ms: u64,
    t2_ms: u64,
    t3_ms: u64,
) -> TelemetryResult<TelemetryPacket> {
    TelemetryPacket::from_u64_slice(
        DataType::TimeSyncResponse,
        &[seq, t1_ms, t2_ms, t3_ms],
        t3_ms,
    )
}

pub fn decode_timesync_request(pkt: &TelemetryPacket) -> TelemetryResult<TimeSyncRequestFields> {
    let vals = decode_u64_payload(pkt, DataType::TimeSyncRequest, TIMESYNC_REQUEST_WORDS)?;
    Ok(TimeSyncRequestFields {
        seq: vals[0],
        t1_ms: vals[1],
    })
}

pub fn decode_timesync_response(pkt: &TelemetryPacket) -> TelemetryResult<TimeSyncResponseFields> {
    let vals = decode_u64_payload(pkt, DataType::TimeSyncResponse, TIMESYNC_RESPONSE_WORDS)?;
    Ok(TimeSyncResponseFields {
        seq: vals[0],
        t1_ms: vals[1],
        t2_ms: vals[2],
        t3_ms: vals[3],
    })
}

fn decode_u64_payload(
    pkt: &TelemetryPacket,
    ty: DataType,
    words: usize,
) -> TelemetryResult<Vec<u64>> {
    if pkt.data_type() != ty {
        return Err(TelemetryError::InvalidType);
    }
    let vals = pkt.data_as_u64()?;
    if vals.len() != words {
        return Err(TelemetryError::SizeMismatch {
            expected: words * 8,
            got: vals.len() * 8,
        });
    }
    Ok(vals)
}

// ---------------- client ----------------

/// Requestor-side state: a strictly monotonic sequence plus the last
/// computed sample for diagnostics.
pub struct TimeSyncClient {
    seq: AtomicU64,
    last_offset_ms: AtomicU64,
}

impl TimeSyncClient {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(1),
            last_offset_ms: AtomicU64::new(0),
        }
    }

    /// Issue one request through the router. `t1` is embedded in the
    /// payload and doubles as the packet timestamp so the master can use it
    /// directly.
    pub fn send_request(&self, router: &Router, clock: &TickClock) -> TelemetryResult<()> {
        let t1 = clock.now_ms();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        router.log_ts(DataType::TimeSyncRequest, t1, &[seq, t1])
    }

    /// Consume a master reply: capture `t4` now, compute the sample and
    /// nudge the clock base iff the offset passes the sanity clamp.
    pub fn handle_response(
        &self,
        pkt: &TelemetryPacket,
        clock: &TickClock,
    ) -> TelemetryResult<TimeSyncSample> {
        let t4 = clock.now_ms();
        let f = decode_timesync_response(pkt)?;
        let sample = compute_offset_delay(f.t1_ms, f.t2_ms, f.t3_ms, t4);
        clock.apply_offset_ms(sample.offset_ms);
        self.last_offset_ms
            .store(sample.offset_ms as u64, Ordering::Relaxed);
        Ok(sample)
    }

    /// Offset of the most recent accepted exchange (raw bits of the i64).
    pub fn last_offset_ms(&self) -> i64 {
        self.last_offset_ms.load(Ordering::Relaxed) as i64
    }
}

impl Default for TimeSyncClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Endpoint handler wiring a client + clock to the TimeSync endpoint.
/// Requests passing through a relay land here too and are ignored.
pub fn timesync_endpoint_handler(
    client: Arc<TimeSyncClient>,
    clock: Arc<TickClock>,
) -> EndpointHandler {
    EndpointHandler::new_packet_handler(DataEndpoint::TimeSync, move |pkt| {
        if pkt.data_type() == DataType::TimeSyncResponse {
            let _ = client.handle_response(pkt, &clock)?;
        }
        Ok(())
    })
}
