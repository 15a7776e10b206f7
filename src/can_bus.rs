// src/can_bus.rs
//! CAN / CAN-FD bus aggregate:
//! - subscriber fanout for reassembled (or raw) RX payloads
//! - send paths, including fragmentation for >64-byte buffers
//! - ISR entry that does minimal work: push into the lock-free ring
//! - worker-context `process_rx` that drains the ring, expires stale
//!   partials, reassembles and notifies subscribers

use crate::config::{FRAG_WIRE_LEN, MAX_SUBSCRIBERS};
use crate::frame::{dlc_to_len, len_to_dlc, round_up_fd_len, CanFrame, CAN_MAX_PAYLOAD};
use crate::lock::StateMutex;
use crate::reassembly::{FragHeader, FragOutcome, ReassemblyTable, FRAG_F_FIRST, FRAG_F_LAST,
                        FRAG_HDR_SIZE, FRAG_MAGIC};
use crate::{TelemetryError, TelemetryResult};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};

/// Transmit capability handed to the bus at construction:
/// `(wire bytes, std_id) -> Result`.
pub type CanTx = Arc<dyn Fn(&[u8], u16) -> TelemetryResult<()> + Send + Sync>;

/// RX fanout callback; receives the reassembled message (or the raw frame
/// payload for non-fragment frames). Runs on the worker; must not block or
/// call back into the registry.
pub type RxCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct CanBusState {
    subs: Vec<RxCallback>,
    reasm: ReassemblyTable,
}

pub struct CanBus {
    tx: CanTx,
    ring: crate::ring::RxRing,
    /// Per-sender fragment-group sequence, wrapping u8.
    seq: AtomicU8,
    state: StateMutex<CanBusState>,
}

impl CanBus {
    pub fn new<F>(tx: F) -> Self
    where
        F: Fn(&[u8], u16) -> TelemetryResult<()> + Send + Sync + 'static,
    {
        Self {
            tx: Arc::new(tx),
            ring: crate::ring::RxRing::new(),
            seq: AtomicU8::new(0),
            state: StateMutex::new(CanBusState {
                subs: Vec::with_capacity(MAX_SUBSCRIBERS),
                reasm: ReassemblyTable::new(),
            }),
        }
    }

    // ---------------- subscriber fanout ----------------

    /// Register an RX callback. Fails if the same `Arc` is already
    /// registered or the table is full.
    pub fn subscribe_rx(&self, cb: RxCallback) -> TelemetryResult<()> {
        let mut st = self.state.lock();
        if st.subs.iter().any(|s| Arc::ptr_eq(s, &cb)) {
            return Err(TelemetryError::BadArg);
        }
        if st.subs.len() >= MAX_SUBSCRIBERS {
            return Err(TelemetryError::QueueFull);
        }
        st.subs.push(cb);
        Ok(())
    }

    /// Remove a previously added subscription (by registration handle).
    pub fn unsubscribe_rx(&self, cb: &RxCallback) -> TelemetryResult<()> {
        let mut st = self.state.lock();
        match st.subs.iter().position(|s| Arc::ptr_eq(s, cb)) {
            Some(i) => {
                st.subs.remove(i);
                Ok(())
            }
            None => Err(TelemetryError::NotFound),
        }
    }

    // ---------------- TX paths ----------------

    /// Send a single CAN/CAN-FD payload up to 64 bytes. If `len` is not an
    /// exact FD size it rounds up and zero-pads.
    pub fn send_bytes(&self, bytes: &[u8], std_id: u16) -> TelemetryResult<()> {
        if bytes.is_empty() || bytes.len() > CAN_MAX_PAYLOAD {
            return Err(TelemetryError::BadArg);
        }

        let wire_len = round_up_fd_len(bytes.len());
        // Round-up always lands on a table length.
        len_to_dlc(wire_len)?;

        let mut frame = [0u8; CAN_MAX_PAYLOAD];
        frame[..bytes.len()].copy_from_slice(bytes);

        (self.tx)(&frame[..wire_len], std_id & 0x7FF)
    }

    /// Send an arbitrarily large buffer by fragmenting into fixed 64-byte
    /// FD frames, each carrying an 8-byte header. A failed fragment aborts
    /// the send and surfaces the bus error; the peer stale-expires the
    /// partial.
    pub fn send_large(&self, bytes: &[u8], std_id: u16) -> TelemetryResult<()> {
        if bytes.is_empty() {
            return Err(TelemetryError::BadArg);
        }
        if bytes.len() > u16::MAX as usize {
            // header carries a u16 total_len
            return Err(TelemetryError::BadArg);
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let data_cap = FRAG_WIRE_LEN - FRAG_HDR_SIZE;

        let frag_cnt = bytes.len().div_ceil(data_cap);
        if frag_cnt > u8::MAX as usize {
            return Err(TelemetryError::BadArg);
        }
        let frag_cnt = frag_cnt as u8;

        let mut off = 0usize;
        for idx in 0..frag_cnt {
            let mut frame = [0u8; FRAG_WIRE_LEN];

            let mut flags = 0u8;
            if idx == 0 {
                flags |= FRAG_F_FIRST;
            }
            if idx == frag_cnt - 1 {
                flags |= FRAG_F_LAST;
            }
            let hdr = FragHeader {
                magic: FRAG_MAGIC,
                seq,
                frag_idx: idx,
                frag_cnt,
                flags,
                total_len: bytes.len() as u16,
            };
            let (hdr_bytes, body) = frame.split_at_mut(FRAG_HDR_SIZE);
            hdr.encode(hdr_bytes.try_into().map_err(|_| {
                TelemetryError::Internal("fragment header size")
            })?);

            let take = (bytes.len() - off).min(data_cap);
            body[..take].copy_from_slice(&bytes[off..off + take]);
            off += take;

            // Fixed 64-byte payload frame (pads zeros).
            self.send_bytes(&frame, std_id)?;
        }

        Ok(())
    }

    // ---------------- RX paths ----------------

    /// ISR entry: one call per received frame. Only enqueues; reassembly
    /// and subscriber callbacks happen in `process_rx`.
    pub fn on_rx_isr(&self, std_id: u16, dlc: u8, data: &[u8]) {
        let len = dlc_to_len(dlc).min(data.len()).min(CAN_MAX_PAYLOAD);
        self.ring.push(CanFrame::new(std_id, &data[..len]));
    }

    /// Drain the ISR ring, expire old partial reassemblies, reassemble
    /// fragmented messages and notify subscribers. Call periodically from
    /// worker context.
    pub fn process_rx(&self, now_ms: u64) {
        let mut st = self.state.lock();
        // All frames of this drain share one `now_ms`, so a single sweep up
        // front is equivalent to sweeping before each frame.
        st.reasm.expire_stale(now_ms);
        while let Some(frame) = self.ring.pop() {
            Self::handle_rx_frame(&mut st, &frame, now_ms);
        }
    }

    fn handle_rx_frame(st: &mut CanBusState, frame: &CanFrame, now_ms: u64) {
        let payload = frame.payload();

        // A frame is a fragment iff it can carry a header and the magic
        // matches; everything else is delivered raw.
        if let Some(hdr) = FragHeader::decode(payload) {
            if hdr.magic == FRAG_MAGIC {
                if !hdr.is_valid() {
                    return;
                }
                let body = &payload[FRAG_HDR_SIZE..];
                match st.reasm.accept(frame.std_id, &hdr, body, now_ms) {
                    FragOutcome::Complete(idx) => {
                        for cb in st.subs.iter() {
                            cb(st.reasm.completed(idx));
                        }
                        st.reasm.reset_slot(idx);
                    }
                    FragOutcome::Consumed | FragOutcome::Rejected => {}
                }
                return;
            }
        }

        for cb in st.subs.iter() {
            cb(payload);
        }
    }

    // ---------------- diagnostics ----------------

    /// Frames evicted from the RX ring by overflow.
    pub fn dropped_frames(&self) -> usize {
        self.ring.dropped()
    }
}
