// src/reassembly.rs
//! Fragmentation header codec and the bounded multi-slot reassembly table.
//!
//! Fragment frames are distinguished from raw frames by a magic header at
//! the start of the payload. Reassembly is bounded: a fixed pool of slots,
//! one in-flight message per CAN ID, stale partials expired after
//! `REASM_TIMEOUT_MS`.

use crate::config::{REASM_MAX_BYTES, REASM_MAX_FRAGS, REASM_SLOTS, REASM_TIMEOUT_MS};

/// First two payload bytes of every fragment frame ('S''D'). Stable: peers
/// depend on it.
pub const FRAG_MAGIC: u16 = 0x5344;
pub const FRAG_F_FIRST: u8 = 1 << 0;
pub const FRAG_F_LAST: u8 = 1 << 1;
/// Encoded header size in bytes.
pub const FRAG_HDR_SIZE: usize = 8;

/// Little-endian packed fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragHeader {
    pub magic: u16,
    /// Per-message sequence (wrap OK).
    pub seq: u8,
    /// 0..frag_cnt-1
    pub frag_idx: u8,
    /// Total fragments, >= 1.
    pub frag_cnt: u8,
    /// bit0 = first, bit1 = last
    pub flags: u8,
    /// Total bytes of the reassembled message.
    pub total_len: u16,
}

impl FragHeader {
    pub fn encode(&self, out: &mut [u8; FRAG_HDR_SIZE]) {
        out[0..2].copy_from_slice(&self.magic.to_le_bytes());
        out[2] = self.seq;
        out[3] = self.frag_idx;
        out[4] = self.frag_cnt;
        out[5] = self.flags;
        out[6..8].copy_from_slice(&self.total_len.to_le_bytes());
    }

    /// Decode from the start of a frame payload. `None` if the payload is
    /// too short to carry a header.
    pub fn decode(bytes: &[u8]) -> Option<FragHeader> {
        if bytes.len() < FRAG_HDR_SIZE {
            return None;
        }
        Some(FragHeader {
            magic: u16::from_le_bytes([bytes[0], bytes[1]]),
            seq: bytes[2],
            frag_idx: bytes[3],
            frag_cnt: bytes[4],
            flags: bytes[5],
            total_len: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }

    /// Field sanity per the receive path: a header failing this is dropped.
    pub fn is_valid(&self) -> bool {
        self.magic == FRAG_MAGIC
            && self.frag_cnt != 0
            && self.frag_idx < self.frag_cnt
            && (self.frag_cnt as usize) <= REASM_MAX_FRAGS
            && self.total_len != 0
            && (self.total_len as usize) <= REASM_MAX_BYTES
    }
}

/// Outcome of feeding one fragment into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragOutcome {
    /// Fragment stored (or duplicate ignored); message still incomplete.
    Consumed,
    /// Fragment inconsistent with the in-flight message; dropped.
    Rejected,
    /// Message complete. Read it with `completed(slot)`, then `reset_slot`.
    Complete(usize),
}

struct ReassemblySlot {
    active: bool,
    std_id: u16,
    seq: u8,
    frag_cnt: u8,
    total_len: u16,
    /// Payload bytes per fragment, fixed from the first fragment seen.
    data_cap: u8,
    last_activity_ms: u64,
    got_mask: u64,
    got_count: u16,
    buf: [u8; REASM_MAX_BYTES],
}

// A u64 bitmap covers every permitted fragment index.
const _: () = assert!(REASM_MAX_FRAGS <= 64);

impl ReassemblySlot {
    const fn new() -> Self {
        Self {
            active: false,
            std_id: 0,
            seq: 0,
            frag_cnt: 0,
            total_len: 0,
            data_cap: 0,
            last_activity_ms: 0,
            got_mask: 0,
            got_count: 0,
            buf: [0; REASM_MAX_BYTES],
        }
    }

    fn reset(&mut self) {
        self.active = false;
        self.std_id = 0;
        self.seq = 0;
        self.frag_cnt = 0;
        self.total_len = 0;
        self.data_cap = 0;
        self.last_activity_ms = 0;
        self.got_mask = 0;
        self.got_count = 0;
        // buf is overwritten by future copies
    }
}

pub struct ReassemblyTable {
    slots: [ReassemblySlot; REASM_SLOTS],
}

impl ReassemblyTable {
    pub fn new() -> Self {
        const SLOT: ReassemblySlot = ReassemblySlot::new();
        Self {
            slots: [SLOT; REASM_SLOTS],
        }
    }

    /// Reset any active slot whose last accepted fragment is older than the
    /// reassembly timeout. Called before each frame is processed.
    pub fn expire_stale(&mut self, now_ms: u64) {
        for s in self.slots.iter_mut() {
            if s.active && now_ms.wrapping_sub(s.last_activity_ms) > REASM_TIMEOUT_MS {
                s.reset();
            }
        }
    }

    /// Locate the slot for (std_id, seq): an active slot for the same ID is
    /// reused (reset first if its sequence changed), else a free slot, else
    /// the stalest slot is evicted.
    fn claim_slot(&mut self, std_id: u16, seq: u8, now_ms: u64) -> usize {
        if let Some(i) = self
            .slots
            .iter()
            .position(|s| s.active && s.std_id == std_id)
        {
            if self.slots[i].seq != seq {
                self.slots[i].reset();
                self.slots[i].active = true;
                self.slots[i].std_id = std_id;
                self.slots[i].seq = seq;
            }
            self.slots[i].last_activity_ms = now_ms;
            return i;
        }

        let idx = match self.slots.iter().position(|s| !s.active) {
            Some(free) => free,
            None => {
                // No free slot: evict the stalest one.
                let mut stalest = 0;
                let mut best_age = 0u64;
                for (i, s) in self.slots.iter().enumerate() {
                    let age = now_ms.wrapping_sub(s.last_activity_ms);
                    if age >= best_age {
                        best_age = age;
                        stalest = i;
                    }
                }
                stalest
            }
        };

        self.slots[idx].reset();
        self.slots[idx].active = true;
        self.slots[idx].std_id = std_id;
        self.slots[idx].seq = seq;
        self.slots[idx].last_activity_ms = now_ms;
        idx
    }

    /// Feed one validated fragment into the table. `payload` is the frame
    /// payload after the header.
    pub fn accept(
        &mut self,
        std_id: u16,
        hdr: &FragHeader,
        payload: &[u8],
        now_ms: u64,
    ) -> FragOutcome {
        debug_assert!(hdr.is_valid());

        let idx = self.claim_slot(std_id, hdr.seq, now_ms);
        let s = &mut self.slots[idx];

        if s.frag_cnt == 0 {
            // Freshly claimed: adopt message parameters. data_cap comes
            // from the first fragment seen, whatever its index.
            s.frag_cnt = hdr.frag_cnt;
            s.total_len = hdr.total_len;
            s.data_cap = payload.len().min(u8::MAX as usize) as u8;
            s.got_mask = 0;
            s.got_count = 0;
        } else if s.frag_cnt != hdr.frag_cnt || s.total_len != hdr.total_len {
            // In-flight message properties must match.
            s.reset();
            return FragOutcome::Rejected;
        }
        // Shorter payloads (typically the last fragment) are tolerated;
        // offset math uses the data_cap established at the first fragment.

        let off = hdr.frag_idx as usize * s.data_cap as usize;
        if off >= s.total_len as usize {
            return FragOutcome::Rejected;
        }
        let take = payload.len().min(s.total_len as usize - off);

        let bit = 1u64 << hdr.frag_idx;
        if s.got_mask & bit == 0 {
            s.got_mask |= bit;
            s.got_count += 1;
            s.buf[off..off + take].copy_from_slice(&payload[..take]);
        }
        // Duplicate fragments are idempotent.

        s.last_activity_ms = now_ms;

        if s.got_count == s.frag_cnt as u16 {
            FragOutcome::Complete(idx)
        } else {
            FragOutcome::Consumed
        }
    }

    /// The reassembled message of a slot reported `Complete`.
    pub fn completed(&self, idx: usize) -> &[u8] {
        let s = &self.slots[idx];
        &s.buf[..s.total_len as usize]
    }

    pub fn reset_slot(&mut self, idx: usize) {
        self.slots[idx].reset();
    }

    /// Number of slots currently collecting a message.
    pub fn active_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }
}

impl Default for ReassemblyTable {
    fn default() -> Self {
        Self::new()
    }
}
