// src/router.rs
//! Telemetry router core: side registry, local endpoints, TX/RX queues and
//! the typed logging API.
//!
//! The router is side-aware: bytes arriving from a registered side are
//! tagged with their origin, and Relay/Source forwarding never re-emits to
//! the originating side. All state lives behind an internal mutex so public
//! methods take `&self`; callbacks are invoked with the lock released, so
//! handlers may log back into the router.
//!
//! On single-core targets the internal lock is a spinlock: callers logging
//! from ISR context must mask the bus interrupt around the call, or the ISR
//! can spin against the worker it preempted.

use crate::config::{
    DataType, ElemKind, MAX_ERROR_STRING, MAX_LOCAL_ENDPOINTS, MAX_SIDES, MAX_SIDE_NAME,
    RX_QUEUE_DEPTH, TX_QUEUE_DEPTH,
};
use crate::lock::StateMutex;
use crate::queue::BoundedDeque;
use crate::schema::message_meta;
use crate::serialize::serialize_packet;
use crate::telemetry_packet::TelemetryPacket;
use crate::{config::DataEndpoint, TelemetryError, TelemetryResult};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Logical side index (CAN, UART, RADIO, ...), assigned by the caller in
/// `0..MAX_SIDES`.
pub type SideId = u8;

// -------------------- clock --------------------

pub trait Clock {
    /// Return a monotonically increasing millisecond counter.
    fn now_ms(&self) -> u64;
}

impl<T: Fn() -> u64> Clock for T {
    #[inline]
    fn now_ms(&self) -> u64 {
        self()
    }
}

// -------------------- generic little-endian encoding --------------------

/// Trait for any element type that knows how to encode itself as
/// *little-endian* bytes for the packet payload.
pub trait LeBytes: Copy {
    /// Number of bytes this type occupies in the encoded stream.
    const WIDTH: usize;
    /// Element kind recorded in the packet flags.
    const KIND: ElemKind;
    /// Write the LE representation of `self` into `out` (length = `WIDTH`).
    fn write_le(self, out: &mut [u8]);
    /// Read one value back from an LE slice (length = `WIDTH`).
    fn from_le_slice(bytes: &[u8]) -> Self;
}

crate::impl_letype_num!(u8, 1, ElemKind::Unsigned);
crate::impl_letype_num!(u16, 2, ElemKind::Unsigned);
crate::impl_letype_num!(u32, 4, ElemKind::Unsigned);
crate::impl_letype_num!(u64, 8, ElemKind::Unsigned);
crate::impl_letype_num!(i8, 1, ElemKind::Signed);
crate::impl_letype_num!(i16, 2, ElemKind::Signed);
crate::impl_letype_num!(i32, 4, ElemKind::Signed);
crate::impl_letype_num!(i64, 8, ElemKind::Signed);
crate::impl_letype_num!(f32, 4, ElemKind::Float);
crate::impl_letype_num!(f64, 8, ElemKind::Float);

impl LeBytes for bool {
    const WIDTH: usize = 1;
    const KIND: ElemKind = ElemKind::Bool;

    #[inline]
    fn write_le(self, out: &mut [u8]) {
        out[0] = self as u8;
    }

    #[inline]
    fn from_le_slice(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Encode a slice of `T: LeBytes` to a single contiguous `Vec<u8>` (LE).
pub(crate) fn encode_slice_le<T: LeBytes>(data: &[T]) -> Vec<u8> {
    let mut buf = alloc::vec![0u8; data.len() * T::WIDTH];
    for (i, v) in data.iter().copied().enumerate() {
        let start = i * T::WIDTH;
        v.write_le(&mut buf[start..start + T::WIDTH]);
    }
    buf
}

// -------------------- bounded formatting --------------------

/// Fixed-capacity formatter for error strings. Writes past the cap are
/// silently truncated; formatting never fails.
pub(crate) struct BoundedWriter {
    buf: [u8; MAX_ERROR_STRING],
    len: usize,
}

impl BoundedWriter {
    pub(crate) fn new() -> Self {
        Self {
            buf: [0; MAX_ERROR_STRING],
            len: 0,
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        // Only whole &str chunks are copied in, so this is always UTF-8.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl fmt::Write for BoundedWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let take = s.len().min(MAX_ERROR_STRING - self.len);
        // Truncate on a char boundary so as_str stays valid UTF-8.
        let take = (0..=take).rev().find(|&n| s.is_char_boundary(n)).unwrap_or(0);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

// -------------------- endpoints + sides --------------------

type PacketHandlerFn = Arc<dyn Fn(&TelemetryPacket) -> TelemetryResult<()> + Send + Sync>;
type SerializedHandlerFn = Arc<dyn Fn(&[u8]) -> TelemetryResult<()> + Send + Sync>;
type SideTxFn = Arc<dyn Fn(&[u8]) -> TelemetryResult<()> + Send + Sync>;

/// A sink bound to a local endpoint tag: a packet handler and/or a
/// serialized-form handler. Registered at router construction only.
pub struct EndpointHandler {
    pub endpoint: DataEndpoint,
    packet_handler: Option<PacketHandlerFn>,
    serialized_handler: Option<SerializedHandlerFn>,
}

impl EndpointHandler {
    pub fn new_packet_handler<F>(endpoint: DataEndpoint, f: F) -> Self
    where
        F: Fn(&TelemetryPacket) -> TelemetryResult<()> + Send + Sync + 'static,
    {
        Self {
            endpoint,
            packet_handler: Some(Arc::new(f)),
            serialized_handler: None,
        }
    }

    pub fn new_serialized_handler<F>(endpoint: DataEndpoint, f: F) -> Self
    where
        F: Fn(&[u8]) -> TelemetryResult<()> + Send + Sync + 'static,
    {
        Self {
            endpoint,
            packet_handler: None,
            serialized_handler: Some(Arc::new(f)),
        }
    }
}

/// Board configuration: which local endpoints exist and how to deliver to
/// them.
#[derive(Default)]
pub struct RouterConfig {
    pub handlers: Vec<EndpointHandler>,
}

impl RouterConfig {
    pub fn new(handlers: impl IntoIterator<Item = EndpointHandler>) -> Self {
        Self {
            handlers: handlers.into_iter().collect(),
        }
    }
}

/// One bus attachment. Created once; never destroyed.
struct Side {
    name: &'static str,
    id: SideId,
    tx: SideTxFn,
    /// Reserved; no reliability protocol is implemented behind it.
    #[allow(dead_code)]
    reliable_enabled: bool,
}

/// Router role. Sink terminates ingress traffic; Source and Relay re-emit
/// it to every side except the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterMode {
    Source,
    Sink,
    Relay,
}

// -------------------- router --------------------

enum RxQueueItem {
    Packet(TelemetryPacket),
    Serialized { bytes: Vec<u8>, src: Option<SideId> },
}

struct RouterInner {
    cfg: RouterConfig,
    sides: Vec<Side>,
    rx_queue: BoundedDeque<RxQueueItem>,
    tx_queue: BoundedDeque<TelemetryPacket>,
}

pub struct Router {
    mode: RouterMode,
    clock: Box<dyn Clock + Send + Sync>,
    /// Clock value at construction; default log timestamps are relative to it.
    start_ms: u64,
    state: StateMutex<RouterInner>,
    tx_io_errors: AtomicUsize,
}

impl Router {
    /// Build a router. At most `MAX_LOCAL_ENDPOINTS` handlers are retained.
    pub fn new(mode: RouterMode, mut cfg: RouterConfig, clock: Box<dyn Clock + Send + Sync>) -> Self {
        debug_assert!(cfg.handlers.len() <= MAX_LOCAL_ENDPOINTS);
        cfg.handlers.truncate(MAX_LOCAL_ENDPOINTS);
        let start_ms = clock.now_ms();
        Self {
            mode,
            clock,
            start_ms,
            state: StateMutex::new(RouterInner {
                cfg,
                sides: Vec::with_capacity(MAX_SIDES),
                rx_queue: BoundedDeque::new(RX_QUEUE_DEPTH),
                tx_queue: BoundedDeque::new(TX_QUEUE_DEPTH),
            }),
            tx_io_errors: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn mode(&self) -> RouterMode {
        self.mode
    }

    /// Milliseconds since the router was created.
    pub fn uptime_ms(&self) -> u64 {
        self.clock.now_ms().wrapping_sub(self.start_ms)
    }

    /// Side TX failures swallowed so far (the log call itself succeeds).
    pub fn tx_io_errors(&self) -> usize {
        self.tx_io_errors.load(Ordering::Relaxed)
    }

    // ---------------- sides ----------------

    /// Add a bus attachment. `side_id` is chosen by the caller in
    /// `0..MAX_SIDES` and must be unused; `name` is at most
    /// `MAX_SIDE_NAME` bytes. Failure is non-fatal to the router: it still
    /// accepts logging and untagged RX.
    pub fn add_side_serialized<F>(
        &self,
        name: &'static str,
        side_id: SideId,
        tx: F,
        reliable_enabled: bool,
    ) -> TelemetryResult<SideId>
    where
        F: Fn(&[u8]) -> TelemetryResult<()> + Send + Sync + 'static,
    {
        if name.is_empty() || name.len() > MAX_SIDE_NAME {
            return Err(TelemetryError::BadArg);
        }
        if (side_id as usize) >= MAX_SIDES {
            return Err(TelemetryError::BadArg);
        }
        let mut st = self.state.lock();
        if st.sides.iter().any(|s| s.id == side_id) {
            return Err(TelemetryError::BadArg);
        }
        if st.sides.len() >= MAX_SIDES {
            return Err(TelemetryError::QueueFull);
        }
        st.sides.push(Side {
            name,
            id: side_id,
            tx: Arc::new(tx),
            reliable_enabled,
        });
        Ok(side_id)
    }

    /// Name a side was registered with.
    pub fn side_name(&self, side_id: SideId) -> TelemetryResult<&'static str> {
        self.state
            .lock()
            .sides
            .iter()
            .find(|s| s.id == side_id)
            .map(|s| s.name)
            .ok_or(TelemetryError::NotFound)
    }

    // ---------------- logging API ----------------

    /// Serialize and synchronously emit a typed sample. The element kind is
    /// explicit; `timestamp` of `None` stamps the router's uptime.
    pub fn log_typed(
        &self,
        ty: DataType,
        bytes: &[u8],
        count: usize,
        elem_size: usize,
        kind: ElemKind,
        timestamp: Option<u64>,
        queued: bool,
    ) -> TelemetryResult<()> {
        if count == 0 && message_meta(ty).data_size != 0 {
            return Err(TelemetryError::BadArg);
        }
        if count * elem_size != bytes.len() {
            return Err(TelemetryError::SizeMismatch {
                expected: count * elem_size,
                got: bytes.len(),
            });
        }
        let ts = timestamp.unwrap_or_else(|| self.uptime_ms());
        let pkt = TelemetryPacket::new(ty, kind, elem_size, ts, Arc::<[u8]>::from(bytes))?;
        if queued {
            self.queue_tx(pkt)
        } else {
            self.tx(pkt)
        }
    }

    /// String logging; the payload is silently truncated to the schema's
    /// fixed pad width.
    pub fn log_string(
        &self,
        ty: DataType,
        s: &str,
        timestamp: Option<u64>,
        queued: bool,
    ) -> TelemetryResult<()> {
        let ts = timestamp.unwrap_or_else(|| self.uptime_ms());
        let pkt = TelemetryPacket::from_str(ty, s, ts)?;
        if queued {
            self.queue_tx(pkt)
        } else {
            self.tx(pkt)
        }
    }

    /// Render a formatted error message (capped at `MAX_ERROR_STRING`
    /// bytes, truncated silently) into a `GenericError` packet.
    pub fn log_error(&self, args: fmt::Arguments<'_>, queued: bool) -> TelemetryResult<()> {
        let mut w = BoundedWriter::new();
        let _ = fmt::Write::write_fmt(&mut w, args);
        self.log_string(DataType::GenericError, w.as_str(), None, queued)
    }

    /// Log a typed slice synchronously with the router's clock.
    pub fn log<T: LeBytes>(&self, ty: DataType, data: &[T]) -> TelemetryResult<()> {
        let bytes = encode_slice_le(data);
        self.log_typed(ty, &bytes, data.len(), T::WIDTH, T::KIND, None, false)
    }

    /// Log a typed slice synchronously with an explicit timestamp.
    pub fn log_ts<T: LeBytes>(&self, ty: DataType, timestamp: u64, data: &[T]) -> TelemetryResult<()> {
        let bytes = encode_slice_le(data);
        self.log_typed(ty, &bytes, data.len(), T::WIDTH, T::KIND, Some(timestamp), false)
    }

    /// Enqueue a typed slice into the TX queue and return immediately.
    pub fn log_queue<T: LeBytes>(&self, ty: DataType, data: &[T]) -> TelemetryResult<()> {
        let bytes = encode_slice_le(data);
        self.log_typed(ty, &bytes, data.len(), T::WIDTH, T::KIND, None, true)
    }

    /// Enqueue a typed slice with an explicit timestamp.
    pub fn log_queue_ts<T: LeBytes>(
        &self,
        ty: DataType,
        timestamp: u64,
        data: &[T],
    ) -> TelemetryResult<()> {
        let bytes = encode_slice_le(data);
        self.log_typed(ty, &bytes, data.len(), T::WIDTH, T::KIND, Some(timestamp), true)
    }

    /// Log raw elements, guessing the element kind from `elem_size`
    /// (4 or 8 bytes read as float). A schema-compiler gap kept this alive;
    /// new callers should say what they mean.
    #[deprecated(note = "use log_typed with an explicit ElemKind")]
    pub fn log_sized(
        &self,
        ty: DataType,
        bytes: &[u8],
        count: usize,
        elem_size: usize,
        timestamp: Option<u64>,
        queued: bool,
    ) -> TelemetryResult<()> {
        let kind = match elem_size {
            4 | 8 => ElemKind::Float,
            _ => ElemKind::Unsigned,
        };
        self.log_typed(ty, bytes, count, elem_size, kind, timestamp, queued)
    }

    // ---------------- egress ----------------

    /// Synchronously send a packet: serialize once, transmit on every
    /// eligible side, then deliver to matching local endpoints.
    pub fn tx(&self, pkt: TelemetryPacket) -> TelemetryResult<()> {
        pkt.validate()?;
        let wire = serialize_packet(&pkt);
        self.deliver(&pkt, &wire, true)
    }

    /// Enqueue a packet for a later `process_tx_queue`.
    pub fn queue_tx(&self, pkt: TelemetryPacket) -> TelemetryResult<()> {
        pkt.validate()?;
        self.state.lock().tx_queue.try_push_back(pkt)
    }

    // ---------------- ingress ----------------

    /// Dispatch a received packet. Sink terminates it locally; Source and
    /// Relay also re-emit to every side except the packet's origin.
    pub fn receive(&self, pkt: &TelemetryPacket) -> TelemetryResult<()> {
        pkt.validate()?;
        let wire = serialize_packet(pkt);
        self.deliver(pkt, &wire, self.mode != RouterMode::Sink)
    }

    /// Accept a serialized buffer (from wire) and dispatch it.
    pub fn receive_serialized(&self, bytes: &[u8]) -> TelemetryResult<()> {
        self.receive_serialized_inner(bytes, None)
    }

    /// Same, but tagging the packet's originating side so forwarding never
    /// reflects it back.
    pub fn receive_serialized_from_side(
        &self,
        side_id: SideId,
        bytes: &[u8],
    ) -> TelemetryResult<()> {
        if !self.state.lock().sides.iter().any(|s| s.id == side_id) {
            return Err(TelemetryError::NotFound);
        }
        self.receive_serialized_inner(bytes, Some(side_id))
    }

    fn receive_serialized_inner(&self, bytes: &[u8], src: Option<SideId>) -> TelemetryResult<()> {
        let mut pkt = crate::serialize::deserialize_packet(bytes)?;
        if let Some(s) = src {
            pkt = pkt.with_src_side(s);
        }
        pkt.validate()?;
        // Forward the original wire bytes rather than re-serializing.
        self.deliver(&pkt, bytes, self.mode != RouterMode::Sink)
    }

    /// Queue a received packet for a later `process_rx_queue`.
    pub fn rx_packet_to_queue(&self, pkt: TelemetryPacket) -> TelemetryResult<()> {
        pkt.validate()?;
        self.state.lock().rx_queue.try_push_back(RxQueueItem::Packet(pkt))
    }

    /// Queue received wire bytes. Cheap and safe to call from RX glue.
    pub fn rx_serialized_packet_to_queue(&self, bytes: &[u8]) -> TelemetryResult<()> {
        self.state.lock().rx_queue.try_push_back(RxQueueItem::Serialized {
            bytes: bytes.to_vec(),
            src: None,
        })
    }

    /// Queue received wire bytes tagged with the side they arrived on.
    pub fn rx_serialized_packet_to_queue_from_side(
        &self,
        side_id: SideId,
        bytes: &[u8],
    ) -> TelemetryResult<()> {
        let mut st = self.state.lock();
        if !st.sides.iter().any(|s| s.id == side_id) {
            return Err(TelemetryError::NotFound);
        }
        st.rx_queue.try_push_back(RxQueueItem::Serialized {
            bytes: bytes.to_vec(),
            src: Some(side_id),
        })
    }

    // ---------------- delivery ----------------

    /// Transmit + local dispatch. Side callbacks and endpoint handlers are
    /// invoked with the state lock released. Side `Io` failures bump a
    /// counter and never fail the call; the result reflects local handlers.
    fn deliver(&self, pkt: &TelemetryPacket, wire: &[u8], allow_forward: bool) -> TelemetryResult<()> {
        let (side_txs, handlers) = {
            let st = self.state.lock();
            let side_txs: Vec<SideTxFn> = if allow_forward {
                st.sides
                    .iter()
                    .filter(|s| Some(s.id) != pkt.src_side())
                    .map(|s| s.tx.clone())
                    .collect()
            } else {
                Vec::new()
            };

            let mut handlers: Vec<(Option<PacketHandlerFn>, Option<SerializedHandlerFn>)> =
                Vec::new();
            for &dest in pkt.endpoints() {
                for h in st.cfg.handlers.iter().filter(|h| h.endpoint == dest) {
                    handlers.push((h.packet_handler.clone(), h.serialized_handler.clone()));
                }
                // Unknown endpoint tags drop silently.
            }
            (side_txs, handlers)
        };

        for tx in side_txs {
            if tx(wire).is_err() {
                self.tx_io_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut failed = false;
        for (pf, sf) in handlers {
            if let Some(pf) = pf {
                failed |= pf(pkt).is_err();
            }
            if let Some(sf) = sf {
                failed |= sf(wire).is_err();
            }
        }
        if failed {
            Err(TelemetryError::HandlerError("local handler failed"))
        } else {
            Ok(())
        }
    }

    // ---------------- queue processing ----------------

    fn handle_rx_item(&self, item: RxQueueItem) -> TelemetryResult<()> {
        match item {
            RxQueueItem::Packet(pkt) => self.receive(&pkt),
            RxQueueItem::Serialized { bytes, src } => self.receive_serialized_inner(&bytes, src),
        }
    }

    /// Drain the TX queue fully.
    pub fn process_tx_queue(&self) -> TelemetryResult<()> {
        loop {
            let pkt = { self.state.lock().tx_queue.pop_front() };
            let Some(pkt) = pkt else { break };
            self.tx(pkt)?;
        }
        Ok(())
    }

    /// Drain the RX queue fully.
    pub fn process_rx_queue(&self) -> TelemetryResult<()> {
        loop {
            let item = { self.state.lock().rx_queue.pop_front() };
            let Some(item) = item else { break };
            self.handle_rx_item(item)?;
        }
        Ok(())
    }

    /// Drain the TX queue until empty or the deadline elapses. Work is done
    /// in whole-packet units; nothing in flight is aborted.
    pub fn process_tx_queue_with_timeout(&self, timeout_ms: u32) -> TelemetryResult<()> {
        let start = self.clock.now_ms();
        loop {
            let pkt = { self.state.lock().tx_queue.pop_front() };
            let Some(pkt) = pkt else { break };
            self.tx(pkt)?;
            // wrapping_sub handles u64 rollover gracefully
            if self.clock.now_ms().wrapping_sub(start) >= timeout_ms as u64 {
                break;
            }
        }
        Ok(())
    }

    /// Drain the RX queue until empty or the deadline elapses.
    pub fn process_rx_queue_with_timeout(&self, timeout_ms: u32) -> TelemetryResult<()> {
        let start = self.clock.now_ms();
        loop {
            let item = { self.state.lock().rx_queue.pop_front() };
            let Some(item) = item else { break };
            self.handle_rx_item(item)?;
            if self.clock.now_ms().wrapping_sub(start) >= timeout_ms as u64 {
                break;
            }
        }
        Ok(())
    }

    /// Interleave TX and RX fairly (one pop each per round) until both
    /// queues are empty or the deadline elapses. `timeout_ms == 0` drains
    /// fully, ignoring time.
    pub fn process_all_queues_with_timeout(&self, timeout_ms: u32) -> TelemetryResult<()> {
        let drain_fully = timeout_ms == 0;
        let start = if drain_fully { 0 } else { self.clock.now_ms() };

        loop {
            let mut did_any = false;

            // Pop under the lock, process with it released.
            let pkt = { self.state.lock().tx_queue.pop_front() };
            if let Some(pkt) = pkt {
                self.tx(pkt)?;
                did_any = true;
            }

            let item = { self.state.lock().rx_queue.pop_front() };
            if let Some(item) = item {
                self.handle_rx_item(item)?;
                did_any = true;
            }

            if !did_any {
                break;
            }
            if !drain_fully && self.clock.now_ms().wrapping_sub(start) >= timeout_ms as u64 {
                break;
            }
        }

        Ok(())
    }

    pub fn process_all_queues(&self) -> TelemetryResult<()> {
        self.process_tx_queue()?;
        self.process_rx_queue()
    }

    pub fn clear_queues(&self) {
        let mut st = self.state.lock();
        st.tx_queue.clear();
        st.rx_queue.clear();
    }

    pub fn clear_tx_queue(&self) {
        self.state.lock().tx_queue.clear();
    }

    pub fn clear_rx_queue(&self) {
        self.state.lock().rx_queue.clear();
    }

    pub fn tx_queue_len(&self) -> usize {
        self.state.lock().tx_queue.len()
    }

    pub fn rx_queue_len(&self) -> usize {
        self.state.lock().rx_queue.len()
    }
}
