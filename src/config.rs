// src/config.rs
//! Compile-time configuration knobs and the wire-visible enums.

use crate::{impl_repr_u32_enum, ReprU32Enum};
use core::mem::size_of;

/// Identity embedded in diagnostics produced by this node.
pub const DEVICE_IDENTIFIER: &str = "CONTROL_UNIT";

// ---- CAN layer ----
/// ISR->worker ring depth. Must be a power of two.
pub const RX_RING_DEPTH: usize = 64;
/// Concurrent partial-message reassembly slots.
pub const REASM_SLOTS: usize = 4;
/// Largest reassembled message in bytes.
pub const REASM_MAX_BYTES: usize = 2048;
/// Largest fragment count a peer may send us.
pub const REASM_MAX_FRAGS: usize = 64;
/// Partial messages idle longer than this are discarded.
pub const REASM_TIMEOUT_MS: u64 = 250;
/// Fragment frames always go out as fixed 64-byte FD payloads.
pub const FRAG_WIRE_LEN: usize = 64;
/// Raw-RX fanout table size.
pub const MAX_SUBSCRIBERS: usize = 8;

// ---- Router ----
pub const MAX_SIDES: usize = 8;
pub const MAX_SIDE_NAME: usize = 7;
pub const MAX_LOCAL_ENDPOINTS: usize = 16;
pub const TX_QUEUE_DEPTH: usize = 32;
pub const RX_QUEUE_DEPTH: usize = 32;
/// Per-iteration budget the worker grants `process_all_queues_with_timeout`.
pub const QUEUE_SERVICE_BUDGET_MS: u32 = 5;
/// Formatted error strings are capped at this many bytes (silent truncation).
pub const MAX_ERROR_STRING: usize = 512;

// ---- Time sync ----
/// How often this node requests a resync from the master.
pub const TIMESYNC_REQUEST_PERIOD_MS: u64 = 2_000;
/// Corrections larger than this are discarded (spoof / bad reply guard).
pub const TIMESYNC_MAX_OFFSET_MS: i64 = 30_000;

// ---- Enums ----

/// A terminal destination inside the node, identified by a small tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum DataEndpoint {
    SdCard = 1,
    TimeSync = 2,
    Radio = 3,
}

pub const MAX_VALUE_DATA_ENDPOINT: u32 = DataEndpoint::Radio as u32;
impl_repr_u32_enum!(DataEndpoint, DataEndpoint::SdCard as u32, MAX_VALUE_DATA_ENDPOINT);

impl DataEndpoint {
    pub const ALL: &'static [Self] = &[Self::SdCard, Self::TimeSync, Self::Radio];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            DataEndpoint::SdCard => "SD_CARD",
            DataEndpoint::TimeSync => "TIME_SYNC",
            DataEndpoint::Radio => "RADIO",
        }
    }

    pub fn try_from_u32(x: u32) -> Option<Self> {
        crate::try_enum_from_u32(x)
    }
}

/// Message type tags assigned by the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    GpsData = 0,
    ImuData = 1,
    BatteryStatus = 2,
    SystemStatus = 3,
    BarometerData = 4,
    MessageData = 5,
    GenericError = 6,
    Heartbeat = 7,
    TimeSyncRequest = 8,
    TimeSyncResponse = 9,
}

pub const MAX_VALUE_DATA_TYPE: u32 = DataType::TimeSyncResponse as u32;
impl_repr_u32_enum!(DataType, 0, MAX_VALUE_DATA_TYPE);

impl DataType {
    pub const COUNT: usize = (MAX_VALUE_DATA_TYPE + 1) as usize;

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::GpsData => "GPS_DATA",
            DataType::ImuData => "IMU_DATA",
            DataType::BatteryStatus => "BATTERY_STATUS",
            DataType::SystemStatus => "SYSTEM_STATUS",
            DataType::BarometerData => "BAROMETER_DATA",
            DataType::MessageData => "MESSAGE_DATA",
            DataType::GenericError => "GENERIC_ERROR",
            DataType::Heartbeat => "HEARTBEAT",
            DataType::TimeSyncRequest => "TIME_SYNC_REQUEST",
            DataType::TimeSyncResponse => "TIME_SYNC_RESPONSE",
        }
    }

    pub fn try_from_u32(x: u32) -> Option<Self> {
        crate::try_enum_from_u32(x)
    }
}

/// Element interpretation carried in the serialized packet flags (3 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ElemKind {
    Unsigned = 0,
    Signed = 1,
    Float = 2,
    Bool = 3,
    String = 4,
}

pub const MAX_VALUE_ELEM_KIND: u32 = ElemKind::String as u32;
impl_repr_u32_enum!(ElemKind, 0, MAX_VALUE_ELEM_KIND);

impl ElemKind {
    pub fn try_from_u32(x: u32) -> Option<Self> {
        crate::try_enum_from_u32(x)
    }
}
