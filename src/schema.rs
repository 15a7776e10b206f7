// src/schema.rs
//! User-editable "schema" describing each message type:
//! - element kind and size
//! - total byte size (fixed pad width for strings)
//! - default destination endpoints

use crate::config::{DataEndpoint, DataType, ElemKind};

#[derive(Debug, Clone, Copy)]
pub struct MessageMeta {
    pub ty: DataType,
    pub kind: ElemKind,
    /// Bytes per element (1 for strings and raw bytes).
    pub elem_size: usize,
    pub elem_count: usize,
    /// Total payload bytes. For strings this is the fixed pad width; shorter
    /// payloads are accepted and the sink pads/truncates as needed.
    pub data_size: usize,
    pub endpoints: &'static [DataEndpoint],
}

const TELEM_ENDPOINTS: &[DataEndpoint] = &[DataEndpoint::SdCard, DataEndpoint::Radio];
const LOCAL_ONLY: &[DataEndpoint] = &[DataEndpoint::SdCard];
const TIMESYNC_ENDPOINTS: &[DataEndpoint] = &[DataEndpoint::TimeSync];

pub const MESSAGE_TYPES: [MessageMeta; DataType::COUNT] = [
    MessageMeta {
        ty: DataType::GpsData,
        kind: ElemKind::Float,
        elem_size: 4,
        elem_count: 3,
        data_size: 12,
        endpoints: TELEM_ENDPOINTS,
    },
    MessageMeta {
        ty: DataType::ImuData,
        kind: ElemKind::Float,
        elem_size: 4,
        elem_count: 6,
        data_size: 24,
        endpoints: TELEM_ENDPOINTS,
    },
    MessageMeta {
        ty: DataType::BatteryStatus,
        kind: ElemKind::Float,
        elem_size: 4,
        elem_count: 2,
        data_size: 8,
        endpoints: TELEM_ENDPOINTS,
    },
    MessageMeta {
        ty: DataType::SystemStatus,
        kind: ElemKind::Bool,
        elem_size: 1,
        elem_count: 8,
        data_size: 8,
        endpoints: LOCAL_ONLY,
    },
    MessageMeta {
        ty: DataType::BarometerData,
        kind: ElemKind::Float,
        elem_size: 4,
        elem_count: 3,
        data_size: 12,
        endpoints: TELEM_ENDPOINTS,
    },
    MessageMeta {
        ty: DataType::MessageData,
        kind: ElemKind::String,
        elem_size: 1,
        elem_count: 64,
        data_size: 64,
        endpoints: TELEM_ENDPOINTS,
    },
    MessageMeta {
        ty: DataType::GenericError,
        kind: ElemKind::String,
        elem_size: 1,
        elem_count: 512,
        data_size: 512,
        endpoints: TELEM_ENDPOINTS,
    },
    MessageMeta {
        ty: DataType::Heartbeat,
        kind: ElemKind::Unsigned,
        elem_size: 1,
        elem_count: 0,
        data_size: 0,
        endpoints: TELEM_ENDPOINTS,
    },
    MessageMeta {
        ty: DataType::TimeSyncRequest,
        kind: ElemKind::Unsigned,
        elem_size: 8,
        elem_count: 2,
        data_size: 16,
        endpoints: TIMESYNC_ENDPOINTS,
    },
    MessageMeta {
        ty: DataType::TimeSyncResponse,
        kind: ElemKind::Unsigned,
        elem_size: 8,
        elem_count: 4,
        data_size: 32,
        endpoints: TIMESYNC_ENDPOINTS,
    },
];

#[inline]
pub fn message_meta(ty: DataType) -> &'static MessageMeta {
    &MESSAGE_TYPES[ty as usize]
}
