// std on host/tests; no_std when the `std` feature is OFF
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;


use core::fmt;

// ---------- Allocator & panic handlers ----------
// For EMBEDDED builds (no_std + bare-metal target), route all allocations
// through the firmware byte pool (32 KiB, TX_NO_WAIT — see telemetry hooks).
#[cfg(all(not(feature = "std"), target_os = "none"))]
mod embedded_alloc {
    use core::alloc::{GlobalAlloc, Layout};

    extern "C" {
        fn telemetryMalloc(size: usize) -> *mut core::ffi::c_void;
        fn telemetryFree(ptr: *mut core::ffi::c_void);
    }

    pub struct BytePoolAlloc;

    unsafe impl GlobalAlloc for BytePoolAlloc {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            // Pool allocation is non-blocking; null on exhaustion is the
            // degrade signal (callers drop the packet / return Alloc).
            telemetryMalloc(layout.size()) as *mut u8
        }
        unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
            telemetryFree(ptr as *mut _)
        }
    }

    #[global_allocator]
    static A: BytePoolAlloc = BytePoolAlloc;

    use core::panic::PanicInfo;

    #[panic_handler]
    fn panic(_info: &PanicInfo) -> ! {
        loop {
            cortex_m::asm::bkpt()
        }
    }

    // ensure cortex-m only compiles on embedded
    use cortex_m as _;
}

// Firmware console hooks used by die() on bare metal.
#[cfg(all(not(feature = "std"), target_os = "none"))]
extern "C" {
    fn telemetryErrorMsg(msg: *const u8, len: usize);
    fn telemetryDelayMs(ms: u32);
}

// ---------- Portable core modules ----------
pub mod can_bus;
pub mod clock;
pub mod config;
pub mod frame;
pub mod lock;
mod macros;
pub mod queue;
pub mod reassembly;
mod repr_u32;
pub mod ring;
pub mod router;
pub mod schema;
pub mod serialize;
pub mod telemetry_packet;
pub mod timesync;
pub mod worker;

pub use can_bus::CanBus;
pub use clock::TickClock;
pub use config::{DataEndpoint, DataType, ElemKind};
pub use router::{Clock, EndpointHandler, LeBytes, Router, RouterConfig, RouterMode, SideId};
pub use schema::{message_meta, MessageMeta};
pub use serialize::{deserialize_packet, peek_envelope, serialize_packet};
pub use telemetry_packet::TelemetryPacket;
pub use timesync::TimeSyncClient;
pub use worker::TelemetryWorker;

pub(crate) use repr_u32::ReprU32Enum;

// ---------- Error taxonomy ----------

/// Crate-wide error type. Every router and bus API returns one of these;
/// callers decide what to do. ISR paths swallow errors and bump counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    /// Null/zero input or out-of-range length.
    BadArg,
    /// Unknown data-type discriminant.
    InvalidType,
    /// Payload length disagrees with the schema's fixed size.
    SizeMismatch { expected: usize, got: usize },
    /// Bounded queue is at capacity.
    QueueFull,
    /// Byte pool exhausted.
    Alloc,
    /// Unknown endpoint or side.
    NotFound,
    /// Bus transmit failed.
    Io(&'static str),
    /// Malformed wire bytes.
    Deserialize(&'static str),
    /// A registered handler reported failure.
    HandlerError(&'static str),
    /// Invariant violated; should never fire.
    Internal(&'static str),
}

pub type TelemetryResult<T> = core::result::Result<T, TelemetryError>;

/// Convert a raw `u32` discriminant into a `repr(u32)` enum, checking the
/// enum's declared contiguous range first.
pub(crate) fn try_enum_from_u32<T: ReprU32Enum>(x: u32) -> Option<T> {
    if x >= T::MIN && x <= T::MAX {
        // Discriminants are contiguous in [MIN, MAX] and the enum is
        // u32-sized (checked at compile time by impl_repr_u32_enum!).
        Some(unsafe { core::mem::transmute_copy(&x) })
    } else {
        None
    }
}

// ---------- Fatal helper ----------

/// Print a fatal message forever at 1 Hz. Reserved for unrecoverable
/// startup failures; never returns.
pub fn die(args: fmt::Arguments<'_>) -> ! {
    let mut buf = crate::router::BoundedWriter::new();
    let _ = fmt::Write::write_fmt(&mut buf, args);

    #[cfg(feature = "std")]
    loop {
        std::println!("FATAL: {}", buf.as_str());
        std::thread::sleep(std::time::Duration::from_secs(1));
    }

    #[cfg(all(not(feature = "std"), target_os = "none"))]
    loop {
        let s = buf.as_str();
        unsafe {
            telemetryErrorMsg(s.as_ptr(), s.len());
            telemetryDelayMs(1_000);
        }
    }

    // no_std host builds (e.g. miri, wasm) have nowhere to print
    #[cfg(all(not(feature = "std"), not(target_os = "none")))]
    loop {
        core::hint::spin_loop();
    }
}
