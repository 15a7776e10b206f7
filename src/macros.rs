//! Crate macros: little-endian element impls and the error/fatal logging
//! front-ends.

/// Implement [`LeBytes`](crate::router::LeBytes) for a primitive numeric
/// type.
#[macro_export]
macro_rules! impl_letype_num {
    ($t:ty, $w:expr, $kind:expr) => {
        impl LeBytes for $t {
            const WIDTH: usize = $w;
            const KIND: ElemKind = $kind;

            #[inline]
            fn write_le(self, out: &mut [u8]) {
                assert_eq!(out.len(), Self::WIDTH, "write_le: wrong out slice len");
                out.copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn from_le_slice(bytes: &[u8]) -> Self {
                assert_eq!(bytes.len(), Self::WIDTH, "from_le_slice: wrong slice len");
                let arr: [u8; $w] = bytes.try_into().expect("slice length mismatch");
                <$t>::from_le_bytes(arr)
            }
        }
    };
}

/// Format and enqueue a `GENERIC_ERROR` packet (capped at 512 bytes,
/// truncated silently).
#[macro_export]
macro_rules! log_error {
    ($router:expr, $($arg:tt)*) => {
        $router.log_error(core::format_args!($($arg)*), true)
    };
}

/// Same as [`log_error!`] but transmitted synchronously.
#[macro_export]
macro_rules! log_error_sync {
    ($router:expr, $($arg:tt)*) => {
        $router.log_error(core::format_args!($($arg)*), false)
    };
}

/// Fatal: print the message forever at 1 Hz. Never returns.
#[macro_export]
macro_rules! die {
    ($($arg:tt)*) => {
        $crate::die(core::format_args!($($arg)*))
    };
}
