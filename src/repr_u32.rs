/// Trait for enums represented as `u32` in serialized form. Discriminants
/// must be contiguous in `[MIN, MAX]`.
pub trait ReprU32Enum: Copy + Sized {
    const MIN: u32;
    const MAX: u32;
}

/// Implement the trait and do the compile-time size check.
#[macro_export]
macro_rules! impl_repr_u32_enum {
    ($ty:ty, $min:expr, $max:expr) => {
        // Compile-time size check for this concrete type.
        const _: [(); size_of::<$ty>()] = [(); size_of::<u32>()];

        impl ReprU32Enum for $ty {
            const MIN: u32 = $min;
            const MAX: u32 = $max;
        }
    };
}
