//! Lightweight mutex abstraction shared by the router, bus and clock
//! aggregates.
//!
//! Under the `std` feature this wraps `std::sync::Mutex` and treats
//! poisoning as fatal (`panic!("StateMutex poisoned")`); in `no_std` builds
//! it wraps `spin::Mutex`, which never poisons. Either way public methods
//! on the aggregates can take `&self` and lock internally.

#[cfg(feature = "std")]
pub struct StateMutex<T>(std::sync::Mutex<T>);

#[cfg(feature = "std")]
impl<T> StateMutex<T> {
    #[inline]
    pub fn new(v: T) -> Self {
        Self(std::sync::Mutex::new(v))
    }

    /// Acquire the lock, panicking if the mutex has been poisoned.
    #[inline]
    pub fn lock(&self) -> std::sync::MutexGuard<'_, T> {
        self.0.lock().expect("StateMutex poisoned")
    }
}

#[cfg(not(feature = "std"))]
pub struct StateMutex<T>(spin::Mutex<T>);

#[cfg(not(feature = "std"))]
impl<T> StateMutex<T> {
    #[inline]
    pub fn new(v: T) -> Self {
        Self(spin::Mutex::new(v))
    }

    /// Acquire the lock. `spin::Mutex` never poisons, so this cannot fail.
    #[inline]
    pub fn lock(&self) -> spin::MutexGuard<'_, T> {
        self.0.lock()
    }
}
