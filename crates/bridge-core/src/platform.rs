//! Platform abstraction traits for the bridge runtime.
//!
//! The runtime never spawns threads or reads the system clock on its own.
//! The host decides when the runtime gets a turn and what time it is, which
//! keeps the core usable from an embedded event loop as well as from tests
//! that drive time by hand.

/// Schedules turns for the bridge runtime.
///
/// Implementations are responsible for eventually calling
/// [`Runtime::pump`](crate::Runtime::pump) on the thread that owns the
/// runtime after `schedule_turn` was invoked.
pub trait RuntimeScheduler: Send + Sync {
    /// Request that the host give the runtime a turn.
    fn schedule_turn(&self);
}

/// Provides timing information for the runtime.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since an arbitrary, fixed origin.
    fn now_millis(&self) -> u64;
}
