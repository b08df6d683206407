//! Kernel settings changed for the duration of a run
//!
//! Both controls follow the same discipline: capture the current value,
//! override it, and put the captured value back when the guard is restored
//! or dropped, whether the run succeeded or not.

pub mod mux;
pub mod watchdog;

pub use mux::MuxIntervalGuard;
pub use watchdog::WatchdogGuard;
