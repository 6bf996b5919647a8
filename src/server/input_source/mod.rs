//! The OS input source: captures the physical mouse and keyboard, owns the
//! capture/passthrough mode, and emits canonical events on a bounded
//! channel.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
pub use self::linux::InputSource;
#[cfg(target_os = "windows")]
pub use self::windows::InputSource;

/// Events queued towards the control loop. Sends never block; on overflow
/// the newest event is dropped with a warning.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 10_000;
