//! The OS input sink: replays received events on this machine.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
pub use self::linux::start;
#[cfg(target_os = "windows")]
pub use self::windows::start;
