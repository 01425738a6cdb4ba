//! Utility functions shared by the engine and the ProjFS binding.

pub mod compare;
pub mod path;

#[cfg(target_os = "windows")]
pub mod filetime;
#[cfg(target_os = "windows")]
pub mod wstr;

pub use compare::CaseSensitivity;
