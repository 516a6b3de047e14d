//! Architecture-specific stack switch.

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use x86_64::{Context, context_switch, entry_argument};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64::{Context, context_switch, entry_argument};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("costack supports x86_64 and aarch64 only");

#[cfg(not(unix))]
compile_error!("costack needs a Unix memory mapping API");
