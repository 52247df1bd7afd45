//! Utility library shared by `rcedit`'s crates: an endian-aware byte cursor, a human-readable size
//! formatter, and a timestamp helper for log lines.
//!
//! By default, this crate only enables modules which do not have any crate dependencies (aside from
//! snafu, which is required for errors).

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
#[allow(unused_imports)]
mod no_std {
    extern crate alloc;
    pub use alloc::boxed::Box;
    pub use alloc::format;
    pub use alloc::string::String;
}

pub mod prelude;

pub mod data;
pub mod util;

#[cfg(feature = "time")]
pub mod time;

