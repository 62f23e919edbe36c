//! Terminal plumbing: raw mode management and byte decoding.
//!
//! Nothing in this module knows about release inference. It exists to supply
//! the tracker with a clean stream of decoded key presses and to guarantee
//! the terminal is restored no matter how the host exits.

mod decode;
mod raw;

pub use decode::*;
pub use raw::*;
