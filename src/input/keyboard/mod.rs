//! Key press tracking and release inference.

mod event;
mod policy;
mod tracker;

pub use event::*;
pub use policy::*;
pub use tracker::*;
