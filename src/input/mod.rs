//! Input and state handling for keyboard press events.

pub mod keyboard;
