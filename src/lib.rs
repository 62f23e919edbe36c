//! Key release inference for POSIX terminals.
//!
//! A terminal delivers key *presses* only. While a key is held, the OS
//! auto-repeat machinery re-delivers the press at a known cadence, and the
//! release itself is never reported. This crate turns that cadence into a
//! release signal: if a held key's next repeat fails to arrive within its
//! expected window, the key must have been let go, and a synthetic `Up`
//! event is emitted at the moment the window closed.
//!
//! The timing model lives in [`RepeatPolicy`], the per-key state machine in
//! [`KeyTracker`], and the terminal event loop which drives them both in
//! [`Session`]. The tracker is deliberately free of any I/O or clock of its
//! own - callers supply every timestamp - so it can be driven from a real
//! terminal, a replayed capture, or a test with equal ease.
//!
//! # Example
//!
//! ```no_run
//! use ::std::ops::ControlFlow;
//! use ::unpress::{KeyEvent, Session};
//!
//! let session = Session::builder().build().unwrap();
//! session
//!     .run(|event| {
//!         if let KeyEvent::Up { key, .. } = event {
//!             println!("{key:?} released\r");
//!         }
//!         ControlFlow::Continue(())
//!     })
//!     .unwrap();
//! ```

pub mod errors;
pub mod input;
pub mod session;
pub mod term;

pub use errors::{Error, Result};
pub use input::keyboard::{EventKind, KeyEvent, KeyTracker, Phase, RepeatPolicy};
pub use session::{capture_press_samples, Builder, Session};
pub use term::{Decoder, Key};
