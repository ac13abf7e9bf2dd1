//! Stdio subprocess transport.
//!
//! A [`StreamSession`] owns one backend process and exposes its JSON-RPC
//! stream as an ordered sequence of [`SessionEvent`]s.

pub mod env;
mod events;
pub mod framing;
mod lifecycle;
mod stdio;

pub use events::{SessionEvent, Subscription};
pub use lifecycle::{SessionState, ShutdownRequest, shutdown_process};
pub use stdio::StreamSession;
