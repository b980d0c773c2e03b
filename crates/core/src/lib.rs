//! Streaming chat session: connection lifecycle, fragment reassembly,
//! keepalive and transcript merging.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod config;
mod error;
mod history_client;
pub mod keepalive;
pub mod reassembler;
mod session;
pub mod transcript;

pub use error::SessionDeadError;
pub use session::{
    Notice, Phase, SendOutcome, Session, SessionBuilder, SessionSnapshot,
    TranscriptEvent,
};
