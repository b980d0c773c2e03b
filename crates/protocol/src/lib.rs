//! Wire-level contracts shared by the chat session and its collaborators.
//!
//! This crate defines what travels over the socket (outbound turns,
//! liveness probes, inbound fragments), what the history endpoint
//! returns, and the seams that the session talks through: [`Transport`]
//! for the bidirectional connection and [`HistorySource`] for the
//! one-shot history backfill.
//!
//! Types in this crate carry no session behavior. Reassembly, reconnect
//! policy and transcript merging live in `chatwire-core`.

#![deny(missing_docs)]

mod connection;
mod error;
mod history;
mod id;
mod identity;
mod payload;
mod transport;

pub use connection::*;
pub use error::*;
pub use history::*;
pub use id::*;
pub use identity::*;
pub use payload::*;
pub use transport::*;
