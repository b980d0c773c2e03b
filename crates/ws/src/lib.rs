//! Network collaborators of the chat session: a WebSocket [`Transport`]
//! and an HTTP [`HistorySource`].
//!
//! [`Transport`]: chatwire_protocol::Transport
//! [`HistorySource`]: chatwire_protocol::HistorySource

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod config;
mod history;
mod socket;

pub use config::{HistoryConfig, HistoryConfigBuilder};
pub use history::HttpHistorySource;
pub use socket::WsTransport;
