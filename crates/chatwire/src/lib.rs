//! An out-of-the-box chat client that wires the streaming session to the
//! WebSocket transport and the HTTP history endpoint.
//!
//! The crate includes a CLI tool for chatting in the terminal. You can also
//! use it as a library to bring the chat session into your own host apps.

#![deny(missing_docs)]

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod session;

pub use chatwire_protocol::{ConvType, Identity, ModelId};
pub use session::SessionBuilder;

/// Re-exports of [`chatwire_core`] crate.
pub mod core {
    pub use chatwire_core::*;
}
