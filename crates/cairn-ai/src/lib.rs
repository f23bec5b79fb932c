//! cairn-ai: provider-agnostic LLM message types and streaming adapters
//!
//! The agent runtime only ever sees [`Message`] histories going in and
//! [`ProviderEvent`] streams coming out. Everything wire-specific lives in
//! [`providers`].

pub mod error;
pub mod models;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::{ProviderEvent, ProviderEventStream, ReplyBuilder};
pub use types::*;
