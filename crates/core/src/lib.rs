//! # SalesDesk Core
//!
//! Domain types, traits, and error definitions for the SalesDesk chat
//! assistant. This crate has **no framework dependencies**: it defines the
//! model that the store, orchestrator, gateway and client crates all build on.
//!
//! ## Layout
//!
//! - [`session`]: chat sessions, persisted messages and the `SessionStore` trait
//! - [`provider`] / [`tool`]: the external model runtime and tool registry seams
//! - [`frame`]: the newline-delimited wire protocol between server and client
//! - [`metadata`]: the structured footer the model appends to its answer
//! - [`context`]: prompt context assembly from recent footers

pub mod context;
pub mod error;
pub mod frame;
pub mod identity;
pub mod message;
pub mod metadata;
pub mod provider;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use context::{DEFAULT_CONTEXT_WINDOW, build_context};
pub use error::{Error, ExchangeError, Result};
pub use frame::{Frame, FrameError};
pub use identity::{IdentityResolver, Owner, UserDirectory};
pub use message::{Message, MessageToolCall, Role};
pub use metadata::{Intent, Metadata, MetadataParse, MetadataTags};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use session::{
    ChatMessage, NewMessage, Session, SessionDetail, SessionId, SessionStore, SessionSummary,
};
pub use tool::{Tool, ToolCall, ToolProvider, ToolRegistry, ToolResult};
