//! # SalesDesk Client
//!
//! The consuming side of the chat stream. Bytes from the transport go
//! through a [`LineFramer`], each complete line is decoded into a
//! [`Frame`](salesdesk_core::Frame) and folded into an explicit
//! [`ChatState`]. Anything outside the transcript comes back as an
//! [`Effect`] for the embedding UI.

pub mod consumer;
pub mod framer;
pub mod state;

pub use consumer::{ChatClient, ClientError, DriveOutcome, UiHost, drive};
pub use framer::LineFramer;
pub use salesdesk_core::session::{SessionDetail, SessionSummary};
pub use state::{ChatState, Effect, EntryRole, Panel, Phase, TranscriptEntry, panel_transition};
