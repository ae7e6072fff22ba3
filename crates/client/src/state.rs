//! Chat UI state and the frame reducer.
//!
//! All state lives in an explicit [`ChatState`] owned by the caller. Frames
//! are applied one at a time; anything that reaches outside the transcript
//! (navigation, cache invalidation, sidebar) comes back as an [`Effect`]
//! for the host to carry out.

use salesdesk_core::frame::{Frame, FrameError};
use salesdesk_core::metadata::{Metadata, MetadataParse};
use salesdesk_core::session::SessionId;
use tracing::debug;

/// The side panel. Order and email panels are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Panel {
    #[default]
    Closed,
    Order {
        id: i64,
    },
    Email {
        id: i64,
    },
}

/// Where the panel goes after a footer arrives, and what the host must do.
///
/// Unrelated intents, or related intents without the matching id, leave the
/// panel as it is.
pub fn panel_transition(current: Panel, metadata: &Metadata) -> (Panel, Vec<Effect>) {
    let intent = &metadata.intent;
    let mut effects = Vec::new();

    if intent.opens_order_panel()
        && let Some(id) = metadata.order_id
    {
        if intent.invalidates_order() {
            effects.push(Effect::InvalidateOrder(id));
        }
        effects.push(Effect::CloseSidebar);
        return (Panel::Order { id }, effects);
    }

    if intent.opens_email_panel()
        && let Some(id) = metadata.email_id
    {
        effects.push(Effect::CloseSidebar);
        return (Panel::Email { id }, effects);
    }

    (current, effects)
}

/// Side effects the host performs on the reducer's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The exchange now belongs to this session.
    BindSession(SessionId),
    /// Replace the current location without reloading.
    Navigate(String),
    /// Drop any cached copy of this order.
    InvalidateOrder(i64),
    /// Reload the caller's session list.
    RefreshSessions,
    /// Collapse the navigation sidebar to make room for a panel.
    CloseSidebar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRole {
    User,
    Assistant,
    /// A failure shown inline in the transcript.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub role: EntryRole,
    pub content: String,
    /// Raw footer, attached to assistant entries.
    pub metadata: Option<String>,
}

impl TranscriptEntry {
    fn new(role: EntryRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: None,
        }
    }

    /// Best-effort parse of the attached footer, for display.
    pub fn parsed_metadata(&self) -> Metadata {
        self.metadata
            .as_deref()
            .map(Metadata::parse_lenient)
            .unwrap_or_default()
    }
}

/// Everything the chat view renders.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub session_id: Option<SessionId>,
    pub phase: Phase,
    pub transcript: Vec<TranscriptEntry>,
    pub panel: Panel,
    /// Whether the running exchange started without a persisted session.
    started_unbound: bool,
    /// Index of the assistant entry the running exchange writes into.
    placeholder: Option<usize>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for an existing session, e.g. after loading `/chat/<id>`.
    pub fn for_session(session_id: SessionId) -> Self {
        Self {
            session_id: Some(session_id),
            ..Self::default()
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.phase == Phase::Streaming
    }

    /// `IDLE → STREAMING`: show the user's message and start an exchange.
    pub fn begin_exchange(&mut self, message: &str) {
        self.transcript
            .push(TranscriptEntry::new(EntryRole::User, message));
        self.phase = Phase::Streaming;
        self.started_unbound = self.session_id.is_none();
        self.placeholder = None;
    }

    /// Apply one decoded frame.
    pub fn apply(&mut self, frame: Frame) -> Vec<Effect> {
        match frame {
            Frame::Status { session_id, .. } => {
                let mut effects = vec![Effect::BindSession(session_id)];
                if self.session_id.is_none() {
                    effects.push(Effect::Navigate(format!("/chat/{session_id}")));
                }
                self.session_id = Some(session_id);
                effects
            }
            Frame::Delta { content } => {
                self.assistant_entry().content.push_str(&content);
                Vec::new()
            }
            Frame::Metadata { content } => {
                let metadata = match MetadataParse::from_raw(&content) {
                    MetadataParse::Ok(metadata) => Some(metadata),
                    MetadataParse::InvalidPayload(reason) => {
                        debug!(reason = %reason, "Footer is not valid JSON, showing it as is");
                        None
                    }
                    MetadataParse::MissingDelimiters => None,
                };
                self.assistant_entry().metadata = Some(content);

                match metadata {
                    Some(metadata) => {
                        let (panel, effects) = panel_transition(self.panel, &metadata);
                        self.panel = panel;
                        effects
                    }
                    None => Vec::new(),
                }
            }
            Frame::Error { content } => {
                self.transcript
                    .push(TranscriptEntry::new(EntryRole::Error, content));
                Vec::new()
            }
        }
    }

    /// A line that could not be decoded: show it inline and carry on.
    pub fn apply_parse_error(&mut self, error: &FrameError) -> Vec<Effect> {
        self.transcript
            .push(TranscriptEntry::new(EntryRole::Error, error.to_string()));
        Vec::new()
    }

    /// The request failed before any frame arrived.
    pub fn fail_exchange(&mut self, message: impl Into<String>) -> Vec<Effect> {
        self.transcript
            .push(TranscriptEntry::new(EntryRole::Error, message));
        self.end_exchange()
    }

    /// `STREAMING → IDLE` on stream close.
    pub fn end_exchange(&mut self) -> Vec<Effect> {
        self.phase = Phase::Idle;
        self.placeholder = None;
        if std::mem::take(&mut self.started_unbound) {
            vec![Effect::RefreshSessions]
        } else {
            Vec::new()
        }
    }

    /// Open the order panel from a user click on an order badge.
    pub fn open_order(&mut self, id: i64) -> Vec<Effect> {
        self.panel = Panel::Order { id };
        vec![Effect::CloseSidebar]
    }

    /// Open the email panel from a user click on an email badge.
    pub fn open_email(&mut self, id: i64) -> Vec<Effect> {
        self.panel = Panel::Email { id };
        vec![Effect::CloseSidebar]
    }

    pub fn close_panel(&mut self) {
        self.panel = Panel::Closed;
    }

    /// The running exchange's assistant entry, created on first use.
    fn assistant_entry(&mut self) -> &mut TranscriptEntry {
        let index = match self.placeholder {
            Some(index) => index,
            None => {
                self.transcript
                    .push(TranscriptEntry::new(EntryRole::Assistant, String::new()));
                let index = self.transcript.len() - 1;
                self.placeholder = Some(index);
                index
            }
        };
        &mut self.transcript[index]
    }

    /// The assistant text of the running (or last) exchange.
    pub fn current_answer(&self) -> Option<&TranscriptEntry> {
        self.placeholder.map(|i| &self.transcript[i]).or_else(|| {
            self.transcript
                .iter()
                .rev()
                .find(|e| e.role == EntryRole::Assistant)
        })
    }
}
