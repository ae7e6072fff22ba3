//! Lazy session titles.

use salesdesk_core::error::Error;
use salesdesk_core::message::Message;
use salesdesk_core::provider::{Provider, ProviderRequest};
use salesdesk_core::session::{SessionId, SessionStore, transcript};
use std::sync::Arc;
use tracing::{debug, info};

const TITLE_INSTRUCTION: &str = "Generate a 3 to 4 word title for the following chat session, \
do not include any special characters except for spaces: ";

/// Titles are short; anything longer is the model ignoring the instruction.
const MAX_TITLE_CHARS: usize = 80;

/// Computes a session title with one low-cost completion.
#[derive(Clone)]
pub struct TitleGenerator {
    provider: Arc<dyn Provider>,
    model: String,
}

impl TitleGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Give the session a title if it has none.
    ///
    /// Returns the title this call wrote, or `None` when the session was
    /// already titled (before or during generation). Concurrent callers may
    /// both generate; only the first write sticks.
    pub async fn ensure_title(
        &self,
        store: &dyn SessionStore,
        session_id: SessionId,
    ) -> Result<Option<String>, Error> {
        let Some(session) = store.get_session(session_id).await? else {
            return Ok(None);
        };
        if session.title.is_some() {
            return Ok(None);
        }

        let messages = store.list_messages(session_id).await?;
        let transcript = transcript(&messages);
        if transcript.trim().is_empty() {
            return Ok(None);
        }

        let response = self
            .provider
            .complete(ProviderRequest {
                model: self.model.clone(),
                messages: vec![Message::user(format!("{TITLE_INSTRUCTION}{transcript}"))],
                temperature: 0.0,
                max_tokens: Some(32),
                tools: Vec::new(),
                stream: false,
            })
            .await?;

        let title = sanitize(&response.message.content);
        if title.is_empty() {
            debug!(session_id, "Title model returned nothing usable");
            return Ok(None);
        }

        if store.set_title_if_unset(session_id, &title).await? {
            info!(session_id, title = %title, "Session titled");
            Ok(Some(title))
        } else {
            debug!(session_id, "Session was titled concurrently, discarding");
            Ok(None)
        }
    }
}

/// Keep letters, digits and single spaces.
fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut title = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some((cut, _)) = title.char_indices().nth(MAX_TITLE_CHARS) {
        title.truncate(cut);
        title = title.trim_end().to_string();
    }
    title
}
