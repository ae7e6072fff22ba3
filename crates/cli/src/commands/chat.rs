//! `salesdesk chat`: stream one exchange to the terminal.

use salesdesk_client::{ChatClient, ChatState, DriveOutcome, Effect, Panel, UiHost};
use salesdesk_core::metadata::Metadata;
use std::io::Write;

/// Prints the answer as it arrives and reports UI transitions on stderr.
struct TerminalHost;

impl UiHost for TerminalHost {
    fn effect(&mut self, effect: Effect) {
        match effect {
            Effect::BindSession(id) => tracing::debug!(session_id = id, "Bound to session"),
            Effect::Navigate(path) => eprintln!("[session] {path}"),
            Effect::InvalidateOrder(id) => eprintln!("[order {id}] cached data is stale"),
            Effect::RefreshSessions => eprintln!("[sessions] list changed"),
            Effect::CloseSidebar => {}
        }
    }

    fn delta(&mut self, content: &str) {
        print!("{content}");
        let _ = std::io::stdout().flush();
    }

    fn notice(&mut self, message: &str) {
        eprintln!("\n[error] {message}");
    }

    fn panel(&mut self, panel: Panel) {
        match panel {
            Panel::Order { id } => eprintln!("\n[panel] order {id}"),
            Panel::Email { id } => eprintln!("\n[panel] email {id}"),
            Panel::Closed => eprintln!("\n[panel] closed"),
        }
    }
}

pub async fn run(
    url: Option<String>,
    token: String,
    session: Option<i64>,
    message: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = ChatClient::new(super::gateway_url(url)?, token);
    let mut state = match session {
        Some(id) => ChatState::for_session(id),
        None => ChatState::new(),
    };

    let outcome = client
        .stream_chat(&mut state, &message, None, &mut TerminalHost)
        .await?;
    println!();

    if let Some(answer) = state.current_answer()
        && answer.metadata.is_some()
    {
        let Metadata {
            intent, actions, ..
        } = answer.parsed_metadata();
        eprintln!("[intent] {intent}");
        for action in actions {
            eprintln!("[action] {}", action.cta);
        }
    }

    match outcome {
        DriveOutcome::Completed => Ok(()),
        DriveOutcome::Failed(message) | DriveOutcome::Interrupted(message) => Err(message.into()),
    }
}
