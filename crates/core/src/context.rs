//! Prompt context assembly.
//!
//! Instead of replaying full history, each turn is seeded with the footers
//! of the last few assistant answers: their summaries and the entity ids
//! they touched.

use chrono::SecondsFormat;
use std::fmt::Write;

use crate::message::Role;
use crate::metadata::Metadata;
use crate::session::ChatMessage;

/// How many prior footers feed a prompt by default.
pub const DEFAULT_CONTEXT_WINDOW: usize = 3;

/// Build the context string from a session's messages in chronological order.
///
/// Only assistant messages whose metadata parses are considered; at most the
/// last `window` of them contribute.
pub fn build_context(messages: &[ChatMessage], window: usize) -> String {
    let selected: Vec<(&ChatMessage, Metadata)> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .filter_map(|m| {
            let raw = m.metadata.as_deref()?;
            Metadata::parse(raw).ok().map(|meta| (m, meta))
        })
        .collect();

    let skip = selected.len().saturating_sub(window);
    let mut context = String::new();

    for (message, metadata) in &selected[skip..] {
        if !metadata.context.is_empty() {
            let at = message.created_at.to_rfc3339_opts(SecondsFormat::Millis, true);
            let _ = write!(context, "Message log at: {at}\n\n{}\n\n", metadata.context);
        }
        if let Some(id) = metadata.account_id {
            let _ = writeln!(context, "Account: {id}");
        }
        if let Some(id) = metadata.order_id {
            let _ = writeln!(context, "Order: {id}");
        }
        if let Some(id) = metadata.email_id {
            let _ = writeln!(context, "Email: {id}");
        }
        context.push('\n');
    }

    context
}
