//! `salesdesk sessions`: list sessions or print a transcript.

use salesdesk_client::ChatClient;
use salesdesk_core::message::Role;

pub async fn run(
    url: Option<String>,
    token: String,
    id: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = ChatClient::new(super::gateway_url(url)?, token);

    match id {
        None => {
            let sessions = client.list_sessions().await?;
            if sessions.is_empty() {
                println!("No sessions yet.");
            }
            for s in sessions {
                println!(
                    "{:>6}  {}  {}",
                    s.id,
                    s.created_at.format("%Y-%m-%d %H:%M"),
                    s.title.as_deref().unwrap_or("(untitled)")
                );
            }
        }
        Some(id) => {
            let detail = client.get_session(id).await?;
            println!(
                "# {}",
                detail.session.title.as_deref().unwrap_or("(untitled)")
            );
            for m in detail.messages {
                let who = match m.role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                    _ => continue,
                };
                println!("\n[{who}] {}", m.content);
            }
        }
    }

    Ok(())
}
