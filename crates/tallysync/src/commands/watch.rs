//! Live event stream follower.

use chrono::Local;
use serde_json::json;
use tallysync_core::{DomainEvent, Session, StatusLabel, StatusLevel};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(session: &Session, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(id) = args.company {
        session.credentials().set_selected_company(Some(id));
    }

    let color = output::should_color(global.color);
    let mut events = session.subscribe();
    let mut status = session.watch_status();

    let outcome = session.start().await;
    debug!(%outcome, "watch started");

    // The stream opens asynchronously; skip the pre-start "Offline".
    let initial = match status
        .wait_for(|label| label.level != StatusLevel::Offline)
        .await
    {
        Ok(label) => label.clone(),
        Err(_) => return Ok(()),
    };
    print_status(&initial, global, color)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            interrupted = &mut ctrl_c => {
                interrupted?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let label = status.borrow_and_update().clone();
                print_status(&label, global, color)?;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, global, color)?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "output fell behind the event stream");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn print_status(label: &StatusLabel, global: &GlobalOpts, color: bool) -> Result<(), CliError> {
    let out = match global.output {
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(&json!({
            "type": "status",
            "level": label.level.to_string(),
            "text": label.text,
            "hint": label.hint,
        }))?,
        OutputFormat::Table | OutputFormat::Plain => {
            let mut line = format!(
                "[{}] {}",
                timestamp(),
                output::paint_level(&label.text, label.level, color)
            );
            if let (StatusLevel::Degraded, Some(hint)) = (label.level, label.hint) {
                line.push_str("\n           ");
                line.push_str(hint);
            }
            line
        }
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

fn print_event(event: &DomainEvent, global: &GlobalOpts, color: bool) -> Result<(), CliError> {
    let out = match global.output {
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(event)?,
        OutputFormat::Table | OutputFormat::Plain => {
            let body = match event {
                DomainEvent::SyncCompleted {
                    company_name,
                    record_count,
                    ..
                } => output::paint_level(
                    &format!("Synced {company_name}: {record_count} records"),
                    StatusLevel::Ok,
                    color,
                ),
                DomainEvent::SyncFailed {
                    company_id,
                    message,
                } => {
                    let company = company_id.map_or_else(|| "?".into(), |id| id.to_string());
                    output::paint_level(
                        &format!("Sync failed for company {company}: {message}"),
                        StatusLevel::Degraded,
                        color,
                    )
                }
                DomainEvent::CredentialRotated => "API key changed, reconnecting".to_owned(),
            };
            format!("[{}] {body}", timestamp())
        }
    };
    output::print_output(&out, global.quiet);
    Ok(())
}
