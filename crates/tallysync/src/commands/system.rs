//! Unauthenticated probes and manual key recovery.

use tallysync_core::{BootstrapOutcome, Session};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

pub async fn info(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let info = session.info().await?;
    let backend = session.credential().backend_url.to_string();

    let out = output::render_single(
        global.output,
        &info,
        |i| {
            output::render_detail(&[
                ("Backend", backend.clone()),
                ("Name", i.name.clone().unwrap_or_default()),
                ("Version", i.version.clone().unwrap_or_default()),
                ("Build", i.build.clone().unwrap_or_default()),
                ("Database", i.db_path.clone().unwrap_or_default()),
            ])
        },
        |i| i.version.clone().unwrap_or_default(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn health(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let health = session.health().await?;

    let out = output::render_single(
        global.output,
        &health,
        |h| {
            output::render_detail(&[
                ("Status", h.status.clone()),
                ("Scheduler", if h.scheduler_running { "running" } else { "stopped" }.into()),
            ])
        },
        |h| h.status.clone(),
    )?;
    output::print_output(&out, global.quiet);

    if health.is_ok() {
        Ok(())
    } else {
        Err(CliError::Unhealthy {
            status: health.status,
        })
    }
}

pub async fn bootstrap(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let outcome = session.bootstrap().await;

    let message = match outcome {
        BootstrapOutcome::KeyRotated => "Stored the backend's new API key",
        BootstrapOutcome::Unchanged => "Stored API key is current",
        BootstrapOutcome::Throttled => "Skipped: a recovery attempt just ran",
        BootstrapOutcome::Unreachable => {
            let credential = session.credential();
            return Err(CliError::ConnectionFailed {
                url: credential.backend_url.to_string(),
                reason: "backend info endpoint did not answer".into(),
            });
        }
    };

    let out = output::render_single(
        global.output,
        &serde_json::json!({ "outcome": outcome.to_string() }),
        |_| message.to_owned(),
        |_| outcome.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
