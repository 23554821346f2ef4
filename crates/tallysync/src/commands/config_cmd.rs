//! Config subcommand handlers.
//!
//! These edit the settings file directly and never contact the backend.
//! Errors are surfaced rather than logged: a failed save here is the
//! whole point of the command.

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tallysync_config::{FilePersistence, KeyStorage, env_overrides, load_config_from};
use tallysync_core::{PersistedState, StatePersistence};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{parse_backend_url, settings_path};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Show enough of a key to recognise it.
fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    if key.chars().count() > 8 {
        format!("{visible}…")
    } else {
        "****".into()
    }
}

/// Load, modify and save the persisted client state.
fn update_state(
    global: &GlobalOpts,
    change: impl FnOnce(&mut PersistedState),
) -> Result<(), CliError> {
    let persistence = FilePersistence::new(settings_path(global));
    let mut state = persistence.load()?;
    change(&mut state);
    persistence.save(&state)?;
    Ok(())
}

fn done(global: &GlobalOpts, message: &str) {
    if !global.quiet {
        eprintln!("{message}");
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => show(global),

        ConfigCommand::Path => {
            output::print_output(&settings_path(global).display().to_string(), false);
            Ok(())
        }

        ConfigCommand::SetBackend { url } => {
            let url = parse_backend_url(&url)?;
            update_state(global, |state| state.backend_url = Some(url.to_string()))?;
            done(global, &format!("Backend set to {url}"));
            Ok(())
        }

        ConfigCommand::SetKey { key } => {
            let key = key.trim().to_owned();
            if key.is_empty() {
                return Err(CliError::Validation {
                    field: "key".into(),
                    reason: "API key cannot be empty".into(),
                });
            }
            update_state(global, |state| state.api_key = Some(SecretString::from(key)))?;
            done(global, "API key stored");
            Ok(())
        }

        ConfigCommand::ClearKey => {
            update_state(global, |state| state.api_key = None)?;
            done(global, "API key cleared");
            Ok(())
        }

        ConfigCommand::SelectCompany { id } => {
            update_state(global, |state| state.selected_company = id)?;
            match id {
                Some(id) => done(global, &format!("Selected company {id}")),
                None => done(global, "Watching all companies"),
            }
            Ok(())
        }
    }
}

fn show(global: &GlobalOpts) -> Result<(), CliError> {
    let path = settings_path(global);
    let settings = load_config_from(&path)?;
    let state = FilePersistence::new(&path).load()?;
    let env = env_overrides()?;

    // Environment, then file, then the default address.
    let backend = env
        .backend_url
        .or_else(|| state.backend_url.clone())
        .unwrap_or_else(|| settings.backend_url.clone());
    let selected_company = env.selected_company.or(state.selected_company);

    let key = state
        .api_key
        .as_ref()
        .map_or_else(|| "(none)".into(), |key| mask_key(key.expose_secret()));
    let storage = match settings.key_storage {
        KeyStorage::File => "file",
        KeyStorage::Keyring => "keyring",
    };
    let company = selected_company.map_or_else(|| "(all)".into(), |id| id.to_string());

    let view = json!({
        "path": path.display().to_string(),
        "backend_url": backend,
        "api_key": key,
        "key_storage": storage,
        "selected_company": selected_company,
        "timeout": settings.timeout,
        "bootstrap_timeout": settings.bootstrap_timeout,
        "reconnect_delay_ms": settings.reconnect_delay_ms,
        "insecure": settings.insecure,
        "ca_cert": settings.ca_cert,
    });

    let out = output::render_single(
        global.output,
        &view,
        |_| {
            output::render_detail(&[
                ("Settings file", path.display().to_string()),
                ("Backend", backend.clone()),
                ("API key", key.clone()),
                ("Key storage", storage.to_owned()),
                ("Company", company.clone()),
                ("Timeout", format!("{}s", settings.timeout)),
                ("Reconnect delay", format!("{}ms", settings.reconnect_delay_ms)),
                ("Insecure TLS", settings.insecure.to_string()),
            ])
        },
        |_| path.display().to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
