//! Command dispatch: bridges CLI args -> session calls -> output formatting.

pub mod companies;
pub mod config_cmd;
pub mod request;
pub mod system;
pub mod watch;

use tallysync_core::Session;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a backend-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    session: &Session,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Info => system::info(session, global).await,
        Command::Health => system::health(session, global).await,
        Command::Bootstrap => system::bootstrap(session, global).await,
        Command::Companies => companies::handle(session, global).await,
        Command::Get(args) => request::handle(session, args, global).await,
        Command::Watch(args) => watch::handle(session, args, global).await,
        // Config and Completions never open a session
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "local command routed to the backend dispatcher".into(),
        )),
    }
}
