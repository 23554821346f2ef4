//! Company listing.

use tabled::Tabled;
use tallysync_core::{Company, Session};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct CompanyRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Tally Company")]
    tally_company: String,
    #[tabled(rename = "Tally Host")]
    host: String,
    #[tabled(rename = "Active")]
    active: String,
    #[tabled(rename = "Interval")]
    interval: String,
    #[tabled(rename = "Last Sync")]
    last_synced: String,
}

impl CompanyRow {
    fn new(c: &Company, selected: Option<i64>) -> Self {
        let marker = if selected == Some(c.id) { " *" } else { "" };
        Self {
            id: c.id,
            name: format!("{}{marker}", c.name),
            tally_company: c.tally_company_name.clone(),
            host: format!("{}:{}", c.host, c.port),
            active: if c.is_active { "yes" } else { "no" }.into(),
            interval: format!("{}m", c.sync_interval_minutes),
            last_synced: c.last_synced_at.map_or_else(
                || "never".into(),
                |t| t.format("%Y-%m-%d %H:%M").to_string(),
            ),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let companies = session.executor().list_companies().await?;
    let selected = session.selected_company();

    let out = output::render_list(
        global.output,
        &companies,
        |c| CompanyRow::new(c, selected),
        |c| c.id.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
