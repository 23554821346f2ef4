//! Raw authenticated GET.

use tallysync_core::{RequestOptions, Session};

use crate::cli::{GetArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

pub async fn handle(session: &Session, args: GetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut options = RequestOptions::get();
    for (key, value) in args.query {
        options = options.with_query(key, value);
    }

    let executor = session.executor();
    let outcome = if args.paginated {
        executor.request_paginated(&args.path, options).await?
    } else {
        executor.request(&args.path, options).await?
    };

    if args.paginated && !global.quiet {
        match outcome.total_count {
            Some(total) => eprintln!("Total: {total}"),
            None => eprintln!("Total: (not reported)"),
        }
    }

    let out = match global.output {
        OutputFormat::JsonCompact => serde_json::to_string(&outcome.payload)?,
        OutputFormat::Table | OutputFormat::Json | OutputFormat::Plain => {
            serde_json::to_string_pretty(&outcome.payload)?
        }
    };
    output::print_output(&out, global.quiet);
    Ok(())
}
