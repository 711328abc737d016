use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use gopilot::infrastructure::{group_by_session, AuditEntry, AuditEventKind, AuditReader};
use gopilot::session::SessionState;
use serde::Serialize;
use tracing::{info, warn};

/// Summarize gopilot session audit logs.
#[derive(Parser, Debug)]
#[command(name = "audit_tool")]
#[command(about = "Summarize gopilot audit logs into sessions and timelines")]
struct Args {
    /// Path to the NDJSON audit log
    log: PathBuf,

    /// Emit JSON instead of a text table
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One line per session
    Sessions,
    /// Full timeline of one session
    Show {
        /// Session id, or a unique prefix of it
        id: String,
    },
}

#[derive(Debug, Serialize)]
struct SessionOverview {
    session_id: String,
    started_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,
    entries: usize,
    captures: usize,
    last_event: AuditEventKind,
    final_state: SessionState,
    closed: bool,
}

impl SessionOverview {
    fn from_entries(session_id: String, entries: &[AuditEntry]) -> Option<Self> {
        let first = entries.first()?;
        let last = entries.last()?;
        Some(Self {
            session_id,
            started_at: first.timestamp,
            last_event_at: last.timestamp,
            entries: entries.len(),
            captures: entries
                .iter()
                .filter(|e| e.event_kind == AuditEventKind::CaptureStarted)
                .count(),
            last_event: last.event_kind,
            final_state: last.to_state,
            closed: last.event_kind.is_terminal(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("audit_tool=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let entries = AuditReader::new(&args.log).read_all().await?;
    info!("Read {} entries from {}", entries.len(), args.log.display());
    let sessions = group_by_session(entries);

    match args.command {
        Command::Sessions => {
            let overviews: Vec<SessionOverview> = sessions
                .into_iter()
                .filter_map(|(id, entries)| SessionOverview::from_entries(id, &entries))
                .collect();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&overviews)?);
            } else {
                print_overviews(&overviews);
            }
        }
        Command::Show { id } => {
            let mut matches = sessions
                .into_iter()
                .filter(|(session_id, _)| session_id.starts_with(&id));
            let (session_id, entries) = matches
                .next()
                .ok_or_else(|| anyhow!("No session matching '{}'", id))?;
            if matches.next().is_some() {
                return Err(anyhow!("Session prefix '{}' is ambiguous", id));
            }

            check_continuity(&entries);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("Session {}", session_id);
                for entry in &entries {
                    println!(
                        "  {}  {:<22} {:>14} -> {:<14} {}",
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                        entry.event_kind.as_str(),
                        entry.from_state,
                        entry.to_state,
                        entry.detail
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_overviews(overviews: &[SessionOverview]) {
    if overviews.is_empty() {
        println!("No sessions recorded");
        return;
    }
    println!(
        "{:<36}  {:<19}  {:>7}  {:>8}  {:<14}  {}",
        "SESSION", "STARTED", "ENTRIES", "CAPTURES", "FINAL STATE", "LAST EVENT"
    );
    for overview in overviews {
        println!(
            "{:<36}  {:<19}  {:>7}  {:>8}  {:<14}  {}{}",
            overview.session_id,
            overview.started_at.format("%Y-%m-%d %H:%M:%S"),
            overview.entries,
            overview.captures,
            overview.final_state,
            overview.last_event,
            if overview.closed { "" } else { " (open)" }
        );
    }
}

/// Warn when an entry does not start from the state the previous one left
fn check_continuity(entries: &[AuditEntry]) {
    for pair in entries.windows(2) {
        if pair[0].to_state != pair[1].from_state {
            warn!(
                "Gap in timeline: {} ended in {} but {} starts from {}",
                pair[0].event_kind, pair[0].to_state, pair[1].event_kind, pair[1].from_state
            );
        }
    }
}
