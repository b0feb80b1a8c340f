//! CLI smoke entry point.
//!
//! # Responsibility
//! - Drive `mindcard_core` end to end against an in-memory database.
//! - Keep output deterministic for quick local sanity checks.

use mindcard_core::db::open_db_in_memory;
use mindcard_core::{BackTarget, SqliteCardRepository, Workspace, WorkspaceConfig};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("mindcard_core ping={}", mindcard_core::ping());
    println!("mindcard_core version={}", mindcard_core::core_version());

    match run_probe() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mindcard_core probe=error error={err}");
            ExitCode::FAILURE
        }
    }
}

fn run_probe() -> Result<(), Box<dyn std::error::Error>> {
    let conn = open_db_in_memory()?;
    let repo = SqliteCardRepository::try_new(&conn)?;
    let mut workspace = Workspace::new(repo, WorkspaceConfig::default());
    workspace.load_current()?;

    let parent = workspace.create_default_card()?;
    workspace.enter(&parent.id)?;
    workspace.create_card("child", Some("nested card".to_string()), None)?;
    println!(
        "mindcard_core probe depth={} children={} trail={}",
        workspace.path().len(),
        workspace.current_cards().len(),
        workspace.breadcrumb_labels().join(" / ")
    );

    workspace.back(BackTarget::Root)?;
    println!(
        "mindcard_core probe root_cards={} pending={}",
        workspace.current_cards().len(),
        workspace.sync().queued_count() + workspace.sync().in_flight_count()
    );
    Ok(())
}
