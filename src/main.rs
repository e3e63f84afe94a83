use anyhow::Result;
use clap::{Parser, Subcommand};
use deskmux::{SessionSnapshot, SnapshotStore};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deskmux")]
#[command(version = "0.1.0")]
#[command(about = "Session orchestration core for multi-workspace agent terminals")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override the state directory (defaults to the platform config dir)
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List workspaces in the saved session
    List,
    /// List named snapshots
    Snapshots,
    /// List saved workspace blueprints
    Blueprints,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = match cli.state_dir {
        Some(dir) => SnapshotStore::with_dir(dir)?,
        None => SnapshotStore::new()?,
    };

    match cli.command {
        Some(Commands::Snapshots) => {
            for snapshot in store.load_snapshots()? {
                println!(
                    "{}  ({} workspaces, saved {})",
                    snapshot.name,
                    snapshot.snapshot.workspaces.len(),
                    snapshot.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Some(Commands::Blueprints) => {
            for blueprint in store.load_blueprints()? {
                println!(
                    "{}  ({} panes, {} agent profiles)",
                    blueprint.name,
                    blueprint.pane_count,
                    blueprint.agents.len()
                );
            }
        }
        Some(Commands::List) | None => {
            let snapshot = store.load()?.unwrap_or_else(SessionSnapshot::empty);
            if snapshot.workspaces.is_empty() {
                println!("No saved session.");
            }
            for ws in &snapshot.workspaces {
                let active = snapshot.active_workspace == Some(ws.id);
                println!(
                    "{}{}  {}  ({} panes)",
                    if active { "* " } else { "  " },
                    ws.name,
                    ws.display_root(),
                    ws.pane_count()
                );
            }
        }
    }

    Ok(())
}
