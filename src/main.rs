use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dojo_progress::config::{self, Config, CONFIG_FILE, DATABASE_FILE, MODE_STATE_FILE};
use dojo_progress::coordinator::ModeState;
use dojo_progress::{storage, ProgressSnapshot, ProgressTracker, SqliteStore};

/// Dojo progress - spaced repetition and progress analytics for martial arts study
#[derive(Parser)]
#[command(name = "dojo-progress")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Learner progress tracking for terminology and patterns", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, database and default configuration
    Init,

    /// Show scheduling mode and record counts
    Status,

    /// Show the progress snapshot of a profile
    Stats {
        #[arg(long)]
        profile: String,
        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the items a profile should review next
    Due {
        #[arg(long)]
        profile: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Switch between classic and Leitner scheduling
    ToggleMode,

    /// Place a profile's items into Leitner boxes based on their mastery
    Migrate {
        #[arg(long)]
        profile: String,
    },

    /// Recompute the snapshot of every profile
    RefreshAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = config::data_dir()?;

    match cli.command {
        Commands::Init => {
            info!("Initializing progress store");
            let db_path = storage::init(&data_dir)?;
            println!("✅ Initialized at {}", data_dir.display());
            println!("   Database: {}", db_path.display());
            println!("   Config: {}", data_dir.join(CONFIG_FILE).display());
        }
        Commands::Status => show_status(&data_dir)?,
        Commands::Stats { profile, json } => {
            let tracker = open_tracker(&data_dir)?;
            match tracker.get_progress_data(&profile).await {
                Some(snapshot) if json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                Some(snapshot) => print_snapshot(&snapshot),
                None => println!("No progress data for profile {}", profile),
            }
        }
        Commands::Due { profile, limit } => {
            let tracker = open_tracker(&data_dir)?;
            let mode = tracker.coordinator().strategy().name();
            let due = tracker.terms_for_review(&profile, limit).await;

            println!("Review queue for {} ({} mode)", profile, mode);
            println!("==========================");
            if due.is_empty() {
                println!("Nothing to review right now");
            }
            for (i, p) in due.iter().enumerate() {
                println!(
                    "{:>3}. {:<24} {:<11} box {}  {:<10} {}",
                    i + 1,
                    p.item_id,
                    p.kind.as_str(),
                    p.box_number,
                    p.mastery_level.as_str(),
                    p.rank.label()
                );
            }
        }
        Commands::ToggleMode => {
            let tracker = open_tracker(&data_dir)?;
            let leitner = tracker.toggle_mode().await?;
            println!(
                "✅ Scheduling mode is now {}",
                if leitner { "leitner" } else { "classic" }
            );
            if leitner {
                println!("   Run 'dojo-progress migrate --profile <id>' to place existing items into boxes");
            }
        }
        Commands::Migrate { profile } => {
            let tracker = open_tracker(&data_dir)?;
            let report = tracker.migrate_to_leitner_mode(&profile).await?;
            println!("✅ Migrated {} items for {}", report.items_migrated, profile);
            for (i, count) in report.per_box.iter().enumerate() {
                println!("   Box {}: {}", i + 1, count);
            }
        }
        Commands::RefreshAll => {
            let tracker = open_tracker(&data_dir)?;
            let refreshed = tracker.refresh_all().await?;
            println!("✅ Refreshed {} profile snapshots", refreshed);
        }
    }

    Ok(())
}

fn open_tracker(data_dir: &Path) -> Result<ProgressTracker> {
    if !data_dir.join(DATABASE_FILE).exists() {
        anyhow::bail!("No progress store at {:?}. Run 'dojo-progress init' first", data_dir);
    }
    ProgressTracker::open(data_dir).with_context(|| format!("opening progress store in {:?}", data_dir))
}

fn show_status(data_dir: &Path) -> Result<()> {
    println!("Dojo Progress Status");
    println!("====================");
    println!();

    if !data_dir.exists() {
        println!("Status: NOT INITIALIZED");
        println!("Run 'dojo-progress init' to initialize");
        return Ok(());
    }

    println!("Status: INITIALIZED");
    println!("Data directory: {:?}", data_dir);

    let config = Config::load(&data_dir.join(CONFIG_FILE))?;
    let mode = ModeState::load(&data_dir.join(MODE_STATE_FILE))?;
    println!(
        "Scheduling mode: {}",
        if mode.leitner_enabled { "leitner" } else { "classic" }
    );
    if let Some(at) = mode.toggled_at {
        println!("Last switched: {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
    println!("Leitner intervals (days): {:?}", config.scheduler.intervals);
    println!("Snapshot TTL: {}s", config.cache.ttl_seconds);

    let db_path = data_dir.join(DATABASE_FILE);
    if db_path.exists() {
        let counts = SqliteStore::open(&db_path)?.counts()?;
        println!("Profiles: {}", counts.profiles);
        println!("Study items: {}", counts.items);
        println!("Tracked item progress: {}", counts.progress_rows);
        println!("Study sessions: {}", counts.sessions);
        println!("Gradings: {}", counts.gradings);
    } else {
        println!("Database: NOT FOUND");
    }

    Ok(())
}

fn print_snapshot(snapshot: &ProgressSnapshot) {
    let stats = &snapshot.statistics;
    let journey = &snapshot.journey;

    println!("Progress for {}", snapshot.profile_id);
    println!("==========================");
    println!("Generated: {}", snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();

    println!("Sessions: {}", stats.overall.session_count);
    println!("Study time: {:.1}h", stats.overall.total_study_secs as f64 / 3600.0);
    println!("Items studied: {}", stats.overall.items_studied);
    println!("Average accuracy: {:.0}%", stats.overall.average_accuracy * 100.0);
    for mode in &stats.per_kind {
        if mode.session_count > 0 {
            println!(
                "  {:<11} {} sessions, {:.0}% accuracy",
                mode.kind.as_str(),
                mode.session_count,
                mode.accuracy * 100.0
            );
        }
    }
    println!();

    println!("Current streak: {} days", stats.streaks.current);
    println!("Longest streak: {} days", stats.streaks.longest);
    println!();

    let mastery = &stats.belt_mastery;
    println!(
        "Terminology mastered: {}/{}",
        mastery.terminology_mastered, mastery.terminology_total
    );
    println!("Patterns mastered: {}/{}", mastery.pattern_mastered, mastery.pattern_total);
    println!();

    println!("Studying: {}", journey.studying_rank.label());
    println!("Earned: {}", journey.earned_rank.label());
    if let Some(message) = &journey.mismatch_message {
        println!("⚠️  {}", message);
    }
    let readiness = &journey.readiness;
    if let Some(target) = readiness.target_rank {
        println!(
            "Readiness for {}: {:.0}%{}",
            target.label(),
            readiness.overall * 100.0,
            if readiness.is_ready { " (ready)" } else { "" }
        );
    }
    if let Some(date) = readiness.estimated_ready_date {
        println!("Estimated ready: {}", date);
    }
}
