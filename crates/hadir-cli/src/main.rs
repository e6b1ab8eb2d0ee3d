use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hadir_core::{
    EnrollmentConfig, FaceAnalyzer, FrameScorer, FrameSource, QualityScorer, QualityTier,
};
use hadir_store::SqliteStore;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod replay;

use config::Config;
use replay::{ConsoleOperator, ReplaySession};

#[derive(Parser)]
#[command(name = "hadir", about = "hadir staff face enrollment CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from a recorded capture session
    Enroll {
        /// Capture session directory (session.json + frame images)
        #[arg(short, long)]
        capture: PathBuf,
        /// Identifier to enroll; prompted for when omitted
        #[arg(short, long)]
        id: Option<String>,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// Identifier to remove
        identifier: String,
    },
    /// Import identities from a flat JSON database
    Import {
        /// JSON file mapping identifier to embedding
        path: PathBuf,
    },
    /// Export identities to a flat JSON database
    Export {
        /// Destination JSON file
        path: PathBuf,
    },
    /// Print per-frame quality scores of a capture session
    Score {
        /// Capture session directory
        #[arg(short, long)]
        capture: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll { capture, id } => enroll(&config, &capture, id),
        Commands::List => {
            let store = SqliteStore::open(&config.db_path)?;
            let records = store.list()?;
            if records.is_empty() {
                println!("No identities enrolled");
            }
            for r in records {
                let samples = r
                    .sample_count
                    .map_or_else(|| "-".to_string(), |n| n.to_string());
                println!(
                    "{}\tsamples: {}\tenrolled: {}",
                    r.identifier,
                    samples,
                    r.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            Ok(())
        }
        Commands::Remove { identifier } => {
            let store = SqliteStore::open(&config.db_path)?;
            store.remove(&identifier)?;
            println!("Removed {identifier}");
            Ok(())
        }
        Commands::Import { path } => {
            let mut store = SqliteStore::open(&config.db_path)?;
            let summary = store
                .import_json(&path)
                .with_context(|| format!("importing {}", path.display()))?;
            println!(
                "Imported {} identities ({} already enrolled, skipped)",
                summary.imported, summary.skipped
            );
            Ok(())
        }
        Commands::Export { path } => {
            let store = SqliteStore::open(&config.db_path)?;
            let count = store.export_json(&path)?;
            println!("Exported {count} identities to {}", path.display());
            Ok(())
        }
        Commands::Score { capture } => score(&config.enrollment()?, &capture),
    }
}

fn enroll(config: &Config, capture: &Path, id: Option<String>) -> Result<()> {
    let enrollment = config.enrollment()?;
    let session = ReplaySession::load(capture)?;
    let mut store = SqliteStore::open(&config.db_path)?;

    let identifier = match id {
        Some(id) => id,
        None => prompt_identifier(&store)?,
    };

    println!(
        "Target: collect {}-{} high-quality samples across {} poses",
        enrollment.min_samples,
        enrollment.max_samples,
        hadir_core::Pose::SEQUENCE.len()
    );

    tracing::info!(frames = session.len(), identifier = identifier.trim(), "replaying capture");
    let mut frames = session.frames();
    let mut analyzer = session.analyzer();
    let mut operator = ConsoleOperator::new(&session, enrollment.min_quality, std::io::stdout());

    let report = hadir_core::enroll(
        &identifier,
        &enrollment,
        &mut store,
        &mut frames,
        &mut analyzer,
        &mut operator,
    )
    .with_context(|| format!("enrollment of '{}' failed", identifier.trim()))?;

    let aggregate = &report.aggregate;
    println!();
    println!("Enrollment complete: {}", report.identifier);
    println!(
        "Samples: {} collected, {} best kept, {} after outlier filter",
        report.samples_collected, aggregate.candidates, aggregate.used
    );
    let poses: Vec<String> = report
        .pose_counts
        .iter()
        .map(|(pose, n)| format!("{pose:?} {n}"))
        .collect();
    println!("Poses: {}", poses.join(", "));
    println!(
        "Mean quality: {:.1} ({})",
        aggregate.mean_quality,
        QualityTier::classify(aggregate.mean_quality, enrollment.min_quality)
    );
    println!("Saved to {}", config.db_path.display());
    Ok(())
}

/// Ask for the identifier on stdin after listing who is already enrolled.
fn prompt_identifier(store: &SqliteStore) -> Result<String> {
    let existing: Vec<String> = store.list()?.into_iter().map(|r| r.identifier).collect();
    if existing.is_empty() {
        println!("No identities enrolled yet");
    } else {
        println!("Enrolled identities: {}", existing.join(", "));
    }

    print!("Identifier to enroll: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("reading identifier")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn score(enrollment: &EnrollmentConfig, capture: &Path) -> Result<()> {
    let session = ReplaySession::load(capture)?;
    let scorer = QualityScorer::new(enrollment.weights.clone());
    let mut frames = session.frames();
    let mut analyzer = session.analyzer();

    while let Some(frame) = frames.next_frame()? {
        let faces = analyzer.detect_faces(&frame);
        if faces.len() != 1 {
            println!("#{:04} skipped ({} faces)", frame.sequence, faces.len());
            continue;
        }
        let landmarks = analyzer.detect_landmarks(&frame, &faces);
        let assessment = scorer.score(&frame, &faces[0], landmarks.first());
        println!(
            "#{:04} {}",
            frame.sequence,
            replay::describe_quality(&assessment, enrollment.min_quality)
        );
    }
    Ok(())
}
