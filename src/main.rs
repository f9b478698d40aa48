//! pdfcompare - PDF comparison tool
//!
//! A standalone executable over the comparison library:
//! - Compares two extracted-document fixtures (JSON) end to end through
//!   the async job orchestrator
//! - Streams job progress to the terminal
//! - Prints a per-kind difference summary and optional detail listing
//! - Re-opens previously stored comparison artifacts

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use pdfcompare::store::{ArtifactStore, DocumentStore, JobStore};
use pdfcompare::types::{ChangeType, ComparisonResult, Document, JobStatus, Severity};
use pdfcompare::{
    CompareConfig, FsArtifactStore, JobManager, MemoryDocumentStore, MemoryJobStore,
};

/// pdfcompare - PDF comparison tool
#[derive(Parser)]
#[command(name = "pdfcompare")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two extracted documents
    Compare {
        /// Base document fixture (JSON)
        base: PathBuf,

        /// Compare document fixture (JSON)
        compare: PathBuf,

        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Artifact directory (overrides the configured root)
        #[arg(long)]
        artifacts: Option<PathBuf>,

        /// Per-job timeout in minutes
        #[arg(long)]
        timeout_minutes: Option<u64>,

        /// Print every difference, not just the summary
        #[arg(short, long)]
        verbose: bool,

        /// Emit the full result as JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Show a previously stored comparison result
    Show {
        /// Job id of the stored artifact
        job_id: Uuid,

        /// Artifact directory the result was stored under
        #[arg(long, default_value = "artifacts")]
        artifacts: PathBuf,

        /// Print every difference, not just the summary
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compare {
            base,
            compare,
            config,
            artifacts,
            timeout_minutes,
            verbose,
            json,
        } => run_compare(
            &base,
            &compare,
            config.as_deref(),
            artifacts,
            timeout_minutes,
            verbose,
            json,
        ),
        Commands::Show {
            job_id,
            artifacts,
            verbose,
        } => run_show(job_id, &artifacts, verbose),
    }
}

fn run_compare(
    base_path: &Path,
    compare_path: &Path,
    config_path: Option<&Path>,
    artifacts: Option<PathBuf>,
    timeout_minutes: Option<u64>,
    verbose: bool,
    json: bool,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => CompareConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CompareConfig::default(),
    };
    if let Some(root) = artifacts {
        config.artifact.root = root;
    }
    if let Some(minutes) = timeout_minutes {
        config.comparison.max_processing_minutes = minutes;
    }

    let base = load_document(base_path)?;
    let compare = load_document(compare_path)?;
    let base_id = base.id.clone();
    let compare_id = compare.id.clone();

    let documents = Arc::new(MemoryDocumentStore::new());
    documents.insert(base);
    documents.insert(compare);
    let jobs = Arc::new(MemoryJobStore::new());
    let artifact_store = Arc::new(FsArtifactStore::new(config.artifact.root.clone()));

    let manager = JobManager::new(
        documents as Arc<dyn DocumentStore>,
        jobs as Arc<dyn JobStore>,
        Arc::clone(&artifact_store) as Arc<dyn ArtifactStore>,
        config,
    )?;

    let job = manager.create(&base_id, &compare_id)?;
    eprintln!(
        "{} job {}",
        style("Comparing").cyan().bold(),
        style(job.id).dim()
    );

    let finished = watch_job(&manager, job.id)?;
    match finished.status {
        JobStatus::Completed => {}
        JobStatus::Failed => bail!(
            "comparison failed: {}",
            finished
                .error_message
                .unwrap_or_else(|| "unknown error".to_string())
        ),
        JobStatus::Cancelled => bail!("comparison was cancelled"),
        other => bail!("job ended in unexpected state {:?}", other),
    }

    let result = manager
        .result(job.id)
        .context("completed job has no readable artifact")?;

    if json {
        println!("{}", serde_json::to_string_pretty(result.as_ref())?);
    } else {
        print_summary(&result);
        if verbose {
            print_differences(&result);
        }
        eprintln!(
            "\n{} stored under {}",
            style("Artifact").green().bold(),
            style(job.id).dim()
        );
    }
    Ok(())
}

fn run_show(job_id: Uuid, artifacts: &Path, verbose: bool) -> Result<()> {
    let store = FsArtifactStore::new(artifacts);
    let result = store
        .retrieve(job_id)
        .with_context(|| format!("no readable artifact for job {}", job_id))?;
    print_summary(&result);
    if verbose {
        print_differences(&result);
    }
    Ok(())
}

fn load_document(path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read document fixture {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse document fixture {}", path.display()))
}

/// Poll the job row until it settles, mirroring progress to the terminal
fn watch_job(manager: &JobManager, id: Uuid) -> Result<pdfcompare::Job> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    loop {
        let Some(job) = manager.status(id) else {
            bail!("job {} disappeared from the job store", id);
        };
        bar.set_position(u64::from(job.progress));
        bar.set_message(job.current_phase.clone());
        if job.status.is_terminal() {
            bar.finish_with_message(job.status.as_external().to_string());
            return Ok(job);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn print_summary(result: &ComparisonResult) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Metric", "Value"]);

    let matched = result.page_pairs.iter().filter(|p| p.is_matched()).count();
    table.add_row(vec![
        Cell::new("Base document"),
        Cell::new(&result.base_document_id),
    ]);
    table.add_row(vec![
        Cell::new("Compare document"),
        Cell::new(&result.compare_document_id),
    ]);
    table.add_row(vec![
        Cell::new("Page pairs"),
        Cell::new(format!(
            "{} ({} matched)",
            result.page_pairs.len(),
            matched
        )),
    ]);
    table.add_row(vec![
        Cell::new("Sub-document pairs"),
        Cell::new(result.document_pairs.len()),
    ]);
    table.add_row(vec![
        Cell::new("Overall similarity"),
        similarity_cell(result.overall_similarity),
    ]);
    table.add_row(vec![
        Cell::new("Text differences"),
        Cell::new(result.summary.text),
    ]);
    table.add_row(vec![
        Cell::new("Font differences"),
        Cell::new(result.summary.font),
    ]);
    table.add_row(vec![
        Cell::new("Image differences"),
        Cell::new(result.summary.image),
    ]);
    table.add_row(vec![
        Cell::new("Style differences"),
        Cell::new(result.summary.style),
    ]);
    table.add_row(vec![
        Cell::new("Metadata differences"),
        Cell::new(result.metadata_differences.len()),
    ]);
    table.add_row(vec![
        Cell::new("Total"),
        Cell::new(result.summary.total).fg(if result.summary.total == 0 {
            Color::Green
        } else {
            Color::Yellow
        }),
    ]);

    println!("{table}");
}

fn similarity_cell(similarity: f64) -> Cell {
    let color = if similarity >= 0.95 {
        Color::Green
    } else if similarity >= 0.75 {
        Color::Yellow
    } else {
        Color::Red
    };
    Cell::new(format!("{:.1}%", similarity * 100.0)).fg(color)
}

fn print_differences(result: &ComparisonResult) {
    if result.differences_by_page.is_empty() && result.metadata_differences.is_empty() {
        println!("\n{}", style("No differences found.").green());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Pages", "Kind", "Change", "Severity", "Description"]);

    for (key, diffs) in &result.differences_by_page {
        for diff in diffs {
            table.add_row(vec![
                Cell::new(key),
                Cell::new(format!("{:?}", diff.kind())),
                change_cell(diff.change_type),
                severity_cell(diff.severity),
                Cell::new(&diff.description),
            ]);
        }
    }
    for (metadata_key, diff) in &result.metadata_differences {
        table.add_row(vec![
            Cell::new("-"),
            Cell::new("Metadata"),
            change_cell(diff.change_type),
            severity_cell(diff.severity),
            Cell::new(format!("{}: {}", metadata_key, diff.description)),
        ]);
    }

    println!("{table}");
}

fn change_cell(change: ChangeType) -> Cell {
    match change {
        ChangeType::Added => Cell::new("Added").fg(Color::Green),
        ChangeType::Deleted => Cell::new("Deleted").fg(Color::Red),
        ChangeType::Modified => Cell::new("Modified").fg(Color::Yellow),
    }
}

fn severity_cell(severity: Severity) -> Cell {
    match severity {
        Severity::Cosmetic => Cell::new("Cosmetic").fg(Color::Grey),
        Severity::Minor => Cell::new("Minor").fg(Color::Yellow),
        Severity::Major => Cell::new("Major").fg(Color::Red),
    }
}
