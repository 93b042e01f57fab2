//! Replay a captured signal journal through the tracking pipeline
//!
//! A journal is a JSONL file with one [`PageSignal`] per line, typically
//! exported from a staging site or a browser shim. Malformed lines are
//! skipped with a warning rather than aborting the replay.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use pagebeam_core::{MemoryStore, PageSignal, PageTracker, SnapshotPage, TrackerConfig};

pub async fn run(
    config: &TrackerConfig,
    journal: &Path,
    user_agent: &str,
    dry_run: bool,
) -> Result<()> {
    let file = File::open(journal)
        .with_context(|| format!("failed to open journal {}", journal.display()))?;
    let reader = BufReader::new(file);

    let mut signals = Vec::new();
    let mut skipped = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<PageSignal>(trimmed) {
            Ok(signal) => signals.push(signal),
            Err(e) => {
                skipped += 1;
                tracing::warn!(line = line_no + 1, error = %e, "Skipping malformed journal line");
            }
        }
    }

    println!(
        "Journal: {} signal(s), {} malformed line(s) skipped",
        signals.len(),
        skipped
    );

    if dry_run {
        println!("Dry run - nothing delivered");
        return Ok(());
    }

    let page = Arc::new(SnapshotPage::new(user_agent));
    let tracker = PageTracker::mount(config, page, Arc::new(MemoryStore::new()))
        .context("failed to mount tracker")?;

    let pb = ProgressBar::new(signals.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    for signal in signals {
        pb.set_message(signal_label(&signal));
        tracker.handle(signal).await;
        pb.inc(1);
    }

    pb.finish_with_message("flushing");
    tracker.shutdown().await;

    let stats = tracker.stats();
    println!(
        "Flushes: {}  delivered: {}  failed: {}",
        stats.flushes, stats.delivered, stats.failed
    );
    tracing::info!(
        flushes = stats.flushes,
        delivered = stats.delivered,
        failed = stats.failed,
        "Replay complete"
    );

    Ok(())
}

fn signal_label(signal: &PageSignal) -> String {
    match signal {
        PageSignal::Navigate { path, .. } => format!("navigate {}", path),
        PageSignal::Click { tag, .. } => format!("click <{}>", tag),
        PageSignal::Submit { form_id, .. } => {
            format!("submit {}", form_id.as_deref().unwrap_or("form"))
        }
        PageSignal::Scroll { .. } => "scroll".to_string(),
        PageSignal::Unload => "unload".to_string(),
    }
}
