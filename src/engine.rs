//! Comparison engine
//!
//! Assembles the full pipeline for one job: fingerprint both documents,
//! split them into logical sub-documents, pair the sub-documents, pair
//! pages inside each matched sub-document pair, run the per-page
//! difference detectors in parallel batches, compare metadata once, and
//! aggregate everything into a [`ComparisonResult`].
//!
//! The engine is CPU-bound and side-effect free apart from progress
//! callbacks; cancellation and the wall-clock budget are checked at batch
//! boundaries and before each detector invocation.

use crate::boundaries::detect_boundaries;
use crate::compare_fonts::compare_page_fonts;
use crate::compare_images::compare_page_images;
use crate::compare_metadata::compare_metadata;
use crate::compare_styles::compare_page_styles;
use crate::compare_text::compare_page_text;
use crate::config::CompareConfig;
use crate::error::{CompareError, Result};
use crate::fingerprint::fingerprint_document;
use crate::match_documents::{match_documents, PageRenderer};
use crate::match_pages::match_pages;
use crate::types::{
    ComparisonResult, ComparisonSummary, Difference, DifferenceCounts, DifferenceKind, Document,
    DocumentPair, PageMapping, PagePair, Source,
};
use crate::ProgressSink;
use chrono::Utc;
use log::{debug, info};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;
use uuid::Uuid;

/// Pipeline phase, reported through the progress sink
///
/// The orchestrator maps phases onto job statuses; the labels are what
/// lands in the job row's `current_phase` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    LoadingDocuments,
    MatchingDocuments,
    ComparingPages,
    Aggregating,
    Completed,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Initializing => "Initializing",
            Phase::LoadingDocuments => "Loading documents",
            Phase::MatchingDocuments => "Matching documents",
            Phase::ComparingPages => "Comparing pages",
            Phase::Aggregating => "Aggregating results",
            Phase::Completed => "Completed",
        }
    }
}

/// Per-run context: cancellation flag, wall-clock budget, progress sink
pub struct RunContext {
    cancel_flag: Arc<AtomicBool>,
    started: Instant,
    budget_minutes: Option<u64>,
    progress: Arc<dyn ProgressSink>,
}

impl RunContext {
    pub fn new(
        cancel_flag: Arc<AtomicBool>,
        budget_minutes: Option<u64>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            cancel_flag,
            started: Instant::now(),
            budget_minutes,
            progress,
        }
    }

    /// Context with no cancellation, no budget and no progress reporting
    pub fn detached() -> Self {
        Self::new(
            Arc::new(AtomicBool::new(false)),
            None,
            Arc::new(crate::NoopProgressSink),
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed) || self.over_budget()
    }

    pub fn over_budget(&self) -> bool {
        match self.budget_minutes {
            Some(minutes) => self.started.elapsed().as_secs() >= minutes * 60,
            None => false,
        }
    }

    /// Fail fast when the run should stop
    ///
    /// An exceeded budget wins over an external cancel so the job ends in
    /// Failed with a timeout message rather than Cancelled.
    pub fn check(&self) -> Result<()> {
        if self.over_budget() {
            return Err(CompareError::Timeout(self.budget_minutes.unwrap_or(0)));
        }
        if self.cancel_flag.load(Ordering::Relaxed) {
            return Err(CompareError::Cancelled);
        }
        Ok(())
    }

    pub fn report(&self, progress: u8, phase: Phase, completed_ops: u32, total_ops: u32) {
        self.progress.update(progress, phase, completed_ops, total_ops);
    }
}

/// One matched page pair queued for detector execution
struct DetectorTask {
    key: String,
    base_page: usize,
    compare_page: usize,
}

/// Core comparison engine
pub struct ComparisonEngine<'a> {
    config: &'a CompareConfig,
    renderer: Option<&'a dyn PageRenderer>,
}

impl<'a> ComparisonEngine<'a> {
    pub fn new(config: &'a CompareConfig) -> Self {
        Self {
            config,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: &'a dyn PageRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Run the full comparison pipeline
    pub fn compare(
        &self,
        id: Uuid,
        base: &Document,
        compare: &Document,
        ctx: &RunContext,
    ) -> Result<ComparisonResult> {
        let created_at = Utc::now();

        // Stage 1: fingerprints
        ctx.check()?;
        ctx.report(5, Phase::LoadingDocuments, 0, 0);
        let base_fps = fingerprint_document(base, Source::Base);
        let compare_fps = fingerprint_document(compare, Source::Compare);
        ctx.report(15, Phase::LoadingDocuments, 0, 0);

        // Stage 2: boundaries
        ctx.check()?;
        let min_pages = self.config.comparison.min_pages_per_document;
        let base_texts: Vec<String> = base.pages.iter().map(|p| p.text.clone()).collect();
        let compare_texts: Vec<String> = compare.pages.iter().map(|p| p.text.clone()).collect();
        let base_bounds = detect_boundaries(&base_texts, min_pages);
        let compare_bounds = detect_boundaries(&compare_texts, min_pages);
        debug!(
            "boundaries: {} base, {} compare",
            base_bounds.len(),
            compare_bounds.len()
        );

        // Stage 3: sub-document matching
        ctx.check()?;
        ctx.report(20, Phase::MatchingDocuments, 0, 0);
        let boundary_matches = match_documents(
            base,
            compare,
            &base_bounds,
            &compare_bounds,
            self.renderer,
            self.config,
        );
        ctx.report(25, Phase::MatchingDocuments, 0, 0);

        // Stage 4: page matching per matched sub-document pair
        ctx.check()?;
        let mut page_pairs: Vec<PagePair> = Vec::new();
        let mut document_pairs: Vec<DocumentPair> = Vec::new();

        for (pair_index, m) in boundary_matches.iter().enumerate() {
            let base_range = m.base_index.map(|i| {
                let b = base_bounds[i];
                (b.start_page, b.end_page)
            });
            let compare_range = m.compare_index.map(|j| {
                let b = compare_bounds[j];
                (b.start_page, b.end_page)
            });

            let pair_pages: Vec<PagePair> = match (m.base_index, m.compare_index) {
                (Some(i), Some(j)) => {
                    let bb = &base_bounds[i];
                    let cb = &compare_bounds[j];
                    match_pages(
                        &base_fps[bb.start_page..=bb.end_page],
                        &compare_fps[cb.start_page..=cb.end_page],
                        &self.config.page_matcher,
                    )
                }
                (Some(i), None) => base_bounds[i]
                    .pages()
                    .map(|p| PagePair::base_only(base_fps[p].clone()))
                    .collect(),
                (None, Some(j)) => compare_bounds[j]
                    .pages()
                    .map(|p| PagePair::compare_only(compare_fps[p].clone()))
                    .collect(),
                (None, None) => Vec::new(),
            };

            let page_mappings = pair_pages
                .iter()
                .map(|p| PageMapping {
                    base_page: p.base_index(),
                    compare_page: p.compare_index(),
                    similarity: p.similarity,
                    diff_count: 0,
                })
                .collect();

            document_pairs.push(DocumentPair {
                pair_index,
                matched: m.is_matched(),
                base_range,
                compare_range,
                page_mappings,
                counts: DifferenceCounts::default(),
                similarity: m.similarity,
            });
            page_pairs.extend(pair_pages);
        }

        // Stage 5: per-page detectors in memory-bounded batches
        let differences_by_page = self.run_detectors(base, compare, &page_pairs, ctx)?;

        // Stage 6: document-level metadata
        ctx.check()?;
        ctx.report(95, Phase::Aggregating, 0, 0);
        let metadata_differences = compare_metadata(&base.metadata, &compare.metadata);

        // Stages 7-8: aggregation
        let summary = summarize(&differences_by_page, metadata_differences.len());
        apply_counts(&mut document_pairs, &differences_by_page);
        let overall_similarity = overall_similarity(&page_pairs);

        info!(
            "comparison {}: {} page pairs, {} differences, overall similarity {:.3}",
            id,
            page_pairs.len(),
            summary.total,
            overall_similarity
        );

        Ok(ComparisonResult {
            id,
            base_document_id: base.id.clone(),
            compare_document_id: compare.id.clone(),
            page_pairs,
            differences_by_page,
            document_pairs,
            metadata_differences,
            summary,
            overall_similarity,
            created_at,
            completed_at: Utc::now(),
        })
    }

    /// Fan the detectors out over matched page pairs, batch by batch
    ///
    /// Batches bound peak memory: batch-local buffers are dropped before
    /// the next batch starts, and the cancel flag is consulted at every
    /// batch boundary and before each page's detectors run. A cancelled
    /// run finishes its in-flight pages, then stops.
    fn run_detectors(
        &self,
        base: &Document,
        compare: &Document,
        page_pairs: &[PagePair],
        ctx: &RunContext,
    ) -> Result<BTreeMap<String, Vec<Difference>>> {
        let tasks: Vec<DetectorTask> = page_pairs
            .iter()
            .filter(|p| p.is_matched())
            .map(|p| DetectorTask {
                key: p.key(),
                base_page: p.base_index().expect("matched pair has base"),
                compare_page: p.compare_index().expect("matched pair has compare"),
            })
            .collect();

        let total_ops = tasks.len() as u32;
        let batch_size = detector_batch_size(base.page_count().max(compare.page_count()));
        debug!(
            "running detectors over {} page pairs in batches of {}",
            total_ops, batch_size
        );

        let mut differences_by_page: BTreeMap<String, Vec<Difference>> = BTreeMap::new();
        let mut completed: u32 = 0;

        for batch in tasks.chunks(batch_size.max(1)) {
            ctx.check()?;

            let batch_results: Vec<(String, Vec<Difference>)> = batch
                .par_iter()
                .map(|task| {
                    if ctx.is_cancelled() {
                        return (task.key.clone(), Vec::new());
                    }
                    let b = &base.pages[task.base_page];
                    let c = &compare.pages[task.compare_page];

                    let mut diffs =
                        compare_page_text(b, c, task.base_page, task.compare_page);
                    diffs.extend(compare_page_fonts(
                        b,
                        c,
                        task.base_page,
                        task.compare_page,
                        self.config.font.detailed_analysis,
                    ));
                    diffs.extend(compare_page_images(
                        b,
                        c,
                        task.base_page,
                        task.compare_page,
                    ));
                    diffs.extend(compare_page_styles(
                        b,
                        c,
                        task.base_page,
                        task.compare_page,
                    ));
                    (task.key.clone(), diffs)
                })
                .collect();

            for (key, diffs) in batch_results {
                if !diffs.is_empty() {
                    differences_by_page.insert(key, diffs);
                }
            }

            completed += batch.len() as u32;
            let progress = if total_ops == 0 {
                90
            } else {
                30 + (completed * 60 / total_ops).min(60) as u8
            };
            ctx.report(progress, Phase::ComparingPages, completed, total_ops);
        }

        ctx.check()?;
        Ok(differences_by_page)
    }
}

/// Batch size from currently available memory
///
/// Larger documents get smaller batches; the result is clamped so tiny
/// machines still make progress and large ones do not explode fan-out.
fn detector_batch_size(page_count: usize) -> usize {
    let mut sys = System::new();
    sys.refresh_memory();
    let available = sys.available_memory();

    // budget roughly 8 MB of scratch per in-flight page
    let by_memory = (available / (8 * 1024 * 1024)) as usize;
    let by_pages = (page_count / 4).max(1);
    by_memory.min(by_pages).clamp(4, 64)
}

fn summarize(
    differences_by_page: &BTreeMap<String, Vec<Difference>>,
    metadata_count: usize,
) -> ComparisonSummary {
    let mut summary = ComparisonSummary::default();
    for diffs in differences_by_page.values() {
        for diff in diffs {
            match diff.kind() {
                DifferenceKind::Text => summary.text += 1,
                DifferenceKind::Image => summary.image += 1,
                DifferenceKind::Font => summary.font += 1,
                DifferenceKind::Style => summary.style += 1,
                DifferenceKind::Metadata => {}
            }
            summary.total += 1;
        }
    }
    summary.total += metadata_count;
    summary
}

/// Stamp per-page and per-document-pair difference counts
fn apply_counts(
    document_pairs: &mut [DocumentPair],
    differences_by_page: &BTreeMap<String, Vec<Difference>>,
) {
    for pair in document_pairs.iter_mut() {
        let mut counts = DifferenceCounts::default();
        for mapping in pair.page_mappings.iter_mut() {
            let key = match (mapping.base_page, mapping.compare_page) {
                (Some(b), Some(c)) => format!("b{}_c{}", b, c),
                (Some(b), None) => format!("b{}_none", b),
                (None, Some(c)) => format!("none_c{}", c),
                (None, None) => continue,
            };
            let diffs = differences_by_page.get(&key);
            mapping.diff_count = diffs.map_or(0, Vec::len);
            if let Some(diffs) = diffs {
                for diff in diffs {
                    counts.record(diff.kind());
                }
            }
        }
        pair.counts = counts;
    }
}

/// Mean similarity of the matched page pairs
///
/// Unmatched pages are not members of the averaged set; their absence
/// already shows up in the pair list and the difference counts. No pages
/// at all means there is nothing to disagree about; pages with no matches
/// at all share nothing.
fn overall_similarity(page_pairs: &[PagePair]) -> f64 {
    if page_pairs.is_empty() {
        return 1.0;
    }
    let matched: Vec<f64> = page_pairs
        .iter()
        .filter(|p| p.is_matched())
        .map(|p| p.similarity)
        .collect();
    if matched.is_empty() {
        return 0.0;
    }
    matched.iter().sum::<f64>() / matched.len() as f64
}
