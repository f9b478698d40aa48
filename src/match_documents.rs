//! Sub-document matching across the two PDFs
//!
//! After boundary detection each PDF is a list of logical sub-documents.
//! This module pairs them greedily: every (base, compare) boundary pair is
//! scored with a combined text + sampled-visual similarity, the triples are
//! sorted by score descending, and a pair is accepted iff both sides are
//! still unmatched and the score clears the text threshold. Leftover
//! boundaries surface as one-sided matches.

use crate::config::{CompareConfig, RetrySettings};
use crate::error::Result;
use crate::similarity::cosine_tf;
use crate::types::{Document, DocumentBoundary};
use log::{debug, warn};
use std::time::Duration;

/// Seam to the external page renderer
///
/// `compare_pages` renders both pages at the given DPI and returns their
/// dissimilarity in `[0, 1]`, where 0 means visually identical.
/// Implementations own their per-page timeout.
pub trait PageRenderer: Send + Sync {
    fn compare_pages(
        &self,
        base: &Document,
        base_page: usize,
        compare: &Document,
        compare_page: usize,
        dpi: u32,
    ) -> Result<f64>;
}

/// DPI used for the cheap visual sampling pass
const SAMPLE_DPI: u32 = 72;

/// Outcome of boundary pairing, in boundary-index space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryMatch {
    pub base_index: Option<usize>,
    pub compare_index: Option<usize>,
    pub similarity: f64,
}

impl BoundaryMatch {
    pub fn is_matched(&self) -> bool {
        self.base_index.is_some() && self.compare_index.is_some()
    }
}

/// Pair sub-documents across the two PDFs
///
/// Returns matches ordered matched-first (by base boundary index), then
/// unmatched base boundaries, then unmatched compare boundaries.
pub fn match_documents(
    base: &Document,
    compare: &Document,
    base_boundaries: &[DocumentBoundary],
    compare_boundaries: &[DocumentBoundary],
    renderer: Option<&dyn PageRenderer>,
    config: &CompareConfig,
) -> Vec<BoundaryMatch> {
    let mut triples: Vec<(usize, usize, f64)> = Vec::new();
    for (i, bb) in base_boundaries.iter().enumerate() {
        for (j, cb) in compare_boundaries.iter().enumerate() {
            let similarity = combined_similarity(base, compare, bb, cb, renderer, config);
            triples.push((i, j, similarity));
        }
    }

    // Greedy assignment: best score first, both sides matched at most once
    triples.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut base_taken = vec![false; base_boundaries.len()];
    let mut compare_taken = vec![false; compare_boundaries.len()];
    let mut matched: Vec<BoundaryMatch> = Vec::new();

    for (i, j, similarity) in triples {
        if base_taken[i] || compare_taken[j] {
            continue;
        }
        if similarity <= config.comparison.text_threshold {
            break;
        }
        debug!(
            "matched sub-documents base[{}] <-> compare[{}] at {:.3}",
            i, j, similarity
        );
        base_taken[i] = true;
        compare_taken[j] = true;
        matched.push(BoundaryMatch {
            base_index: Some(i),
            compare_index: Some(j),
            similarity,
        });
    }

    matched.sort_by_key(|m| m.base_index);

    for (i, taken) in base_taken.iter().enumerate() {
        if !taken {
            matched.push(BoundaryMatch {
                base_index: Some(i),
                compare_index: None,
                similarity: 0.0,
            });
        }
    }
    for (j, taken) in compare_taken.iter().enumerate() {
        if !taken {
            matched.push(BoundaryMatch {
                base_index: None,
                compare_index: Some(j),
                similarity: 0.0,
            });
        }
    }

    matched
}

/// Combined similarity of two sub-documents: 0.7 text + 0.3 visual
///
/// Text similarity below half the match threshold short-circuits the
/// expensive visual sampling.
pub fn combined_similarity(
    base: &Document,
    compare: &Document,
    base_boundary: &DocumentBoundary,
    compare_boundary: &DocumentBoundary,
    renderer: Option<&dyn PageRenderer>,
    config: &CompareConfig,
) -> f64 {
    let base_text = concat_pages(base, base_boundary);
    let compare_text = concat_pages(compare, compare_boundary);
    let text_sim = cosine_tf(&base_text, &compare_text);

    if text_sim < config.comparison.text_threshold / 2.0 {
        return text_sim;
    }

    let visual_sim = visual_similarity(base, compare, base_boundary, compare_boundary, renderer, config);
    0.7 * text_sim + 0.3 * visual_sim
}

fn concat_pages(document: &Document, boundary: &DocumentBoundary) -> String {
    let mut text = String::new();
    for page in boundary.pages() {
        if let Some(content) = document.pages.get(page) {
            text.push_str(&content.text);
            text.push('\n');
        }
    }
    text
}

/// Mean render similarity over up to `max_sample_pages` evenly spaced pairs
///
/// A failed sample is skipped; when every sample fails (or no renderer is
/// wired up) the visual contribution is 0.
fn visual_similarity(
    base: &Document,
    compare: &Document,
    base_boundary: &DocumentBoundary,
    compare_boundary: &DocumentBoundary,
    renderer: Option<&dyn PageRenderer>,
    config: &CompareConfig,
) -> f64 {
    let Some(renderer) = renderer else {
        return 0.0;
    };

    let samples = config
        .comparison
        .max_sample_pages
        .min(base_boundary.page_count())
        .min(compare_boundary.page_count());
    if samples == 0 {
        return 0.0;
    }

    let mut dissimilarities = Vec::with_capacity(samples);
    for s in 0..samples {
        let fraction = if samples == 1 {
            0.5
        } else {
            s as f64 / (samples - 1) as f64
        };
        let base_page = sample_page(base_boundary, fraction);
        let compare_page = sample_page(compare_boundary, fraction);

        let rendered = with_retry(&config.retry, || {
            renderer.compare_pages(base, base_page, compare, compare_page, SAMPLE_DPI)
        });
        match rendered {
            Ok(dissimilarity) => dissimilarities.push(dissimilarity.clamp(0.0, 1.0)),
            Err(e) => {
                warn!(
                    "visual sample skipped for pages {}/{}: {}",
                    base_page, compare_page, e
                );
            }
        }
    }

    if dissimilarities.is_empty() {
        return 0.0;
    }
    1.0 - dissimilarities.iter().sum::<f64>() / dissimilarities.len() as f64
}

fn sample_page(boundary: &DocumentBoundary, fraction: f64) -> usize {
    let span = (boundary.page_count() - 1) as f64;
    boundary.start_page + (span * fraction).round() as usize
}

/// Run a transient operation with exponential backoff
///
/// Delays double from the configured base (100 ms, 200 ms, ...). The last
/// error is returned once the attempt budget is spent; callers substitute
/// a fallback from there.
pub fn with_retry<T>(
    settings: &RetrySettings,
    mut operation: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = settings.max_attempts.max(1);
    let mut delay = Duration::from_millis(settings.base_delay_ms);

    let mut last_error = None;
    for attempt in 1..=attempts {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < attempts {
                    debug!("attempt {}/{} failed, retrying: {}", attempt, attempts, e);
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                last_error = Some(e);
            }
        }
    }
    Err(last_error.expect("at least one attempt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompareError;
    use crate::types::PageContent;
    use std::collections::BTreeMap;

    fn doc(id: &str, pages: &[&str]) -> Document {
        Document {
            id: id.to_string(),
            filename: format!("{}.pdf", id),
            pages: pages.iter().map(|t| PageContent::text_only(*t)).collect(),
            metadata: BTreeMap::new(),
        }
    }

    /// Renderer that reports identical pages
    struct IdenticalRenderer;
    impl PageRenderer for IdenticalRenderer {
        fn compare_pages(
            &self,
            _base: &Document,
            _bp: usize,
            _compare: &Document,
            _cp: usize,
            _dpi: u32,
        ) -> Result<f64> {
            Ok(0.0)
        }
    }

    /// Renderer that always fails
    struct BrokenRenderer;
    impl PageRenderer for BrokenRenderer {
        fn compare_pages(
            &self,
            _base: &Document,
            bp: usize,
            _compare: &Document,
            _cp: usize,
            _dpi: u32,
        ) -> Result<f64> {
            Err(CompareError::RenderFailed {
                page: bp,
                reason: "no surface".to_string(),
            })
        }
    }

    #[test]
    fn test_identical_documents_match() {
        let base = doc("a", &["alpha beta gamma delta", "epsilon zeta eta theta"]);
        let compare = doc("b", &["alpha beta gamma delta", "epsilon zeta eta theta"]);
        let bb = vec![DocumentBoundary::new(0, 1)];
        let cb = vec![DocumentBoundary::new(0, 1)];

        let matches = match_documents(
            &base,
            &compare,
            &bb,
            &cb,
            Some(&IdenticalRenderer),
            &CompareConfig::default(),
        );
        assert_eq!(matches.len(), 1);
        assert!(matches[0].is_matched());
        assert!((matches[0].similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_text_short_circuit_below_half_threshold() {
        let base = doc("a", &["alpha beta gamma delta"]);
        let compare = doc("b", &["completely different words entirely"]);
        let sim = combined_similarity(
            &base,
            &compare,
            &DocumentBoundary::new(0, 0),
            &DocumentBoundary::new(0, 0),
            Some(&IdenticalRenderer),
            &CompareConfig::default(),
        );
        // cosine is 0, so the renderer never lifts the score
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_render_failures_degrade_to_text_weight_only() {
        let base = doc("a", &["shared vocabulary for the sample pages"]);
        let compare = doc("b", &["shared vocabulary for the sample pages"]);
        let sim = combined_similarity(
            &base,
            &compare,
            &DocumentBoundary::new(0, 0),
            &DocumentBoundary::new(0, 0),
            Some(&BrokenRenderer),
            &CompareConfig::default(),
        );
        // text_sim 1.0, visual 0 after all samples fail
        assert!((sim - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_unmatched_boundaries_become_one_sided() {
        let base = doc("a", &["quarterly finance report revenue", "unrelated appendix content"]);
        let compare = doc("b", &["quarterly finance report revenue"]);
        let bb = vec![DocumentBoundary::new(0, 0), DocumentBoundary::new(1, 1)];
        let cb = vec![DocumentBoundary::new(0, 0)];

        let matches = match_documents(&base, &compare, &bb, &cb, None, &CompareConfig::default());
        assert_eq!(matches.len(), 2);
        let matched: Vec<_> = matches.iter().filter(|m| m.is_matched()).collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].base_index, Some(0));
        let one_sided: Vec<_> = matches.iter().filter(|m| !m.is_matched()).collect();
        assert_eq!(one_sided.len(), 1);
        assert_eq!(one_sided[0].base_index, Some(1));
        assert_eq!(one_sided[0].similarity, 0.0);
    }

    #[test]
    fn test_with_retry_recovers_after_transient_failures() {
        let settings = RetrySettings {
            max_attempts: 3,
            base_delay_ms: 1,
        };
        let mut attempts = 0;
        let value = with_retry(&settings, || {
            attempts += 1;
            if attempts < 3 {
                Err(CompareError::RenderFailed {
                    page: 0,
                    reason: "transient".to_string(),
                })
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_with_retry_exhausts_budget() {
        let settings = RetrySettings {
            max_attempts: 2,
            base_delay_ms: 1,
        };
        let mut attempts = 0;
        let err = with_retry(&settings, || -> Result<u32> {
            attempts += 1;
            Err(CompareError::RenderFailed {
                page: 0,
                reason: "persistent".to_string(),
            })
        })
        .unwrap_err();
        assert_eq!(attempts, 2);
        assert!(matches!(err, CompareError::RenderFailed { .. }));
    }

    #[test]
    fn test_each_side_matched_at_most_once() {
        let texts = ["budget analysis for operations", "budget analysis for operations team"];
        let base = doc("a", &texts);
        let compare = doc("b", &texts);
        let bb = vec![DocumentBoundary::new(0, 0), DocumentBoundary::new(1, 1)];
        let cb = vec![DocumentBoundary::new(0, 0), DocumentBoundary::new(1, 1)];

        let matches = match_documents(&base, &compare, &bb, &cb, None, &CompareConfig::default());
        let mut base_seen = std::collections::HashSet::new();
        let mut compare_seen = std::collections::HashSet::new();
        for m in &matches {
            if let Some(i) = m.base_index {
                assert!(base_seen.insert(i));
            }
            if let Some(j) = m.compare_index {
                assert!(compare_seen.insert(j));
            }
        }
        assert_eq!(base_seen.len(), 2);
        assert_eq!(compare_seen.len(), 2);
    }
}
