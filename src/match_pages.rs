//! Page matching within a matched sub-document pair
//!
//! Every (base page, compare page) combination is scored into a dense
//! matrix, then pages are assigned greedily in three passes with
//! descending confidence floors (0.95 / 0.85 / 0.75 by default). Pages
//! left over after the last pass surface as one-sided pairs, so every page
//! of both ranges appears in exactly one [`PagePair`].

use crate::config::PageMatcherSettings;
use crate::similarity::{
    count_ratio, edit_similarity, font_distribution_similarity, histogram_similarity, jaccard,
    ngram_similarity,
};
use crate::types::{PageFingerprint, PagePair};
use rayon::prelude::*;

/// Pair pages between two fingerprint ranges
///
/// Output ordering is stable: matched pairs by base index, then base-only
/// pairs by base index, then compare-only pairs by compare index.
pub fn match_pages(
    base: &[PageFingerprint],
    compare: &[PageFingerprint],
    settings: &PageMatcherSettings,
) -> Vec<PagePair> {
    let scores: Vec<Vec<f64>> = base
        .par_iter()
        .enumerate()
        .map(|(i, b)| {
            compare
                .iter()
                .enumerate()
                .map(|(j, c)| page_score(b, c, i, j, base.len(), compare.len(), settings))
                .collect()
        })
        .collect();

    let mut base_match: Vec<Option<(usize, f64)>> = vec![None; base.len()];
    let mut compare_taken = vec![false; compare.len()];

    let passes = [
        settings.high_threshold,
        settings.medium_threshold,
        settings.low_threshold,
    ];
    for floor in passes {
        greedy_pass(&scores, floor, &mut base_match, &mut compare_taken);
    }

    let mut pairs: Vec<PagePair> = Vec::with_capacity(base.len().max(compare.len()));
    for (i, matched) in base_match.iter().enumerate() {
        if let Some((j, score)) = matched {
            pairs.push(PagePair::matched(base[i].clone(), compare[*j].clone(), *score));
        }
    }
    for (i, matched) in base_match.iter().enumerate() {
        if matched.is_none() {
            pairs.push(PagePair::base_only(base[i].clone()));
        }
    }
    for (j, taken) in compare_taken.iter().enumerate() {
        if !taken {
            pairs.push(PagePair::compare_only(compare[j].clone()));
        }
    }

    pairs
}

/// One greedy pass: accept free pairs scoring at or above `floor`, best first
fn greedy_pass(
    scores: &[Vec<f64>],
    floor: f64,
    base_match: &mut [Option<(usize, f64)>],
    compare_taken: &mut [bool],
) {
    let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
    for (i, row) in scores.iter().enumerate() {
        if base_match[i].is_some() {
            continue;
        }
        for (j, &score) in row.iter().enumerate() {
            if !compare_taken[j] && score >= floor {
                candidates.push((i, j, score));
            }
        }
    }

    candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    for (i, j, score) in candidates {
        if base_match[i].is_none() && !compare_taken[j] {
            base_match[i] = Some((j, score));
            compare_taken[j] = true;
        }
    }
}

/// Full page-pair score: weighted content components plus positional bias
///
/// Content carries `weights.content_mass()` of the score; equal non-zero
/// text hashes short-circuit content to its full mass. The positional term
/// rewards pages sitting at the same relative offset in their ranges.
pub fn page_score(
    base: &PageFingerprint,
    compare: &PageFingerprint,
    base_pos: usize,
    compare_pos: usize,
    base_len: usize,
    compare_len: usize,
    settings: &PageMatcherSettings,
) -> f64 {
    let weights = &settings.weights;

    let content = if base.text_hash != 0 && base.text_hash == compare.text_hash {
        weights.content_mass()
    } else {
        weights.text * text_score(base, compare)
            + weights.structure * structure_score(base, compare)
            + weights.style * style_score(base, compare)
            + weights.image * image_score(base, compare)
    };

    let positional =
        1.0 - (base_pos as f64 / base_len as f64 - compare_pos as f64 / compare_len as f64).abs();

    content + weights.positional * positional
}

/// 0.5 keyword jaccard + 0.3 trigram + 0.2 edit similarity
fn text_score(base: &PageFingerprint, compare: &PageFingerprint) -> f64 {
    0.5 * jaccard(&base.keywords, &compare.keywords)
        + 0.3 * ngram_similarity(&base.normalized_text, &compare.normalized_text)
        + 0.2 * edit_similarity(&base.normalized_text, &compare.normalized_text)
}

/// Mean of the structural components that have data on at least one side
fn structure_score(base: &PageFingerprint, compare: &PageFingerprint) -> f64 {
    let mut components: Vec<f64> = Vec::with_capacity(3);

    if !base.font_distribution.is_empty() || !compare.font_distribution.is_empty() {
        components.push(font_distribution_similarity(
            &base.font_distribution,
            &compare.font_distribution,
        ));
    }
    if base.element_count > 0 || compare.element_count > 0 {
        components.push(count_ratio(base.element_count, compare.element_count));
    }
    if !base.y_positions.is_empty() || !compare.y_positions.is_empty() {
        components.push(histogram_similarity(&base.y_positions, &compare.y_positions));
    }

    if components.is_empty() {
        // two pages with no structural data at all are structurally alike
        1.0
    } else {
        components.iter().sum::<f64>() / components.len() as f64
    }
}

/// Font-distribution similarity, zero when either table is empty
fn style_score(base: &PageFingerprint, compare: &PageFingerprint) -> f64 {
    if base.font_distribution.is_empty() || compare.font_distribution.is_empty() {
        return 0.0;
    }
    font_distribution_similarity(&base.font_distribution, &compare.font_distribution)
}

fn image_score(base: &PageFingerprint, compare: &PageFingerprint) -> f64 {
    match (base.has_images, compare.has_images) {
        (false, false) => 1.0,
        (true, true) => count_ratio(base.image_count, compare.image_count),
        _ => 0.0,
    }
}
