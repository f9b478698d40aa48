//! Document-boundary detection
//!
//! A single PDF sometimes concatenates several logical documents (a scan
//! batch, a contract bundle, an export of many reports). This module scans
//! per-page text for signals that a page starts a new logical document and
//! splits the page range accordingly.
//!
//! A page starts a new document when any high-confidence signal fires
//! (title page, table of contents, document-kind header) or when at least
//! two weaker signals co-occur (keyword-similarity drop against the
//! previous page, page-number reset in the footer, first/last-line
//! mismatch).

use crate::similarity::{edit_similarity, jaccard, keywords, normalize};
use crate::types::DocumentBoundary;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static ALL_CAPS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z][A-Z ]{9,}").expect("regex"));

static CAPITALIZED_BY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Z][A-Za-z]+(?: [A-Z][A-Za-z]+)*\s+(?:by|By|BY|Author|AUTHOR)\b")
        .expect("regex")
});

static AUTHOR_HIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:author|prepared by|written by|by)\b").expect("regex"));

static DATE_HIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:january|february|march|april|may|june|july|august|september|october|november|december)\b\s+\d{1,2},?\s+\d{4}|\b(?:19|20)\d{2}\b|\b\d{1,2}/\d{1,2}/\d{2,4}\b",
    )
    .expect("regex")
});

static TOC_ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\..*?\d+").expect("regex"));

static DOCUMENT_KIND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(report|document|presentation|analysis|proposal|plan|agreement|contract)\b")
        .expect("regex")
});

static FOOTER_PAGE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:page\s+)?(\d{1,4})\s*$").expect("regex"));

/// Keyword-similarity floor below which a page no longer continues the
/// previous one
const CONTINUITY_FLOOR: f64 = 0.2;
/// How much more similar the lookahead pages must be than the previous page
const LOOKAHEAD_RATIO: f64 = 1.5;
const LOOKAHEAD_PAGES: usize = 3;
const EDGE_LINE_FLOOR: f64 = 0.5;

/// Split a page-text list into ordered, non-overlapping boundaries
///
/// The returned boundaries partition `[0, page_count)` exactly: the first
/// starts at page 0, each next boundary starts where the previous ended,
/// and the last extends to `page_count - 1`. `min_pages` suppresses splits
/// that would leave a segment shorter than the configured floor.
pub fn detect_boundaries(page_texts: &[String], min_pages: usize) -> Vec<DocumentBoundary> {
    if page_texts.is_empty() {
        return Vec::new();
    }
    if page_texts.len() == 1 {
        return vec![DocumentBoundary::new(0, 0)];
    }

    let page_keywords: Vec<BTreeSet<String>> =
        page_texts.iter().map(|t| keywords(t)).collect();

    let mut boundaries = Vec::new();
    let mut start = 0usize;

    for page in 1..page_texts.len() {
        if page - start < min_pages.max(1) {
            continue;
        }
        if starts_new_document(page_texts, &page_keywords, page) {
            boundaries.push(DocumentBoundary::new(start, page - 1));
            start = page;
        }
    }

    boundaries.push(DocumentBoundary::new(start, page_texts.len() - 1));
    boundaries
}

fn starts_new_document(
    texts: &[String],
    page_keywords: &[BTreeSet<String>],
    page: usize,
) -> bool {
    let text = &texts[page];

    if looks_like_title_page(text) || has_toc_marker(text) || has_document_kind_header(text) {
        return true;
    }

    let mut weak_signals = 0;
    if keyword_continuity_break(texts, page_keywords, page) {
        weak_signals += 1;
    }
    if page_number_reset(&texts[page - 1], text) {
        weak_signals += 1;
    }
    if edge_lines_mismatch(&texts[page - 1], text) {
        weak_signals += 1;
    }
    weak_signals >= 2
}

/// Short page carrying a title-like run plus an author or date hit
fn looks_like_title_page(text: &str) -> bool {
    if text.len() >= 1000 {
        return false;
    }
    let title_hit = ALL_CAPS_RUN.is_match(text) || CAPITALIZED_BY.is_match(text);
    title_hit && (AUTHOR_HIT.is_match(text) || DATE_HIT.is_match(text))
}

/// Table-of-contents marker plus at least three dotted entries
fn has_toc_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    let marker = lower.contains("table of contents")
        || lower.contains("contents")
        || lower.contains("index");
    marker && TOC_ENTRY.find_iter(text).count() >= 3
}

/// Short page naming its own document kind at least twice
fn has_document_kind_header(text: &str) -> bool {
    text.len() < 2000 && DOCUMENT_KIND.find_iter(text).count() >= 2
}

/// Similarity to the previous page collapses while similarity to the pages
/// ahead stays high
fn keyword_continuity_break(
    texts: &[String],
    page_keywords: &[BTreeSet<String>],
    page: usize,
) -> bool {
    let prev_sim = jaccard(&page_keywords[page], &page_keywords[page - 1]);
    if prev_sim >= CONTINUITY_FLOOR {
        return false;
    }

    let ahead_end = (page + 1 + LOOKAHEAD_PAGES).min(texts.len());
    let ahead: Vec<f64> = (page + 1..ahead_end)
        .map(|i| jaccard(&page_keywords[page], &page_keywords[i]))
        .collect();
    if ahead.is_empty() {
        return false;
    }
    let ahead_avg = ahead.iter().sum::<f64>() / ahead.len() as f64;

    if prev_sim == 0.0 {
        ahead_avg > 0.0
    } else {
        ahead_avg / prev_sim > LOOKAHEAD_RATIO
    }
}

/// Footer page number drops back to 1 after counting up
fn page_number_reset(prev_text: &str, text: &str) -> bool {
    let footer_number = |t: &str| -> Option<u32> {
        let last_line = t.lines().rev().find(|l| !l.trim().is_empty())?;
        let captures = FOOTER_PAGE_NUMBER.captures(last_line.trim())?;
        captures.get(1)?.as_str().parse().ok()
    };

    match (footer_number(prev_text), footer_number(text)) {
        (Some(prev), Some(current)) => current == 1 && prev > 1,
        _ => false,
    }
}

/// Both the first and last line diverge from the previous page
fn edge_lines_mismatch(prev_text: &str, text: &str) -> bool {
    fn first_line(t: &str) -> &str {
        t.lines().find(|l| !l.trim().is_empty()).unwrap_or("")
    }
    fn last_line(t: &str) -> &str {
        t.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("")
    }

    let first_sim = edit_similarity(&normalize(first_line(prev_text)), &normalize(first_line(text)));
    let last_sim = edit_similarity(&normalize(last_line(prev_text)), &normalize(last_line(text)));
    first_sim < EDGE_LINE_FLOOR && last_sim < EDGE_LINE_FLOOR
}
