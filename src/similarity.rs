//! Similarity primitives
//!
//! Pure, deterministic functions over strings and simple containers. These
//! are the leaves of the comparison pipeline: every matcher score is built
//! from them. All functions return values in `[0, 1]` and are symmetric
//! where their mathematical definition is symmetric.

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Words dropped by [`keywords`] regardless of length
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// Characters stripped during normalization
const STRIPPED: &[char] = &[
    '.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '"', '\'',
];

/// Lowercase, strip punctuation, collapse whitespace to single spaces
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !STRIPPED.contains(c))
        .flat_map(|c| c.to_lowercase())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Significant words of a text: whitespace-split, length >= 3, stop words removed
pub fn keywords(text: &str) -> BTreeSet<String> {
    normalize(text)
        .split_whitespace()
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// Jaccard index of two sets; two empty sets are identical (1.0)
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Jaccard over character 3-grams, falling back to unigrams for short input
pub fn ngram_similarity(s1: &str, s2: &str) -> f64 {
    let c1: Vec<char> = s1.chars().collect();
    let c2: Vec<char> = s2.chars().collect();

    let n = if c1.len() < 3 || c2.len() < 3 { 1 } else { 3 };

    let grams = |chars: &[char]| -> BTreeSet<String> {
        if chars.len() < n {
            return BTreeSet::new();
        }
        chars.windows(n).map(|w| w.iter().collect()).collect()
    };

    jaccard(&grams(&c1), &grams(&c2))
}

/// Edit-distance similarity: `1 - levenshtein / max_len`
///
/// Strings longer than 1000 characters are not diffed in full; instead
/// 300-character windows at the start, middle and end are compared and
/// combined with weights 0.5/0.3/0.2. A window only contributes when both
/// strings are long enough to expose it.
pub fn edit_similarity(s1: &str, s2: &str) -> f64 {
    let c1: Vec<char> = s1.chars().collect();
    let c2: Vec<char> = s2.chars().collect();

    if c1.is_empty() && c2.is_empty() {
        return 1.0;
    }
    if c1.is_empty() || c2.is_empty() {
        return 0.0;
    }

    if c1.len().max(c2.len()) > 1000 {
        return sampled_edit_similarity(&c1, &c2);
    }

    let distance = levenshtein(&c1, &c2);
    1.0 - distance as f64 / c1.len().max(c2.len()) as f64
}

const WINDOW: usize = 300;

/// Window positions for sampled comparison of long strings
#[derive(Clone, Copy)]
enum WindowAt {
    Start,
    Middle,
    End,
}

fn window_of(chars: &[char], at: WindowAt) -> Option<&[char]> {
    let len = chars.len();
    match at {
        WindowAt::Start => Some(&chars[..WINDOW.min(len)]),
        // middle and end windows need enough length to be distinct samples
        WindowAt::Middle => {
            if len < 2 * WINDOW {
                None
            } else {
                let mid = len / 2;
                Some(&chars[mid - WINDOW / 2..mid + WINDOW / 2])
            }
        }
        WindowAt::End => {
            if len < WINDOW {
                None
            } else {
                Some(&chars[len - WINDOW..])
            }
        }
    }
}

fn sampled_edit_similarity(c1: &[char], c2: &[char]) -> f64 {
    let samples = [
        (WindowAt::Start, 0.5),
        (WindowAt::Middle, 0.3),
        (WindowAt::End, 0.2),
    ];

    let mut total_weight = 0.0;
    let mut weighted = 0.0;
    for (at, weight) in samples {
        let (Some(w1), Some(w2)) = (window_of(c1, at), window_of(c2, at)) else {
            continue;
        };
        let distance = levenshtein(w1, w2);
        let max_len = w1.len().max(w2.len());
        if max_len == 0 {
            continue;
        }
        weighted += weight * (1.0 - distance as f64 / max_len as f64);
        total_weight += weight;
    }

    if total_weight == 0.0 {
        0.0
    } else {
        weighted / total_weight
    }
}

/// Levenshtein distance with the two-row table (O(min(m,n)) memory)
fn levenshtein(a: &[char], b: &[char]) -> usize {
    // Keep the shorter string on the row axis
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return long.len();
    }

    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr = vec![0usize; short.len() + 1];

    for (i, lc) in long.iter().enumerate() {
        curr[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let substitution = prev[j] + usize::from(lc != sc);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[short.len()]
}

/// Cosine similarity of word-frequency vectors over normalized text
///
/// Empty input has no direction, so any comparison involving an empty
/// string is 0.
pub fn cosine_tf(s1: &str, s2: &str) -> f64 {
    let freq = |s: &str| -> HashMap<String, usize> {
        let mut m = HashMap::new();
        for token in normalize(s).split_whitespace() {
            *m.entry(token.to_string()).or_default() += 1;
        }
        m
    };

    let f1 = freq(s1);
    let f2 = freq(s2);
    if f1.is_empty() || f2.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut mag1_sq = 0.0;
    let mut mag2_sq = 0.0;

    for (token, count1) in &f1 {
        let c1 = *count1 as f64;
        mag1_sq += c1 * c1;
        if let Some(&count2) = f2.get(token) {
            dot += c1 * count2 as f64;
        }
    }
    for count2 in f2.values() {
        let c2 = *count2 as f64;
        mag2_sq += c2 * c2;
    }

    let mag = mag1_sq.sqrt() * mag2_sq.sqrt();
    if mag == 0.0 {
        0.0
    } else {
        dot / mag
    }
}

/// Similarity of two font-usage distributions
///
/// `1 - Σ|a_f - b_f| / Σ max(a_f, b_f)` over the union of font names.
/// Two pages using no fonts at all are considered identical.
pub fn font_distribution_similarity(a: &BTreeMap<String, u32>, b: &BTreeMap<String, u32>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let names: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    let mut diff_sum = 0u64;
    let mut max_sum = 0u64;
    for name in names {
        let av = u64::from(*a.get(name.as_str()).unwrap_or(&0));
        let bv = u64::from(*b.get(name.as_str()).unwrap_or(&0));
        diff_sum += av.abs_diff(bv);
        max_sum += av.max(bv);
    }

    if max_sum == 0 {
        1.0
    } else {
        1.0 - diff_sum as f64 / max_sum as f64
    }
}

const HISTOGRAM_BINS: usize = 10;

/// Similarity of two position distributions
///
/// Positions are min-max normalized to `[0, 1]`, binned into 10 equal
/// buckets, and the bucket histograms (normalized to sum 1) are compared by
/// Euclidean distance: `max(0, 1 - d)`.
pub fn histogram_similarity(p1: &[f64], p2: &[f64]) -> f64 {
    if p1.is_empty() && p2.is_empty() {
        return 1.0;
    }
    if p1.is_empty() || p2.is_empty() {
        return 0.0;
    }

    let h1 = position_histogram(p1);
    let h2 = position_histogram(p2);

    let mut dist_sq = 0.0;
    for (a, b) in h1.iter().zip(h2.iter()) {
        dist_sq += (a - b) * (a - b);
    }
    (1.0 - dist_sq.sqrt()).max(0.0)
}

fn position_histogram(positions: &[f64]) -> [f64; HISTOGRAM_BINS] {
    let min = positions.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = positions.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;

    let mut bins = [0.0f64; HISTOGRAM_BINS];
    for &p in positions {
        let normalized = if span > 0.0 { (p - min) / span } else { 0.0 };
        let bin = ((normalized * HISTOGRAM_BINS as f64) as usize).min(HISTOGRAM_BINS - 1);
        bins[bin] += 1.0;
    }

    let total = positions.len() as f64;
    for bin in &mut bins {
        *bin /= total;
    }
    bins
}

/// Ratio of the smaller count to the larger; two zero counts are identical
pub fn count_ratio(a: usize, b: usize) -> f64 {
    if a == 0 && b == 0 {
        return 1.0;
    }
    a.min(b) as f64 / a.max(b) as f64
}
