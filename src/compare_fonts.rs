//! Font difference detection for a matched page pair
//!
//! Fonts are matched in two stages: exact name equality first, then a
//! scored pass over the remainder (name 0.5, family 0.3, bold 0.1,
//! italic 0.1, with half credit for partial containment) keeping matches
//! above 0.4. Matched fonts that still differ in any attribute emit a
//! Modified difference; leftovers emit Added/Deleted.
//!
//! Subset prefixes ("ABCDEF+Helvetica") are stripped before every equality
//! test, so two subsetted embeddings of the same face never diff.
//!
//! The attribute comparison is independent of the page the fonts sit on,
//! so the computed deltas are memoized process-wide on a hash of the two
//! sorted font-signature lists; page numbers, positions and fresh ids are
//! stamped on retrieval.

use crate::types::{
    ChangeType, Difference, DifferenceDetail, FontInfo, PageContent, Rect, Severity,
};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use uuid::Uuid;

/// Minimum score for a stage-two font match
const FONT_MATCH_FLOOR: f64 = 0.4;

/// Page-independent description of one font change
#[derive(Debug, Clone)]
struct FontDelta {
    change_type: ChangeType,
    severity: Severity,
    description: String,
    base_font: Option<FontInfo>,
    compare_font: Option<FontInfo>,
    changed_fields: Vec<String>,
}

static FONT_DELTA_MEMO: Lazy<DashMap<u64, Arc<Vec<FontDelta>>>> = Lazy::new(DashMap::new);

/// Diff the font tables of two pages
///
/// With `detailed` disabled only presence changes (Added/Deleted) are
/// reported; attribute-level Modified records are skipped.
pub fn compare_page_fonts(
    base: &PageContent,
    compare: &PageContent,
    base_page: usize,
    compare_page: usize,
    detailed: bool,
) -> Vec<Difference> {
    let key = memo_key(&base.fonts, &compare.fonts, detailed);
    let deltas = if let Some(hit) = FONT_DELTA_MEMO.get(&key) {
        Arc::clone(&hit)
    } else {
        let computed = Arc::new(font_deltas(&base.fonts, &compare.fonts, detailed));
        FONT_DELTA_MEMO.insert(key, Arc::clone(&computed));
        computed
    };

    deltas
        .iter()
        .enumerate()
        .map(|(k, delta)| Difference {
            id: Uuid::new_v4(),
            change_type: delta.change_type,
            severity: delta.severity,
            description: delta.description.clone(),
            base_page: Some(base_page),
            compare_page: Some(compare_page),
            position: Some(font_marker_position(k, compare.width, compare.height)),
            bounds: None,
            detail: DifferenceDetail::Font {
                base_font: delta.base_font.clone(),
                compare_font: delta.compare_font.clone(),
                changed_fields: delta.changed_fields.clone(),
            },
        })
        .collect()
}

/// Deterministic placement for the k-th font difference on a page
///
/// Font changes have no source bbox, so markers stack down the left side:
/// `(0.1W, min(0.5H, (0.1 + 0.03k)H), 0.8W, 0.03H)`.
fn font_marker_position(k: usize, page_width: f64, page_height: f64) -> Rect {
    Rect::new(
        0.1 * page_width,
        (0.5f64).min(0.1 + 0.03 * k as f64) * page_height,
        0.8 * page_width,
        0.03 * page_height,
    )
}

/// 64-bit key over both sorted signature lists
fn memo_key(base: &[FontInfo], compare: &[FontInfo], detailed: bool) -> u64 {
    let mut base_sigs: Vec<String> = base.iter().map(FontInfo::signature).collect();
    let mut compare_sigs: Vec<String> = compare.iter().map(FontInfo::signature).collect();
    base_sigs.sort();
    compare_sigs.sort();

    let mut hasher = blake3::Hasher::new();
    hasher.update(&[u8::from(detailed)]);
    for sig in &base_sigs {
        hasher.update(sig.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"||");
    for sig in &compare_sigs {
        hasher.update(sig.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    u64::from_le_bytes(digest.as_bytes()[..8].try_into().expect("8-byte prefix"))
}

fn font_deltas(base: &[FontInfo], compare: &[FontInfo], detailed: bool) -> Vec<FontDelta> {
    let mut base_free: Vec<&FontInfo> = base.iter().collect();
    let mut compare_free: Vec<&FontInfo> = compare.iter().collect();
    let mut matched: Vec<(&FontInfo, &FontInfo)> = Vec::new();

    // Stage 1: exact name equality
    let mut i = 0;
    while i < base_free.len() {
        if let Some(j) = compare_free
            .iter()
            .position(|c| c.name == base_free[i].name)
        {
            matched.push((base_free.remove(i), compare_free.remove(j)));
        } else {
            i += 1;
        }
    }

    // Stage 2: scored matching over the remainder
    let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
    for (bi, b) in base_free.iter().enumerate() {
        for (ci, c) in compare_free.iter().enumerate() {
            let score = font_match_score(b, c);
            if score > FONT_MATCH_FLOOR {
                candidates.push((bi, ci, score));
            }
        }
    }
    candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut base_taken = vec![false; base_free.len()];
    let mut compare_taken = vec![false; compare_free.len()];
    for (bi, ci, _) in candidates {
        if !base_taken[bi] && !compare_taken[ci] {
            base_taken[bi] = true;
            compare_taken[ci] = true;
            matched.push((base_free[bi], compare_free[ci]));
        }
    }

    let mut deltas = Vec::new();

    if detailed {
        for (b, c) in &matched {
            if let Some(delta) = modified_delta(b, c) {
                deltas.push(delta);
            }
        }
    }

    for (bi, b) in base_free.iter().enumerate() {
        if !base_taken.get(bi).copied().unwrap_or(false) {
            deltas.push(FontDelta {
                change_type: ChangeType::Deleted,
                severity: Severity::Minor,
                description: format!("Font removed: {}", b.base_name()),
                base_font: Some((*b).clone()),
                compare_font: None,
                changed_fields: Vec::new(),
            });
        }
    }
    for (ci, c) in compare_free.iter().enumerate() {
        if !compare_taken.get(ci).copied().unwrap_or(false) {
            deltas.push(FontDelta {
                change_type: ChangeType::Added,
                severity: Severity::Minor,
                description: format!("Font added: {}", c.base_name()),
                base_font: None,
                compare_font: Some((*c).clone()),
                changed_fields: Vec::new(),
            });
        }
    }

    deltas
}

/// Match score for stage two: name 0.5, family 0.3, bold 0.1, italic 0.1
///
/// Name and family get full credit on (prefix-stripped) equality and half
/// credit when one contains the other.
fn font_match_score(base: &FontInfo, compare: &FontInfo) -> f64 {
    let name_credit = containment_credit(base.base_name(), compare.base_name());
    let family_credit = containment_credit(base.base_family(), compare.base_family());
    let bold_credit = f64::from(base.bold == compare.bold);
    let italic_credit = f64::from(base.italic == compare.italic);

    0.5 * name_credit + 0.3 * family_credit + 0.1 * bold_credit + 0.1 * italic_credit
}

fn containment_credit(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    if a_lower == b_lower {
        1.0
    } else if !a_lower.is_empty()
        && !b_lower.is_empty()
        && (a_lower.contains(&b_lower) || b_lower.contains(&a_lower))
    {
        0.5
    } else {
        0.0
    }
}

/// Attribute-level delta for a matched font pair, if anything differs
///
/// Comparisons run on prefix-stripped names, so two differently tagged
/// subsets of one face produce no delta. A font whose only change is
/// gaining or losing subsetting reports a Cosmetic delta.
fn modified_delta(base: &FontInfo, compare: &FontInfo) -> Option<FontDelta> {
    let mut changed_fields = Vec::new();
    if base.base_name() != compare.base_name() {
        changed_fields.push("name".to_string());
    }
    if base.base_family() != compare.base_family() {
        changed_fields.push("family".to_string());
    }
    if base.embedded != compare.embedded {
        changed_fields.push("embedded".to_string());
    }
    if base.bold != compare.bold {
        changed_fields.push("bold".to_string());
    }
    if base.italic != compare.italic {
        changed_fields.push("italic".to_string());
    }

    let base_subsetted = base.is_subsetted();
    let compare_subsetted = compare.is_subsetted();

    if changed_fields.is_empty() {
        if base_subsetted == compare_subsetted {
            return None;
        }
        // subsetting status flipped with nothing else touched
        return Some(FontDelta {
            change_type: ChangeType::Modified,
            severity: Severity::Cosmetic,
            description: format!("Font subsetting changed: {}", base.base_name()),
            base_font: Some(base.clone()),
            compare_font: Some(compare.clone()),
            changed_fields: vec!["subset_prefix".to_string()],
        });
    }

    let severity = if changed_fields.iter().any(|f| f == "family") {
        Severity::Major
    } else {
        Severity::Minor
    };

    Some(FontDelta {
        change_type: ChangeType::Modified,
        severity,
        description: format!(
            "Font changed: {} ({})",
            base.base_name(),
            changed_fields.join(", ")
        ),
        base_font: Some(base.clone()),
        compare_font: Some(compare.clone()),
        changed_fields,
    })
}
