//! Text difference detection for a matched page pair
//!
//! Runs a line-level LCS diff (via the `similar` crate's Myers
//! implementation) over the two pages' text and emits one difference per
//! changed line. Replace regions become Modified records; surplus lines in
//! either direction become Added/Deleted records.

use crate::types::{
    ChangeType, Difference, DifferenceDetail, PageContent, Rect, Severity,
};
use similar::{Algorithm, DiffOp, TextDiff};
use uuid::Uuid;

/// Diff two pages' text line-by-line
pub fn compare_page_text(
    base: &PageContent,
    compare: &PageContent,
    base_page: usize,
    compare_page: usize,
) -> Vec<Difference> {
    let base_lines: Vec<&str> = base.text.lines().collect();
    let compare_lines: Vec<&str> = compare.text.lines().collect();

    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(&base_lines, &compare_lines);

    let mut differences = Vec::new();

    for op in diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                for offset in 0..old_len {
                    let line = base_lines[old_index + offset];
                    differences.push(line_difference(
                        ChangeType::Deleted,
                        Some(line),
                        None,
                        old_index + offset,
                        base,
                        compare,
                        base_page,
                        compare_page,
                    ));
                }
            }
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                for offset in 0..new_len {
                    let line = compare_lines[new_index + offset];
                    differences.push(line_difference(
                        ChangeType::Added,
                        None,
                        Some(line),
                        new_index + offset,
                        base,
                        compare,
                        base_page,
                        compare_page,
                    ));
                }
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                // pair lines positionally; the overhang falls back to
                // pure additions or deletions
                let paired = old_len.min(new_len);
                for offset in 0..paired {
                    differences.push(modified_difference(
                        base_lines[old_index + offset],
                        compare_lines[new_index + offset],
                        new_index + offset,
                        base,
                        compare,
                        base_page,
                        compare_page,
                    ));
                }
                for offset in paired..old_len {
                    differences.push(line_difference(
                        ChangeType::Deleted,
                        Some(base_lines[old_index + offset]),
                        None,
                        old_index + offset,
                        base,
                        compare,
                        base_page,
                        compare_page,
                    ));
                }
                for offset in paired..new_len {
                    differences.push(line_difference(
                        ChangeType::Added,
                        None,
                        Some(compare_lines[new_index + offset]),
                        new_index + offset,
                        base,
                        compare,
                        base_page,
                        compare_page,
                    ));
                }
            }
        }
    }

    differences
}

#[allow(clippy::too_many_arguments)]
fn line_difference(
    change_type: ChangeType,
    base_text: Option<&str>,
    compare_text: Option<&str>,
    line_number: usize,
    base: &PageContent,
    compare: &PageContent,
    base_page: usize,
    compare_page: usize,
) -> Difference {
    let line = base_text.or(compare_text).unwrap_or("");
    let severity = if line.trim().is_empty() {
        Severity::Cosmetic
    } else {
        Severity::Major
    };
    let description = match change_type {
        ChangeType::Added => format!("Line added: \"{}\"", truncate(line, 80)),
        ChangeType::Deleted => format!("Line deleted: \"{}\"", truncate(line, 80)),
        ChangeType::Modified => unreachable!("modified lines use modified_difference"),
    };

    // deletions anchor on the base page layout, everything else on compare
    let page = if change_type == ChangeType::Deleted {
        base
    } else {
        compare
    };
    let (position, bounds) = line_position(page, line, line_number);

    Difference {
        id: Uuid::new_v4(),
        change_type,
        severity,
        description,
        base_page: Some(base_page),
        compare_page: Some(compare_page),
        position,
        bounds,
        detail: DifferenceDetail::Text {
            base_text: base_text.map(str::to_string),
            compare_text: compare_text.map(str::to_string),
            line_number,
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn modified_difference(
    base_line: &str,
    compare_line: &str,
    line_number: usize,
    base: &PageContent,
    compare: &PageContent,
    base_page: usize,
    compare_page: usize,
) -> Difference {
    let severity = if whitespace_only_delta(base_line, compare_line) {
        Severity::Cosmetic
    } else {
        Severity::Minor
    };
    let (position, bounds) = line_position(compare, compare_line, line_number);
    let _ = base;

    Difference {
        id: Uuid::new_v4(),
        change_type: ChangeType::Modified,
        severity,
        description: format!(
            "Line changed: \"{}\" -> \"{}\"",
            truncate(base_line, 60),
            truncate(compare_line, 60)
        ),
        base_page: Some(base_page),
        compare_page: Some(compare_page),
        position,
        bounds,
        detail: DifferenceDetail::Text {
            base_text: Some(base_line.to_string()),
            compare_text: Some(compare_line.to_string()),
            line_number,
        },
    }
}

/// True when the two lines agree after collapsing whitespace
fn whitespace_only_delta(a: &str, b: &str) -> bool {
    let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    squash(a) == squash(b)
}

/// Place a line difference on the page
///
/// Prefers the bounding box of a text element containing the line; falls
/// back to a proportional slot based on the line number.
fn line_position(page: &PageContent, line: &str, line_number: usize) -> (Option<Rect>, Option<Rect>) {
    let needle = line.trim();
    if !needle.is_empty() {
        if let Some(element) = page.elements.iter().find(|e| e.text.contains(needle)) {
            return (Some(element.bbox), Some(element.bbox));
        }
    }

    let line_count = page.text.lines().count().max(1);
    let slot_height = page.height / line_count as f64;
    let position = Rect::new(
        0.05 * page.width,
        (line_number.min(line_count - 1)) as f64 * slot_height,
        0.9 * page.width,
        slot_height,
    );
    (Some(position), None)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str) -> PageContent {
        PageContent::text_only(text)
    }

    #[test]
    fn test_identical_pages_produce_no_differences() {
        let p = page("hello world\nsecond line");
        assert!(compare_page_text(&p, &p, 0, 0).is_empty());
    }

    #[test]
    fn test_single_word_change_is_one_modified() {
        let base = page("hello world");
        let compare = page("hello World");
        let diffs = compare_page_text(&base, &compare, 0, 0);
        assert_eq!(diffs.len(), 1);
        let d = &diffs[0];
        assert_eq!(d.change_type, ChangeType::Modified);
        assert_eq!(d.severity, Severity::Minor);
        match &d.detail {
            DifferenceDetail::Text {
                base_text,
                compare_text,
                ..
            } => {
                assert_eq!(base_text.as_deref(), Some("hello world"));
                assert_eq!(compare_text.as_deref(), Some("hello World"));
            }
            other => panic!("expected text detail, got {:?}", other),
        }
    }

    #[test]
    fn test_added_line_is_major() {
        let base = page("first line");
        let compare = page("first line\nbrand new line");
        let diffs = compare_page_text(&base, &compare, 0, 0);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].change_type, ChangeType::Added);
        assert_eq!(diffs[0].severity, Severity::Major);
    }

    #[test]
    fn test_deleted_line_is_major() {
        let base = page("first line\nsecond line");
        let compare = page("first line");
        let diffs = compare_page_text(&base, &compare, 0, 0);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].change_type, ChangeType::Deleted);
        assert_eq!(diffs[0].severity, Severity::Major);
    }

    #[test]
    fn test_whitespace_only_change_is_cosmetic() {
        let base = page("hello   world");
        let compare = page("hello world");
        let diffs = compare_page_text(&base, &compare, 0, 0);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].change_type, ChangeType::Modified);
        assert_eq!(diffs[0].severity, Severity::Cosmetic);
    }

    #[test]
    fn test_modified_carries_both_sides() {
        let base = page("alpha\nbeta\ngamma");
        let compare = page("alpha\nBETA\ngamma");
        let diffs = compare_page_text(&base, &compare, 2, 3);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].base_page, Some(2));
        assert_eq!(diffs[0].compare_page, Some(3));
        assert!(diffs[0].position.is_some());
    }

    #[test]
    fn test_replace_overhang_splits_into_added() {
        let base = page("one");
        let compare = page("uno\ndos");
        let diffs = compare_page_text(&base, &compare, 0, 0);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].change_type, ChangeType::Modified);
        assert_eq!(diffs[1].change_type, ChangeType::Added);
    }
}
