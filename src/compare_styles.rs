//! Style difference detection for a matched page pair
//!
//! Text elements are paired by bounding-box overlap (IoU > 0.7) with equal
//! text; a pair whose font name, size, bold, italic or color differ emits
//! one style difference. Elements that fail to pair are covered by the
//! text detector, not here.

use crate::types::{
    ChangeType, Difference, DifferenceDetail, PageContent, Severity, TextElement,
};
use uuid::Uuid;

const ELEMENT_IOU_FLOOR: f64 = 0.7;

/// Diff the styled text elements of two pages
pub fn compare_page_styles(
    base: &PageContent,
    compare: &PageContent,
    base_page: usize,
    compare_page: usize,
) -> Vec<Difference> {
    let mut compare_taken = vec![false; compare.elements.len()];
    let mut differences = Vec::new();

    for b in &base.elements {
        if b.text.trim().is_empty() {
            continue;
        }
        let candidate = compare
            .elements
            .iter()
            .enumerate()
            .filter(|(ci, c)| {
                !compare_taken[*ci] && c.text == b.text && b.bbox.iou(&c.bbox) > ELEMENT_IOU_FLOOR
            })
            .max_by(|(_, x), (_, y)| {
                b.bbox
                    .iou(&x.bbox)
                    .partial_cmp(&b.bbox.iou(&y.bbox))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        let Some((ci, c)) = candidate else {
            continue;
        };
        compare_taken[ci] = true;

        if let Some(diff) = style_delta(b, c, base_page, compare_page) {
            differences.push(diff);
        }
    }

    differences
}

fn style_delta(
    base: &TextElement,
    compare: &TextElement,
    base_page: usize,
    compare_page: usize,
) -> Option<Difference> {
    let mut changes = Vec::new();
    if base.font_name != compare.font_name {
        changes.push(format!("font {} -> {}", base.font_name, compare.font_name));
    }
    if (base.font_size - compare.font_size).abs() > f64::EPSILON {
        changes.push(format!("size {} -> {}", base.font_size, compare.font_size));
    }
    if base.bold != compare.bold {
        changes.push(format!("bold {} -> {}", base.bold, compare.bold));
    }
    if base.italic != compare.italic {
        changes.push(format!("italic {} -> {}", base.italic, compare.italic));
    }
    let color_changed = base.color != compare.color;
    if color_changed {
        changes.push(format!("color #{:06x} -> #{:06x}", base.color, compare.color));
    }

    if changes.is_empty() {
        return None;
    }

    // a pure recolor is visual only
    let severity = if color_changed && changes.len() == 1 {
        Severity::Cosmetic
    } else {
        Severity::Minor
    };

    Some(Difference {
        id: Uuid::new_v4(),
        change_type: ChangeType::Modified,
        severity,
        description: format!(
            "Style changed on \"{}\": {}",
            truncate(&base.text, 40),
            changes.join(", ")
        ),
        base_page: Some(base_page),
        compare_page: Some(compare_page),
        position: Some(compare.bbox),
        bounds: Some(compare.bbox),
        detail: DifferenceDetail::Style {
            element_text: base.text.clone(),
            base_element: Some(base.clone()),
            compare_element: Some(compare.clone()),
        },
    })
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
    use crate::types::Rect;

    fn element(text: &str, bbox: Rect, font: &str, size: f64, bold: bool, color: u32) -> TextElement {
        TextElement {
            text: text.to_string(),
            bbox,
            font_name: font.to_string(),
            font_size: size,
            bold,
            italic: false,
            color,
        }
    }

    fn page_with(elements: Vec<TextElement>) -> PageContent {
        let mut page = PageContent::text_only("text");
        page.elements = elements;
        page
    }

    #[test]
    fn test_identical_elements_produce_nothing() {
        let bbox = Rect::new(72.0, 100.0, 200.0, 14.0);
        let base = page_with(vec![element("Heading", bbox, "Arial", 12.0, false, 0)]);
        let compare = page_with(vec![element("Heading", bbox, "Arial", 12.0, false, 0)]);
        assert!(compare_page_styles(&base, &compare, 0, 0).is_empty());
    }

    #[test]
    fn test_bold_change_is_minor() {
        let bbox = Rect::new(72.0, 100.0, 200.0, 14.0);
        let base = page_with(vec![element("Heading", bbox, "Arial", 12.0, false, 0)]);
        let compare = page_with(vec![element("Heading", bbox, "Arial", 12.0, true, 0)]);
        let diffs = compare_page_styles(&base, &compare, 0, 0);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].severity, Severity::Minor);
        assert!(diffs[0].description.contains("bold"));
    }

    #[test]
    fn test_color_only_change_is_cosmetic() {
        let bbox = Rect::new(72.0, 100.0, 200.0, 14.0);
        let base = page_with(vec![element("Note", bbox, "Arial", 12.0, false, 0x000000)]);
        let compare = page_with(vec![element("Note", bbox, "Arial", 12.0, false, 0xff0000)]);
        let diffs = compare_page_styles(&base, &compare, 0, 0);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].severity, Severity::Cosmetic);
    }

    #[test]
    fn test_different_text_is_not_a_style_pair() {
        let bbox = Rect::new(72.0, 100.0, 200.0, 14.0);
        let base = page_with(vec![element("Old words", bbox, "Arial", 12.0, false, 0)]);
        let compare = page_with(vec![element("New words", bbox, "Times", 12.0, false, 0)]);
        // different text means the text detector owns this change
        assert!(compare_page_styles(&base, &compare, 0, 0).is_empty());
    }

    #[test]
    fn test_far_apart_elements_do_not_pair() {
        let base = page_with(vec![element(
            "Footer",
            Rect::new(72.0, 700.0, 100.0, 12.0),
            "Arial",
            9.0,
            false,
            0,
        )]);
        let compare = page_with(vec![element(
            "Footer",
            Rect::new(72.0, 100.0, 100.0, 12.0),
            "Times",
            9.0,
            false,
            0,
        )]);
        assert!(compare_page_styles(&base, &compare, 0, 0).is_empty());
    }
}
