//! Image difference detection for a matched page pair
//!
//! Images are paired in two stages: positional overlap (bounding-box
//! IoU > 0.5 with equal format) first, then byte-digest equality among the
//! leftovers. Paired images that moved, resized or changed format emit a
//! Modified difference; unpaired images emit Added/Deleted.

use crate::types::{
    ChangeType, Difference, DifferenceDetail, ImageInfo, PageContent, Rect, Severity,
};
use uuid::Uuid;

const IMAGE_IOU_FLOOR: f64 = 0.5;

/// Diff the image lists of two pages
pub fn compare_page_images(
    base: &PageContent,
    compare: &PageContent,
    base_page: usize,
    compare_page: usize,
) -> Vec<Difference> {
    let mut base_taken = vec![false; base.images.len()];
    let mut compare_taken = vec![false; compare.images.len()];
    let mut pairs: Vec<(usize, usize)> = Vec::new();

    // Stage 1: positional overlap with matching format, best IoU first
    let mut overlaps: Vec<(usize, usize, f64)> = Vec::new();
    for (bi, b) in base.images.iter().enumerate() {
        for (ci, c) in compare.images.iter().enumerate() {
            if b.format != c.format {
                continue;
            }
            if let (Some(bb), Some(cb)) = (&b.bbox, &c.bbox) {
                let iou = bb.iou(cb);
                if iou > IMAGE_IOU_FLOOR {
                    overlaps.push((bi, ci, iou));
                }
            }
        }
    }
    overlaps.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    for (bi, ci, _) in overlaps {
        if !base_taken[bi] && !compare_taken[ci] {
            base_taken[bi] = true;
            compare_taken[ci] = true;
            pairs.push((bi, ci));
        }
    }

    // Stage 2: digest equality among the remainder
    for (bi, b) in base.images.iter().enumerate() {
        if base_taken[bi] {
            continue;
        }
        let Some(digest) = &b.bytes_digest else {
            continue;
        };
        if let Some(ci) = compare.images.iter().enumerate().position(|(ci, c)| {
            !compare_taken[ci] && c.bytes_digest.as_deref() == Some(digest.as_str())
        }) {
            base_taken[bi] = true;
            compare_taken[ci] = true;
            pairs.push((bi, ci));
        }
    }

    let mut differences = Vec::new();

    for (bi, ci) in pairs {
        let b = &base.images[bi];
        let c = &compare.images[ci];
        if let Some(diff) = modified_image(b, c, base_page, compare_page) {
            differences.push(diff);
        }
    }

    for (bi, b) in base.images.iter().enumerate() {
        if !base_taken[bi] {
            differences.push(one_sided_image(
                b,
                ChangeType::Deleted,
                base_page,
                compare_page,
            ));
        }
    }
    for (ci, c) in compare.images.iter().enumerate() {
        if !compare_taken[ci] {
            differences.push(one_sided_image(
                c,
                ChangeType::Added,
                base_page,
                compare_page,
            ));
        }
    }

    differences
}

fn modified_image(
    base: &ImageInfo,
    compare: &ImageInfo,
    base_page: usize,
    compare_page: usize,
) -> Option<Difference> {
    let mut changes = Vec::new();
    if base.width != compare.width || base.height != compare.height {
        changes.push(format!(
            "size {}x{} -> {}x{}",
            base.width, base.height, compare.width, compare.height
        ));
    }
    if let (Some(bb), Some(cb)) = (&base.bbox, &compare.bbox) {
        if bb != cb {
            changes.push("position".to_string());
        }
    }
    if base.format != compare.format {
        changes.push(format!("format {} -> {}", base.format, compare.format));
    }

    if changes.is_empty() {
        return None;
    }

    let bounds = compare.bbox.or(base.bbox);
    Some(Difference {
        id: Uuid::new_v4(),
        change_type: ChangeType::Modified,
        severity: Severity::Minor,
        description: format!("Image changed: {}", changes.join(", ")),
        base_page: Some(base_page),
        compare_page: Some(compare_page),
        position: bounds,
        bounds,
        detail: DifferenceDetail::Image {
            base_image: Some(base.clone()),
            compare_image: Some(compare.clone()),
        },
    })
}

fn one_sided_image(
    image: &ImageInfo,
    change_type: ChangeType,
    base_page: usize,
    compare_page: usize,
) -> Difference {
    let verb = match change_type {
        ChangeType::Added => "added",
        ChangeType::Deleted => "removed",
        ChangeType::Modified => unreachable!("one-sided images are never modified"),
    };
    let (base_image, compare_image) = match change_type {
        ChangeType::Deleted => (Some(image.clone()), None),
        _ => (None, Some(image.clone())),
    };
    Difference {
        id: Uuid::new_v4(),
        change_type,
        severity: Severity::Major,
        description: format!(
            "Image {} ({}x{} {})",
            verb, image.width, image.height, image.format
        ),
        base_page: Some(base_page),
        compare_page: Some(compare_page),
        position: image.bbox.or(Some(Rect::new(0.0, 0.0, 0.0, 0.0))),
        bounds: image.bbox,
        detail: DifferenceDetail::Image {
            base_image,
            compare_image,
        },
    }
}
