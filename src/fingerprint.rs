//! Page fingerprinting for fast similarity estimation
//!
//! This module computes one compact [`PageFingerprint`] per page:
//! - A Blake3-derived 64-bit text hash for exact match detection
//! - Normalized text and keyword sets for similarity scoring
//! - Font-usage distributions and layout features (element count,
//!   y-position histogram inputs, image counts)
//!
//! Fingerprints are built once at the start of a comparison and are
//! immutable afterwards.

use crate::similarity::{keywords, normalize};
use crate::types::{Document, PageContent, PageFingerprint, Source};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Compute fingerprints for every page of a document, in page order
pub fn fingerprint_document(document: &Document, source: Source) -> Vec<PageFingerprint> {
    document
        .pages
        .par_iter()
        .enumerate()
        .map(|(index, page)| fingerprint_page(page, source, index))
        .collect()
}

/// Compute the fingerprint of a single page
pub fn fingerprint_page(page: &PageContent, source: Source, page_index: usize) -> PageFingerprint {
    let normalized_text = normalize(&page.text);
    let text_hash = hash_text(&normalized_text);
    let kw = keywords(&page.text);

    let mut font_distribution: BTreeMap<String, u32> = BTreeMap::new();
    for font in &page.fonts {
        *font_distribution.entry(font.name.clone()).or_default() += 1;
    }

    let mut y_positions: Vec<f64> = page
        .elements
        .iter()
        .filter(|e| !e.text.trim().is_empty())
        .map(|e| e.bbox.y)
        .collect();
    y_positions.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let element_count = y_positions.len();

    PageFingerprint {
        source,
        page_index,
        normalized_text,
        text_hash,
        keywords: kw,
        font_distribution,
        element_count,
        y_positions,
        has_images: !page.images.is_empty(),
        image_count: page.images.len(),
    }
}

/// Stable 64-bit hash of normalized page text
///
/// Zero is reserved for "uncomputed/empty": empty text hashes to 0, and a
/// real hash that lands on 0 is remapped so the reserve stays unambiguous.
pub fn hash_text(normalized_text: &str) -> i64 {
    if normalized_text.is_empty() {
        return 0;
    }
    let digest = blake3::hash(normalized_text.as_bytes());
    let bytes: [u8; 8] = digest.as_bytes()[..8].try_into().expect("8-byte prefix");
    let hash = i64::from_le_bytes(bytes);
    if hash == 0 {
        1
    } else {
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FontInfo, ImageInfo, Rect, TextElement};

    fn element(text: &str, y: f64) -> TextElement {
        TextElement {
            text: text.to_string(),
            bbox: Rect::new(72.0, y, 200.0, 12.0),
            font_name: "Arial".to_string(),
            font_size: 11.0,
            bold: false,
            italic: false,
            color: 0,
        }
    }

    fn font(name: &str) -> FontInfo {
        FontInfo {
            name: name.to_string(),
            family: name.to_string(),
            bold: false,
            italic: false,
            embedded: true,
            subset_prefix: None,
        }
    }

    #[test]
    fn test_hash_text_reserves_zero_for_empty() {
        assert_eq!(hash_text(""), 0);
        assert_ne!(hash_text("hello world"), 0);
    }

    #[test]
    fn test_hash_text_is_stable() {
        assert_eq!(hash_text("hello world"), hash_text("hello world"));
        assert_ne!(hash_text("hello world"), hash_text("hello World"));
    }

    #[test]
    fn test_fingerprint_page_features() {
        let page = PageContent {
            text: "Hello, World! This is a sample PAGE.".to_string(),
            elements: vec![element("Hello", 700.0), element("World", 100.0), element("  ", 50.0)],
            images: vec![ImageInfo {
                index: 0,
                bbox: None,
                format: "png".to_string(),
                width: 64,
                height: 64,
                bytes_digest: None,
            }],
            fonts: vec![font("Arial"), font("Arial"), font("Times")],
            width: 612.0,
            height: 792.0,
            rendered_path: None,
            extracted_text_path: None,
        };

        let fp = fingerprint_page(&page, Source::Base, 4);
        assert_eq!(fp.page_index, 4);
        assert_eq!(fp.normalized_text, "hello world this is a sample page");
        assert_ne!(fp.text_hash, 0);
        assert!(fp.keywords.contains("sample"));
        // whitespace-only element is dropped, rest sorted ascending by y
        assert_eq!(fp.element_count, 2);
        assert_eq!(fp.y_positions, vec![100.0, 700.0]);
        assert_eq!(fp.font_distribution.get("Arial"), Some(&2));
        assert_eq!(fp.font_distribution.get("Times"), Some(&1));
        assert!(fp.has_images);
        assert_eq!(fp.image_count, 1);
    }

    #[test]
    fn test_fingerprint_empty_page() {
        let page = PageContent::text_only("");
        let fp = fingerprint_page(&page, Source::Compare, 0);
        assert_eq!(fp.text_hash, 0);
        assert!(fp.keywords.is_empty());
        assert!(!fp.has_images);
        assert_eq!(fp.element_count, 0);
    }

    #[test]
    fn test_fingerprint_document_preserves_page_order() {
        let doc = Document {
            id: "d1".to_string(),
            filename: "d1.pdf".to_string(),
            pages: vec![
                PageContent::text_only("first page text"),
                PageContent::text_only("second page text"),
                PageContent::text_only("third page text"),
            ],
            metadata: BTreeMap::new(),
        };
        let fps = fingerprint_document(&doc, Source::Base);
        assert_eq!(fps.len(), 3);
        for (i, fp) in fps.iter().enumerate() {
            assert_eq!(fp.page_index, i);
        }
    }
}
