//! Core data types for the PDF comparison engine
//!
//! This module defines all the shared types used across the comparison
//! pipeline: document content handles, page fingerprints, boundary and pair
//! records, the `Difference` sum type, the aggregated result, and job rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use uuid::Uuid;

/// Which of the two input documents a fingerprint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    Base,
    Compare,
}

/// Axis-aligned rectangle in page coordinates
///
/// All rectangles handed to difference records are in display space
/// (origin top-left). Extractors that produce bottom-left coordinates flip
/// them with [`Rect::flipped_y`] before they enter the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        (self.width.max(0.0)) * (self.height.max(0.0))
    }

    /// Intersection-over-union with another rectangle
    ///
    /// Returns 0.0 when the rectangles do not overlap or when both are
    /// degenerate.
    pub fn iou(&self, other: &Rect) -> f64 {
        let ix = (self.x + self.width).min(other.x + other.width) - self.x.max(other.x);
        let iy = (self.y + self.height).min(other.y + other.height) - self.y.max(other.y);
        if ix <= 0.0 || iy <= 0.0 {
            return 0.0;
        }
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Convert a bottom-left-origin rectangle to display space
    pub fn flipped_y(&self, page_height: f64) -> Rect {
        Rect {
            x: self.x,
            y: page_height - self.y - self.height,
            width: self.width,
            height: self.height,
        }
    }
}

/// A positioned run of text with its style attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextElement {
    pub text: String,
    pub bbox: Rect,
    pub font_name: String,
    pub font_size: f64,
    pub bold: bool,
    pub italic: bool,
    /// Fill color as a packed 0xRRGGBB value
    pub color: u32,
}

/// An image placed on a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Position of the image in the page's image list
    pub index: usize,
    pub bbox: Option<Rect>,
    /// Encoded format, e.g. "jpeg", "png"
    pub format: String,
    pub width: u32,
    pub height: u32,
    /// Content digest of the raw image bytes, when the extractor provides one
    pub bytes_digest: Option<String>,
}

/// A font referenced by a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontInfo {
    /// Full PostScript name, possibly carrying a subset prefix ("ABCDEF+...")
    pub name: String,
    pub family: String,
    pub bold: bool,
    pub italic: bool,
    pub embedded: bool,
    pub subset_prefix: Option<String>,
}

/// Strip a six-letter subset prefix ("ABCDEF+Helvetica" -> "Helvetica")
///
/// Subsetted fonts embed a random uppercase tag before the real name; the
/// tag changes on every export, so name equality must ignore it.
pub fn strip_subset_prefix(name: &str) -> &str {
    if name.len() > 7 {
        let (prefix, rest) = name.split_at(7);
        let bytes = prefix.as_bytes();
        if bytes[6] == b'+' && bytes[..6].iter().all(|b| b.is_ascii_uppercase()) {
            return rest;
        }
    }
    name
}

/// Strip a prefix the extractor reported out-of-band, falling back to the
/// six-letter heuristic when none was supplied
fn strip_reported_prefix<'a>(name: &'a str, reported: Option<&str>) -> &'a str {
    match reported {
        Some(prefix) => name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('+'))
            .unwrap_or(name),
        None => strip_subset_prefix(name),
    }
}

impl FontInfo {
    /// Name with any subset prefix removed
    ///
    /// A prefix reported by the extractor wins over the pattern heuristic,
    /// so non-standard tags still strip correctly.
    pub fn base_name(&self) -> &str {
        strip_reported_prefix(&self.name, self.subset_prefix.as_deref())
    }

    /// Family with any subset prefix removed
    pub fn base_family(&self) -> &str {
        strip_reported_prefix(&self.family, self.subset_prefix.as_deref())
    }

    /// True when this font is a subset embedding
    pub fn is_subsetted(&self) -> bool {
        self.subset_prefix.is_some() || self.base_name().len() != self.name.len()
    }

    /// Stable signature used for memoization keys
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}{}{}",
            self.name,
            self.family,
            self.bold as u8,
            self.italic as u8,
            self.embedded as u8
        )
    }
}

/// Pre-extracted content of a single page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContent {
    /// Full page text as a single string
    pub text: String,
    /// Positioned text runs, used for style comparison and y-histograms
    pub elements: Vec<TextElement>,
    pub images: Vec<ImageInfo>,
    pub fonts: Vec<FontInfo>,
    pub width: f64,
    pub height: f64,
    /// Pre-rendered page bitmap, when available
    pub rendered_path: Option<PathBuf>,
    /// Sidecar text extraction, when available
    pub extracted_text_path: Option<PathBuf>,
}

impl PageContent {
    /// A page with only raw text, used as an extraction fallback
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            elements: Vec::new(),
            images: Vec::new(),
            fonts: Vec::new(),
            width: 612.0,
            height: 792.0,
            rendered_path: None,
            extracted_text_path: None,
        }
    }
}

/// A read-only document handle produced by the `DocumentStore`
///
/// The core never parses PDFs itself; it consumes documents whose pages
/// have already been extracted into text, elements, images and font tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub pages: Vec<PageContent>,
    /// Document-level metadata (title, author, producer, ...)
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_texts(&self) -> Vec<&str> {
        self.pages.iter().map(|p| p.text.as_str()).collect()
    }
}

/// Compact feature record for one page, built once per comparison
///
/// Fingerprints are position-independent: index-in-document bias is applied
/// at matching time, never baked into the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFingerprint {
    pub source: Source,
    /// 0-based page index within the document
    pub page_index: usize,
    pub normalized_text: String,
    /// Stable 64-bit hash of `normalized_text`; 0 means uncomputed/empty
    pub text_hash: i64,
    pub keywords: BTreeSet<String>,
    /// Font name -> occurrence count over the page's font table
    pub font_distribution: BTreeMap<String, u32>,
    /// Number of non-empty text elements
    pub element_count: usize,
    /// `y` coordinates of non-empty text elements, sorted ascending
    pub y_positions: Vec<f64>,
    pub has_images: bool,
    pub image_count: usize,
}

/// Inclusive page range marking one logical sub-document within a PDF
///
/// Boundaries within one PDF partition `[0, page_count)` with no gaps and
/// no overlaps; pages are 0-based internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentBoundary {
    pub start_page: usize,
    /// Inclusive
    pub end_page: usize,
    pub matched: bool,
}

impl DocumentBoundary {
    pub fn new(start_page: usize, end_page: usize) -> Self {
        Self {
            start_page,
            end_page,
            matched: false,
        }
    }

    pub fn page_count(&self) -> usize {
        self.end_page - self.start_page + 1
    }

    pub fn pages(&self) -> std::ops::RangeInclusive<usize> {
        self.start_page..=self.end_page
    }
}

/// A matched (or unmatched) pair of pages
///
/// At least one fingerprint is always present. When both are present the
/// pair is matched and `similarity > 0`; a one-sided pair has similarity 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagePair {
    pub base: Option<PageFingerprint>,
    pub compare: Option<PageFingerprint>,
    pub similarity: f64,
}

impl PagePair {
    pub fn matched(base: PageFingerprint, compare: PageFingerprint, similarity: f64) -> Self {
        Self {
            base: Some(base),
            compare: Some(compare),
            similarity,
        }
    }

    pub fn base_only(base: PageFingerprint) -> Self {
        Self {
            base: Some(base),
            compare: None,
            similarity: 0.0,
        }
    }

    pub fn compare_only(compare: PageFingerprint) -> Self {
        Self {
            base: None,
            compare: Some(compare),
            similarity: 0.0,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.base.is_some() && self.compare.is_some()
    }

    pub fn base_index(&self) -> Option<usize> {
        self.base.as_ref().map(|f| f.page_index)
    }

    pub fn compare_index(&self) -> Option<usize> {
        self.compare.as_ref().map(|f| f.page_index)
    }

    /// Stable key identifying this pair inside `differences_by_page`
    pub fn key(&self) -> String {
        match (self.base_index(), self.compare_index()) {
            (Some(b), Some(c)) => format!("b{}_c{}", b, c),
            (Some(b), None) => format!("b{}_none", b),
            (None, Some(c)) => format!("none_c{}", c),
            (None, None) => "none_none".to_string(),
        }
    }
}

/// Per-page entry inside a [`DocumentPair`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMapping {
    pub base_page: Option<usize>,
    pub compare_page: Option<usize>,
    pub similarity: f64,
    /// Derived at aggregation time from `differences_by_page`
    pub diff_count: usize,
}

/// Per-kind difference tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferenceCounts {
    pub text: usize,
    pub image: usize,
    pub font: usize,
    pub style: usize,
    pub total: usize,
}

impl DifferenceCounts {
    pub fn record(&mut self, kind: DifferenceKind) {
        match kind {
            DifferenceKind::Text => self.text += 1,
            DifferenceKind::Image => self.image += 1,
            DifferenceKind::Font => self.font += 1,
            DifferenceKind::Style => self.style += 1,
            DifferenceKind::Metadata => {}
        }
        self.total += 1;
    }
}

/// A matched (or unmatched) pair of sub-documents across the two PDFs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPair {
    pub pair_index: usize,
    pub matched: bool,
    /// Inclusive 0-based page range in the base document
    pub base_range: Option<(usize, usize)>,
    /// Inclusive 0-based page range in the compare document
    pub compare_range: Option<(usize, usize)>,
    pub page_mappings: Vec<PageMapping>,
    pub counts: DifferenceCounts,
    pub similarity: f64,
}

/// Kind discriminant of a difference record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DifferenceKind {
    Text,
    Font,
    Image,
    Style,
    Metadata,
}

/// Direction of an observed change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Deleted,
    Modified,
}

impl ChangeType {
    /// Direction when base and compare are swapped
    pub fn inverted(&self) -> ChangeType {
        match self {
            ChangeType::Added => ChangeType::Deleted,
            ChangeType::Deleted => ChangeType::Added,
            ChangeType::Modified => ChangeType::Modified,
        }
    }
}

/// How disruptive a difference is
///
/// Cosmetic changes are visual only, Minor covers style and font tweaks,
/// Major marks content or identity changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Cosmetic,
    Minor,
    Major,
}

/// Variant-specific payload of a [`Difference`]
///
/// Serialization discriminates on the `kind` tag so readers can dispatch
/// without touching the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DifferenceDetail {
    Text {
        base_text: Option<String>,
        compare_text: Option<String>,
        /// 0-based line number on the compare page (base page for deletions)
        line_number: usize,
    },
    Font {
        base_font: Option<FontInfo>,
        compare_font: Option<FontInfo>,
        /// Which of {name, family, embedded, bold, italic} differ
        changed_fields: Vec<String>,
    },
    Image {
        base_image: Option<ImageInfo>,
        compare_image: Option<ImageInfo>,
    },
    Style {
        element_text: String,
        base_element: Option<TextElement>,
        compare_element: Option<TextElement>,
    },
    Metadata {
        metadata_key: String,
        base_value: Option<String>,
        compare_value: Option<String>,
    },
}

impl DifferenceDetail {
    pub fn kind(&self) -> DifferenceKind {
        match self {
            DifferenceDetail::Text { .. } => DifferenceKind::Text,
            DifferenceDetail::Font { .. } => DifferenceKind::Font,
            DifferenceDetail::Image { .. } => DifferenceKind::Image,
            DifferenceDetail::Style { .. } => DifferenceKind::Style,
            DifferenceDetail::Metadata { .. } => DifferenceKind::Metadata,
        }
    }
}

/// A single observed change, positioned on the compare page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Difference {
    pub id: Uuid,
    pub change_type: ChangeType,
    pub severity: Severity,
    pub description: String,
    /// 0-based page index in the base document
    pub base_page: Option<usize>,
    /// 0-based page index in the compare document
    pub compare_page: Option<usize>,
    /// Page-relative display-space placement of the change marker
    pub position: Option<Rect>,
    /// Raw bounding box of the source element, when one exists
    pub bounds: Option<Rect>,
    #[serde(flatten)]
    pub detail: DifferenceDetail,
}

impl Difference {
    pub fn kind(&self) -> DifferenceKind {
        self.detail.kind()
    }
}

/// A document-level metadata change, keyed at the result level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDifference {
    pub change_type: ChangeType,
    pub severity: Severity,
    pub base_value: Option<String>,
    pub compare_value: Option<String>,
    pub description: String,
}

/// Aggregate difference tallies for a whole comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total: usize,
    pub text: usize,
    pub image: usize,
    pub font: usize,
    pub style: usize,
}

/// The complete output of one comparison run
///
/// The result id equals the owning job id; maps use ordered containers so
/// the serialized artifact is deterministic for a given result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub id: Uuid,
    pub base_document_id: String,
    pub compare_document_id: String,
    pub page_pairs: Vec<PagePair>,
    /// Page-pair key -> differences found on that pair
    pub differences_by_page: BTreeMap<String, Vec<Difference>>,
    pub document_pairs: Vec<DocumentPair>,
    pub metadata_differences: BTreeMap<String, MetadataDifference>,
    pub summary: ComparisonSummary,
    /// Page-weighted mean of matched document-pair similarities
    pub overall_similarity: f64,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Lifecycle state of a comparison job
///
/// Transitions are monotonic in this ordering; the three terminal states
/// are sticky. A Cancelled job is never re-interpreted as Completed even if
/// an artifact later appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    DocumentMatching,
    Comparing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Position in the monotonic ordering; terminal states share a rank
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::DocumentMatching => 2,
            JobStatus::Comparing => 3,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 4,
        }
    }

    /// Lowercase string used at the API boundary
    pub fn as_external(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::DocumentMatching => "document_matching",
            JobStatus::Comparing => "comparing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// A persisted comparison job row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub base_document_id: String,
    pub compare_document_id: String,
    pub status: JobStatus,
    /// 0..=100
    pub progress: u8,
    pub total_ops: u32,
    pub completed_ops: u32,
    pub current_phase: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_iou_disjoint() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_rect_iou_identical() {
        let a = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rect_iou_half_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 0.0, 10.0, 10.0);
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rect_flip_round_trips() {
        let r = Rect::new(10.0, 700.0, 100.0, 20.0);
        let flipped = r.flipped_y(792.0);
        assert!((flipped.y - 72.0).abs() < 1e-9);
        assert_eq!(flipped.flipped_y(792.0), r);
    }

    #[test]
    fn test_strip_subset_prefix() {
        assert_eq!(strip_subset_prefix("ABCDEF+Helvetica"), "Helvetica");
        assert_eq!(strip_subset_prefix("Helvetica"), "Helvetica");
        // Lowercase tag is not a subset prefix
        assert_eq!(strip_subset_prefix("abcdef+Helvetica"), "abcdef+Helvetica");
        // Short names pass through
        assert_eq!(strip_subset_prefix("F+X"), "F+X");
    }

    #[test]
    fn test_reported_prefix_beats_heuristic() {
        // a tag the heuristic would never recognize still strips when the
        // extractor reported it
        let font = FontInfo {
            name: "ab12+Helvetica".to_string(),
            family: "Helvetica".to_string(),
            bold: false,
            italic: false,
            embedded: true,
            subset_prefix: Some("ab12".to_string()),
        };
        assert_eq!(font.base_name(), "Helvetica");
        assert!(font.is_subsetted());
    }

    #[test]
    fn test_reported_prefix_absent_from_name_is_harmless() {
        // extractors that already stripped the name report the prefix
        // out-of-band only
        let font = FontInfo {
            name: "Helvetica".to_string(),
            family: "Helvetica".to_string(),
            bold: false,
            italic: false,
            embedded: true,
            subset_prefix: Some("ABCDEF".to_string()),
        };
        assert_eq!(font.base_name(), "Helvetica");
        assert!(font.is_subsetted());
    }

    #[test]
    fn test_is_subsetted_without_reported_prefix() {
        let subset = FontInfo {
            name: "ABCDEF+Times".to_string(),
            family: "Times".to_string(),
            bold: false,
            italic: false,
            embedded: true,
            subset_prefix: None,
        };
        assert!(subset.is_subsetted());

        let plain = FontInfo {
            name: "Times".to_string(),
            family: "Times".to_string(),
            bold: false,
            italic: false,
            embedded: true,
            subset_prefix: None,
        };
        assert!(!plain.is_subsetted());
    }

    #[test]
    fn test_change_type_inversion() {
        assert_eq!(ChangeType::Added.inverted(), ChangeType::Deleted);
        assert_eq!(ChangeType::Deleted.inverted(), ChangeType::Added);
        assert_eq!(ChangeType::Modified.inverted(), ChangeType::Modified);
    }

    #[test]
    fn test_status_ordering_is_monotonic() {
        assert!(JobStatus::Pending.rank() < JobStatus::Processing.rank());
        assert!(JobStatus::Processing.rank() < JobStatus::DocumentMatching.rank());
        assert!(JobStatus::DocumentMatching.rank() < JobStatus::Comparing.rank());
        assert!(JobStatus::Comparing.rank() < JobStatus::Completed.rank());
        assert_eq!(JobStatus::Failed.rank(), JobStatus::Cancelled.rank());
    }

    #[test]
    fn test_external_status_strings_are_lowercase() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::DocumentMatching,
            JobStatus::Comparing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let s = status.as_external();
            assert_eq!(s, s.to_lowercase());
        }
    }

    #[test]
    fn test_page_pair_keys() {
        let fp = |idx: usize, source: Source| PageFingerprint {
            source,
            page_index: idx,
            normalized_text: String::new(),
            text_hash: 0,
            keywords: BTreeSet::new(),
            font_distribution: BTreeMap::new(),
            element_count: 0,
            y_positions: Vec::new(),
            has_images: false,
            image_count: 0,
        };
        assert_eq!(
            PagePair::matched(fp(2, Source::Base), fp(3, Source::Compare), 0.9).key(),
            "b2_c3"
        );
        assert_eq!(PagePair::base_only(fp(1, Source::Base)).key(), "b1_none");
        assert_eq!(
            PagePair::compare_only(fp(4, Source::Compare)).key(),
            "none_c4"
        );
    }

    #[test]
    fn test_difference_detail_tag_serialization() {
        let detail = DifferenceDetail::Metadata {
            metadata_key: "Author".to_string(),
            base_value: Some("a".to_string()),
            compare_value: Some("b".to_string()),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["kind"], "Metadata");
    }
}
