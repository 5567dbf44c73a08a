//! Head/tail document shrinking

use serde::{Deserialize, Serialize};

use crate::config::SizingConfig;

/// Inserted between the kept head and tail of a shrunk document
pub const OMISSION_MARKER: &str =
    "\n\n[... middle of document omitted to fit the processing budget ...]\n\n";

/// How the sizer produced its output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    /// Text fit the budget and was passed through
    None,
    /// Head and tail kept around the omission marker
    Smart,
    /// Budget too small for the marker; only the head was kept
    HeadOnly,
}

impl SizingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingMethod::None => "none",
            SizingMethod::Smart => "smart",
            SizingMethod::HeadOnly => "head_only",
        }
    }
}

/// Output of [`SizingPolicy::prepare`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentSizingResult {
    pub text: String,
    /// Length of the input in characters
    pub original_length: usize,
    pub was_truncated: bool,
    pub method: SizingMethod,
}

/// Decides whether text must be shrunk before a stage sees it
pub trait SizingPolicy: Send + Sync {
    fn prepare(&self, text: &str, budget: usize) -> DocumentSizingResult;
}

/// Deterministic head-biased sizer
///
/// Leading content carries most identifying context, so the head keeps
/// `head_ratio` of the budget and the tail keeps the rest minus a reservation
/// for the marker. Lengths are measured in characters, not bytes.
#[derive(Debug, Clone)]
pub struct DocumentSizer {
    head_ratio: f64,
    marker_reserve: usize,
}

impl DocumentSizer {
    pub fn new(head_ratio: f64, marker_reserve: usize) -> Self {
        Self {
            head_ratio: head_ratio.clamp(0.0, 1.0),
            marker_reserve,
        }
    }

    pub fn from_config(config: &SizingConfig) -> Self {
        Self::new(config.head_ratio, config.marker_reserve)
    }
}

impl Default for DocumentSizer {
    fn default() -> Self {
        Self::new(0.7, 200)
    }
}

impl SizingPolicy for DocumentSizer {
    fn prepare(&self, text: &str, budget: usize) -> DocumentSizingResult {
        let original_length = text.chars().count();

        if original_length <= budget {
            return DocumentSizingResult {
                text: text.to_string(),
                original_length,
                was_truncated: false,
                method: SizingMethod::None,
            };
        }

        let marker_len = OMISSION_MARKER.chars().count();
        if budget <= marker_len {
            let end = byte_offset(text, budget);
            return DocumentSizingResult {
                text: text[..end].to_string(),
                original_length,
                was_truncated: true,
                method: SizingMethod::HeadOnly,
            };
        }

        let mut head = ((budget as f64) * self.head_ratio).round() as usize;
        head = head.min(budget);
        let tail = (budget - head).saturating_sub(self.marker_reserve.max(marker_len));
        if head + marker_len + tail > budget {
            head = budget - marker_len - tail;
        }

        let head_end = byte_offset(text, head);
        let tail_start = byte_offset(text, original_length - tail);

        let mut out = String::with_capacity(head_end + OMISSION_MARKER.len() + (text.len() - tail_start));
        out.push_str(&text[..head_end]);
        out.push_str(OMISSION_MARKER);
        out.push_str(&text[tail_start..]);

        DocumentSizingResult {
            text: out,
            original_length,
            was_truncated: true,
            method: SizingMethod::Smart,
        }
    }
}

/// Byte offset of the `chars`-th character (or the end of the string)
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}
