//! Section presence checks and best-effort section locating

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

/// Keywords and ordered regex candidates for one content category
#[derive(Debug, Clone)]
struct Category {
    name: String,
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

static DEFAULT_CATEGORIES: Lazy<Vec<Category>> = Lazy::new(|| {
    let specs: [(&str, &[&str], &[&str]); 4] = [
        (
            "parties",
            &["borrower", "lender", "between", "parties"],
            &[
                r"(?i)\bthe\s+parties\b",
                r"(?i)\bby\s+and\s+between\b",
                r"(?i)\bborrower\b",
            ],
        ),
        (
            "terms",
            &["interest", "term", "principal", "conditions"],
            &[
                r"(?i)\bterms\s+and\s+conditions\b",
                r"(?i)\binterest\s+rate\b",
                r"(?i)\bprincipal\s+amount\b",
            ],
        ),
        (
            "payment_schedule",
            &["payment", "instalment", "installment", "due date", "repayment"],
            &[
                r"(?i)\bpayment\s+schedule\b",
                r"(?i)\brepayment\s+(?:plan|schedule)\b",
                r"(?i)\binstall?ments?\b",
            ],
        ),
        (
            "signatures",
            &["signature", "signed", "witness"],
            &[
                r"(?i)\bin\s+witness\s+whereof\b",
                r"(?i)\bsigned\s+by\b",
                r"(?i)\bsignatures?\b",
            ],
        ),
    ];

    specs
        .iter()
        .filter_map(|(name, keywords, patterns)| {
            build_category(name, keywords, patterns)
                .map_err(|e| tracing::error!("Invalid built-in pattern for '{}': {}", name, e))
                .ok()
        })
        .collect()
});

fn build_category(name: &str, keywords: &[&str], patterns: &[&str]) -> Result<Category> {
    let patterns = patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| Error::Config(format!("Invalid pattern '{}': {}", p, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Category {
        name: name.to_string(),
        keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        patterns,
    })
}

/// Finds where expected content lives in a document
#[derive(Debug, Clone, Default)]
pub struct ContentLocator {
    categories: Vec<Category>,
}

impl ContentLocator {
    /// Locator with no categories
    pub fn new() -> Self {
        Self::default()
    }

    /// Locator with the built-in agreement categories
    pub fn with_defaults() -> Self {
        Self {
            categories: DEFAULT_CATEGORIES.clone(),
        }
    }

    /// Add or replace a category; patterns are tried in the given order
    pub fn with_category(mut self, name: &str, keywords: &[&str], patterns: &[&str]) -> Result<Self> {
        let category = build_category(name, keywords, patterns)?;
        self.categories.retain(|c| c.name != name);
        self.categories.push(category);
        Ok(self)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    /// Fast case-insensitive keyword presence check
    pub fn has_expected_content(&self, text: &str, category: &str) -> bool {
        let Some(category) = self.find(category) else {
            return false;
        };
        let lowered = text.to_lowercase();
        category.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }

    /// Character offset of the first match from the first candidate that matches
    pub fn locate(&self, text: &str, category: &str) -> Option<usize> {
        let category = self.find(category)?;
        category
            .patterns
            .iter()
            .find_map(|pattern| pattern.find(text))
            .map(|m| text[..m.start()].chars().count())
    }

    fn find(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGREEMENT: &str = "LOAN AGREEMENT\n\
        This agreement is made by and between Acme Bank (the Lender) and Jane Doe.\n\
        1. Interest rate: 5% per annum.\n\
        2. Repayment schedule: 12 monthly installments.\n\
        IN WITNESS WHEREOF the parties have signed below.";

    #[test]
    fn test_has_expected_content() {
        let locator = ContentLocator::with_defaults();
        assert!(locator.has_expected_content(AGREEMENT, "parties"));
        assert!(locator.has_expected_content(AGREEMENT, "payment_schedule"));
        assert!(!locator.has_expected_content("just a recipe for soup", "signatures"));
        assert!(!locator.has_expected_content(AGREEMENT, "unknown"));
    }

    #[test]
    fn test_locate_uses_candidate_order() {
        let locator = ContentLocator::with_defaults();

        // "the parties" appears late, but it is the first candidate
        let offset = locator.locate(AGREEMENT, "parties").unwrap();
        assert_eq!(AGREEMENT[offset..offset + 11].to_lowercase(), "the parties");

        let offset = locator.locate(AGREEMENT, "payment_schedule").unwrap();
        assert!(AGREEMENT[offset..].starts_with("Repayment schedule"));
    }

    #[test]
    fn test_locate_reports_char_offsets() {
        let locator = ContentLocator::new()
            .with_category("marker", &["here"], &[r"HERE"])
            .unwrap();
        let text = "ąęś HERE";
        assert_eq!(locator.locate(text, "marker"), Some(4));
    }

    #[test]
    fn test_locate_missing() {
        let locator = ContentLocator::with_defaults();
        assert_eq!(locator.locate("nothing to see", "signatures"), None);
        assert_eq!(locator.locate(AGREEMENT, "unknown"), None);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let result = ContentLocator::new().with_category("bad", &[], &["(unclosed"]);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
