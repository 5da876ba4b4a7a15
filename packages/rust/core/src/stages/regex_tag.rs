//! Regex-based tag extraction.

use regex::Regex;
use textsift_shared::{Result, TextsiftError, Value};

use crate::stage::{MapToTags, TagExtractor};

/// Pattern used when none is given: DOI references such as `doi:10.1000/182`.
pub const DEFAULT_PATTERN: &str = r"doi:[^ ]+";

/// Tags every non-overlapping match of a pattern.
///
/// Patterns without capture groups yield the whole match; patterns with
/// groups yield the first group of each match. Missing cells yield no tags.
#[derive(Debug, Clone)]
pub struct RegexTag {
    regex: Regex,
}

impl RegexTag {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            TextsiftError::invalid_argument(format!("invalid regex '{pattern}': {e}"))
        })?;
        Ok(Self { regex })
    }

    /// A tag stage extracting `pattern` from `columns` into `out_column`.
    pub fn stage<S: Into<String>>(
        pattern: &str,
        columns: impl IntoIterator<Item = S>,
        out_column: impl Into<String>,
    ) -> Result<MapToTags<Self>> {
        Ok(MapToTags::new(Self::new(pattern)?, columns, out_column))
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// All tags found in `text`.
    pub fn find_all(&self, text: &str) -> Vec<String> {
        if self.regex.captures_len() > 1 {
            self.regex
                .captures_iter(text)
                .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
                .collect()
        } else {
            self.regex
                .find_iter(text)
                .map(|m| m.as_str().to_string())
                .collect()
        }
    }
}

impl Default for RegexTag {
    fn default() -> Self {
        Self {
            regex: Regex::new(DEFAULT_PATTERN).expect("valid regex"),
        }
    }
}

impl TagExtractor for RegexTag {
    fn extract(&self, value: &Value) -> Result<Vec<String>> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        Ok(self.find_all(&value.as_text()))
    }
}
