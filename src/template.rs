//! URL templates mapping content ids to request URLs.

use anyhow::{Result, bail};

/// Placeholder replaced by the content id.
pub const CID_PLACEHOLDER: &str = "{cid}";

/// A URL pattern with one or more `{cid}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    pattern: String,
}

impl UrlTemplate {
    /// Parses a template, requiring at least one placeholder.
    pub fn parse(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim();
        if !pattern.contains(CID_PLACEHOLDER) {
            bail!("URL template '{pattern}' has no {CID_PLACEHOLDER} placeholder");
        }
        Ok(Self {
            pattern: pattern.to_string(),
        })
    }

    /// Builds the URL for `content_id`, percent-encoding the id.
    #[must_use]
    pub fn expand(&self, content_id: &str) -> String {
        self.pattern
            .replace(CID_PLACEHOLDER, &urlencoding::encode(content_id))
    }
}

/// Splits raw input into content ids: one per line, blank lines and `#`
/// comments skipped, duplicates kept.
#[must_use]
pub fn parse_content_ids(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
