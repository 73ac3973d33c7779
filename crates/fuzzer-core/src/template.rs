/// Marker substituted with each wordlist entry.
pub const DEFAULT_PLACEHOLDER: &str = "FUZZ";

/// A target URL containing a placeholder token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    url: String,
    placeholder: String,
}

impl Template {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_placeholder(url, DEFAULT_PLACEHOLDER)
    }

    pub fn with_placeholder(url: impl Into<String>, placeholder: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            placeholder: placeholder.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    pub fn has_placeholder(&self) -> bool {
        self.url.contains(&self.placeholder)
    }

    /// Substitute `word` for every occurrence of the placeholder.
    pub fn render(&self, word: &str) -> String {
        self.url.replace(&self.placeholder, word)
    }

    /// The template with the placeholder removed, used for the liveness probe.
    pub fn base(&self) -> String {
        self.render("")
    }
}

/// Normalise a raw wordlist line: drop CR, LF and tabs, then trim spaces.
pub fn clean_word(line: &str) -> String {
    line.replace(['\r', '\n', '\t'], "").trim_matches(' ').to_string()
}
