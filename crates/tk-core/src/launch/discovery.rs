//! Public address discovery in tunnel output.

use regex::Regex;
use tk_config::TunnelSettings;

/// Finds the public address in a line of tunnel-binary output.
#[derive(Debug, Clone)]
pub struct PublicUrlMatcher {
    pattern: Regex,
}

impl PublicUrlMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn from_settings(settings: &TunnelSettings) -> Result<Self, tk_common::Error> {
        Self::new(&settings.public_url_pattern)
            .map_err(|e| tk_common::Error::InvalidSettings(format!("public_url_pattern: {}", e)))
    }

    /// First public address in `text`, if any.
    pub fn find(&self, text: &str) -> Option<String> {
        self.pattern.find(text).map(|m| m.as_str().to_string())
    }

    /// Consume `lines` until one carries a public address.
    ///
    /// Returns `None` when the stream ends first. Lines after the match
    /// are left in the iterator.
    pub fn scan<I>(&self, lines: &mut I) -> Option<String>
    where
        I: Iterator<Item = String> + ?Sized,
    {
        for line in lines {
            tracing::trace!(line = %line, "tunnel output");
            if let Some(url) = self.find(&line) {
                return Some(url);
            }
        }
        None
    }
}
