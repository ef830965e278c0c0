//! Image reference parsing.
//!
//! Runtimes report cached images as `repository:tag` strings. Requests may
//! omit the tag, so both sides are normalized before comparison.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag assumed when a reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// A `repository:tag` image reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ImageRef {
    /// Repository including any registry host, e.g. `registry:5000/team/api`.
    pub repository: String,
    pub tag: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum ImageError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid image reference: {0}")]
    Invalid(String),
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, ImageError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ImageError::Empty);
        }

        // A colon only separates a tag when it follows the last path
        // segment; `localhost:5000/app` is an untagged reference.
        let last_segment_start = reference.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match reference[last_segment_start..].rfind(':') {
            Some(idx) => {
                let split = last_segment_start + idx;
                (&reference[..split], &reference[split + 1..])
            }
            None => (reference, DEFAULT_TAG),
        };

        if repository.is_empty() || tag.is_empty() || repository.ends_with('/') {
            return Err(ImageError::Invalid(reference.to_string()));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Normalize a reference to `repository:tag`, appending the default tag.
    ///
    /// Unparseable references are returned trimmed but otherwise untouched so
    /// that comparisons against them simply fail to match.
    pub fn normalize(reference: &str) -> String {
        match Self::parse(reference) {
            Ok(image) => image.to_string(),
            Err(_) => reference.trim().to_string(),
        }
    }

    /// Whether `other` names the same image once both are normalized.
    pub fn matches(&self, other: &str) -> bool {
        Self::parse(other).is_ok_and(|o| &o == self)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}
