//! Input bundles: the artifacts submitted for one side of a validation.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// Size ceilings for an input bundle. A file at exactly the ceiling is
/// accepted; one byte over is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleLimits {
    pub max_total_bytes: usize,
    pub max_file_bytes: usize,
    pub max_files: usize,
}

impl Default for BundleLimits {
    fn default() -> Self {
        Self {
            max_total_bytes: 100 * 1024 * 1024,
            max_file_bytes: 10 * 1024 * 1024,
            max_files: 50,
        }
    }
}

/// One submitted code file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeFile {
    pub path: String,
    /// Detected or declared language ("python", "java", ...)
    pub language: String,
    pub content: String,
    /// Content hash, computed at intake
    pub fingerprint: Fingerprint,
}

impl CodeFile {
    pub fn new(
        path: impl Into<String>,
        language: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let language = language.into();
        let content = content.into();
        let fingerprint = Fingerprint::for_file(&path, &language, content.as_bytes());
        Self {
            path,
            language,
            content,
            fingerprint,
        }
    }
}

/// One submitted screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    /// Client-supplied reference (filename or label)
    pub reference: String,
    pub data: Vec<u8>,
    pub fingerprint: Fingerprint,
}

impl Screenshot {
    pub fn new(reference: impl Into<String>, data: Vec<u8>) -> Self {
        let reference = reference.into();
        let fingerprint = Fingerprint::for_screenshot(&reference, &data);
        Self {
            reference,
            data,
            fingerprint,
        }
    }
}

/// The artifacts for one side (source or target): code files, screenshots,
/// a live URL, or a mix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputBundle {
    #[serde(default)]
    pub files: Vec<CodeFile>,
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InputBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, file: CodeFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_screenshot(mut self, screenshot: Screenshot) -> Self {
        self.screenshots.push(screenshot);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.screenshots.is_empty() && self.url.is_none()
    }

    pub fn artifact_count(&self) -> usize {
        self.files.len() + self.screenshots.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum::<usize>()
            + self.screenshots.iter().map(|s| s.data.len()).sum::<usize>()
    }

    /// Enforce the configured ceilings.
    pub fn validate(&self, limits: &BundleLimits) -> Result<()> {
        if self.artifact_count() > limits.max_files {
            return Err(Error::invalid_input(format!(
                "bundle has {} artifacts, limit is {}",
                self.artifact_count(),
                limits.max_files
            )));
        }

        for file in &self.files {
            if file.content.len() > limits.max_file_bytes {
                return Err(Error::invalid_input(format!(
                    "file {} is {} bytes, per-file limit is {}",
                    file.path,
                    file.content.len(),
                    limits.max_file_bytes
                )));
            }
        }
        for shot in &self.screenshots {
            if shot.data.len() > limits.max_file_bytes {
                return Err(Error::invalid_input(format!(
                    "screenshot {} is {} bytes, per-file limit is {}",
                    shot.reference,
                    shot.data.len(),
                    limits.max_file_bytes
                )));
            }
        }

        if self.total_bytes() > limits.max_total_bytes {
            return Err(Error::invalid_input(format!(
                "bundle is {} bytes, total limit is {}",
                self.total_bytes(),
                limits.max_total_bytes
            )));
        }

        Ok(())
    }
}
