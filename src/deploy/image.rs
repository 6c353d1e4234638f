//! Container image references and the image descriptor file.
//!
//! The build stage writes the descriptor; the deploy stage reads the same
//! path back. Its shape is a JSON array of `{"name", "imageUri"}` objects,
//! one per container.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Tag moved to every new build
pub const LATEST_TAG: &str = "latest";

/// Length of the commit-hash tag
pub const SHORT_HASH_LEN: usize = 7;

/// Image in a repository, pinned by tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    pub repository_uri: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(repository_uri: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository_uri: repository_uri.into(),
            tag: tag.into(),
        }
    }

    pub fn latest(repository_uri: impl Into<String>) -> Self {
        Self::new(repository_uri, LATEST_TAG)
    }

    /// Same repository, different tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self::new(self.repository_uri.clone(), tag)
    }

    /// `{repository_uri}:{tag}`
    pub fn uri(&self) -> String {
        format!("{}:{}", self.repository_uri, self.tag)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository_uri, self.tag)
    }
}

/// Tag derived from a full commit hash.
pub fn short_commit(commit: &str) -> Result<String, ImageError> {
    let commit = commit.trim();
    if commit.len() < SHORT_HASH_LEN || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ImageError::InvalidCommit(commit.to_string()));
    }
    Ok(commit[..SHORT_HASH_LEN].to_ascii_lowercase())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("'{0}' is not a commit hash")]
    InvalidCommit(String),
}

/// One entry of the descriptor file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    pub name: String,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

/// The descriptor file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageDefinitions(pub Vec<ImageDefinition>);

impl ImageDefinitions {
    /// Descriptor naming a single container.
    pub fn single(container: impl Into<String>, image: &ImageReference) -> Self {
        Self(vec![ImageDefinition {
            name: container.into(),
            image_uri: image.uri(),
        }])
    }

    pub fn find(&self, container: &str) -> Option<&ImageDefinition> {
        self.0.iter().find(|d| d.name == container)
    }

    pub fn to_json(&self) -> Result<String, DescriptorError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), DescriptorError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, DescriptorError> {
        let contents = std::fs::read_to_string(path)?;
        let definitions: Self = serde_json::from_str(&contents)?;
        if definitions.0.is_empty() {
            return Err(DescriptorError::Empty);
        }
        Ok(definitions)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Failed to access descriptor file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed descriptor file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Descriptor file lists no containers")]
    Empty,
}
