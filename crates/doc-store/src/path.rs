//! Collection and document paths.
//!
//! Paths alternate collection and document segments, so a collection path
//! always has an odd number of segments (`chats`, `chats/c1/messages`) and a
//! document path an even number (`chats/c1`, `chats/c1/messages/m1`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{StoreError, StoreResult};

/// Path to a collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath {
    segments: Vec<String>,
}

impl CollectionPath {
    /// A top-level collection.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// Parses a slash-separated collection path.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let segments = split_segments(raw)?;
        if segments.len() % 2 == 0 {
            return Err(StoreError::InvalidArgument(format!(
                "'{raw}' names a document, not a collection"
            )));
        }
        Ok(Self { segments })
    }

    /// The document with the given id inside this collection.
    pub fn doc(&self, id: impl Into<String>) -> DocPath {
        DocPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    /// Last segment of the path.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The document this collection is nested under, if any.
    pub fn parent(&self) -> Option<DocPath> {
        if self.segments.len() < 3 {
            return None;
        }
        let id = self.segments[self.segments.len() - 2].clone();
        let collection = CollectionPath {
            segments: self.segments[..self.segments.len() - 2].to_vec(),
        };
        Some(DocPath { collection, id })
    }

    /// Checks every segment is non-empty and slash-free.
    pub fn validate(&self) -> StoreResult<()> {
        validate_segments(&self.segments, &self.to_string())
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Path to a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath {
    collection: CollectionPath,
    id: String,
}

impl DocPath {
    /// Parses a slash-separated document path.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let mut segments = split_segments(raw)?;
        if segments.len() % 2 != 0 {
            return Err(StoreError::InvalidArgument(format!(
                "'{raw}' names a collection, not a document"
            )));
        }
        let id = segments.pop().unwrap_or_default();
        Ok(Self {
            collection: CollectionPath { segments },
            id,
        })
    }

    /// The document id (last segment).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The collection holding this document.
    pub fn parent(&self) -> &CollectionPath {
        &self.collection
    }

    /// A subcollection nested under this document.
    pub fn child(&self, name: impl Into<String>) -> CollectionPath {
        let mut segments = self.collection.segments.clone();
        segments.push(self.id.clone());
        segments.push(name.into());
        CollectionPath { segments }
    }

    /// Checks every segment is non-empty and slash-free.
    pub fn validate(&self) -> StoreResult<()> {
        self.collection.validate()?;
        validate_segments(std::slice::from_ref(&self.id), &self.to_string())
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

fn split_segments(raw: &str) -> StoreResult<Vec<String>> {
    let segments: Vec<String> = raw.trim_matches('/').split('/').map(str::to_string).collect();
    validate_segments(&segments, raw)?;
    Ok(segments)
}

fn validate_segments(segments: &[String], raw: &str) -> StoreResult<()> {
    if segments.iter().any(|s| s.is_empty() || s.contains('/')) {
        return Err(StoreError::InvalidArgument(format!(
            "'{raw}' contains an empty or malformed segment"
        )));
    }
    Ok(())
}
