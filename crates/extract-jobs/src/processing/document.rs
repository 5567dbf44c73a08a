//! Document payloads accepted on submission

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MIME types whose payload is plain text
const TEXT_MIME_TYPES: &[&str] = &["text/plain", "text/markdown"];

/// MIME types whose payload is base64-encoded bytes
const BINARY_MIME_TYPES: &[&str] = &["application/pdf", "image/png", "image/jpeg", "image/tiff"];

/// Wire form of a submitted document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub filename: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_base64: Option<String>,
}

/// Validated document content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Text(String),
    Binary(Vec<u8>),
}

/// A document that passed validation and can be handed to the runner
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub mime_type: String,
    pub content: DocumentContent,
}

impl Document {
    /// Build a text document directly
    pub fn text(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: "text/plain".to_string(),
            content: DocumentContent::Text(text.into()),
        }
    }

    pub fn size_bytes(&self) -> usize {
        match &self.content {
            DocumentContent::Text(text) => text.len(),
            DocumentContent::Binary(bytes) => bytes.len(),
        }
    }

    /// Text carried by the payload itself, if any
    pub fn embedded_text(&self) -> Option<&str> {
        match &self.content {
            DocumentContent::Text(text) => Some(text),
            DocumentContent::Binary(_) => None,
        }
    }
}

impl DocumentPayload {
    /// Validate the payload; every failure here happens before a job exists
    pub fn into_document(self, max_bytes: usize) -> Result<Document> {
        if self.filename.trim().is_empty() {
            return Err(Error::validation("filename is required"));
        }

        let mime_type = self.mime_type.trim().to_ascii_lowercase();
        let content = if TEXT_MIME_TYPES.contains(&mime_type.as_str()) {
            let text = self
                .text
                .ok_or_else(|| Error::validation(format!("{} documents require 'text'", mime_type)))?;
            if text.trim().is_empty() {
                return Err(Error::validation("document text is empty"));
            }
            DocumentContent::Text(text)
        } else if BINARY_MIME_TYPES.contains(&mime_type.as_str()) {
            let encoded = self.content_base64.ok_or_else(|| {
                Error::validation(format!("{} documents require 'content_base64'", mime_type))
            })?;
            // Cheap pre-check so oversized uploads are not fully decoded
            if encoded.len() / 4 * 3 > max_bytes + 3 {
                return Err(too_large(encoded.len() / 4 * 3, max_bytes));
            }
            let bytes = BASE64
                .decode(encoded.trim())
                .map_err(|e| Error::validation(format!("content_base64 is not valid base64: {}", e)))?;
            if bytes.is_empty() {
                return Err(Error::validation("document content is empty"));
            }
            DocumentContent::Binary(bytes)
        } else {
            return Err(Error::validation(format!(
                "unsupported mime_type '{}'",
                self.mime_type
            )));
        };

        let document = Document {
            filename: self.filename,
            mime_type,
            content,
        };
        if document.size_bytes() > max_bytes {
            return Err(too_large(document.size_bytes(), max_bytes));
        }
        Ok(document)
    }
}

fn too_large(size: usize, max_bytes: usize) -> Error {
    Error::validation(format!(
        "document is {} bytes, limit is {} bytes",
        size, max_bytes
    ))
}
