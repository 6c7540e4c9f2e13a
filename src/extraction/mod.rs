//! # Text Extraction
//!
//! Recognising text in an uploaded image or PDF is the other remote model call.
//! The HTTP layer only sees "file bytes + MIME type in, plain text out, or an
//! opaque failure"; the result becomes the editable document.
//!
//! ## Key Components:
//! - **TextExtractor**: The async trait the upload handler depends on
//! - **UploadKind**: Which uploads are accepted at all
//! - **GeminiExtractor**: REST adapter for the hosted vision model (`gemini`)

pub mod gemini;

use async_trait::async_trait;
use std::fmt;

pub use gemini::GeminiExtractor;

/// Opaque extraction failure, shown to the user as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionError(pub String);

impl ExtractionError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Text extraction failed: {}", self.0)
    }
}

impl std::error::Error for ExtractionError {}

/// Turns an image or PDF into text.
///
/// ## Contract:
/// - `mime_type` has already been checked with `UploadKind::from_mime`
/// - Returns the extracted text trimmed of surrounding whitespace, never empty
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, data: &[u8], mime_type: &str) -> Result<String, ExtractionError>;
}

/// Accepted upload types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    Pdf,
}

impl UploadKind {
    /// `image/*` or `application/pdf`; parameters after `;` are ignored.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let essence = mime_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        if essence == "application/pdf" {
            Some(UploadKind::Pdf)
        } else if essence.starts_with("image/") && essence.len() > "image/".len() {
            Some(UploadKind::Image)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Image => "image",
            UploadKind::Pdf => "pdf",
        }
    }
}
