//! Text extraction for binary payloads.
//!
//! Drivers hand over bytes plus whatever content type the document carries;
//! an extractor returns plain UTF-8 text or an error, in which case the
//! document is stored without content.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),

    #[error("content is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

pub trait ContentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], content_type: Option<&str>) -> Result<String, ExtractError>;
}

/// Accepts UTF-8 text and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl ContentExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], content_type: Option<&str>) -> Result<String, ExtractError> {
        if let Some(ct) = content_type {
            if !is_textual(ct) {
                return Err(ExtractError::UnsupportedContentType(ct.to_string()));
            }
        }
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

fn is_textual(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/")
        || matches!(
            essence.as_str(),
            "application/json" | "application/xml" | "application/x-yaml" | "application/toml"
        )
}
