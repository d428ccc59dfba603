//! Document loading: validates an uploaded file reference and extracts its raw text.
//!
//! Supported: plain text, PDF (via `pdf-extract`), and Word OOXML packages
//! (`.docx`, plus `.doc` files that are really OOXML). PDF and DOCX decoding is
//! CPU-bound and runs inside `tokio::task::spawn_blocking`.

use std::io::{Cursor, Read};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Extensions accepted at the upload boundary.
pub const ALLOWED_EXTENSIONS: &[&str] = &["txt", "pdf", "docx", "doc"];

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("unsupported file type '.{0}' (allowed: txt, pdf, docx, doc)")]
    UnsupportedExtension(String),

    #[error("file could not be read: {0}")]
    Unreadable(String),

    #[error("file is empty")]
    Empty,

    #[error("no text could be extracted from the document")]
    NoText,

    #[error("legacy binary .doc files are not supported; save as .docx")]
    LegacyWordFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Text,
    Pdf,
    Word,
}

impl DocumentKind {
    pub fn from_extension(extension: &str) -> Result<Self, DocumentError> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(DocumentError::UnsupportedExtension(extension));
        }
        Ok(match extension.as_str() {
            "pdf" => DocumentKind::Pdf,
            "docx" | "doc" => DocumentKind::Word,
            _ => DocumentKind::Text,
        })
    }
}

/// What the upload front door hands to the core: a local path plus the
/// original filename and its declared extension.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub filename: String,
    pub extension: String,
}

impl UploadedFile {
    /// Derives the declared extension from the original filename.
    pub fn new(path: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        Self {
            path: path.into(),
            filename,
            extension,
        }
    }
}

/// Metadata about the source file kept on the job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub filename: String,
    pub kind: DocumentKind,
    pub size_bytes: u64,
}

impl SourceDocument {
    /// Filename without its extension, used to name stored artifacts.
    pub fn stem(&self) -> &str {
        self.filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .filter(|stem| !stem.is_empty())
            .unwrap_or(&self.filename)
    }
}

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub source: SourceDocument,
    pub text: String,
}

/// Reads `upload` and extracts its text. Fails before any job exists, so a bad
/// reference never produces progress events.
pub async fn load(upload: &UploadedFile) -> Result<LoadedDocument, DocumentError> {
    let kind = DocumentKind::from_extension(&upload.extension)?;

    let bytes = tokio::fs::read(&upload.path)
        .await
        .map_err(|e| DocumentError::Unreadable(e.to_string()))?;
    if bytes.is_empty() {
        return Err(DocumentError::Empty);
    }
    let size_bytes = bytes.len() as u64;

    let text = match kind {
        DocumentKind::Text => String::from_utf8_lossy(&bytes).into_owned(),
        DocumentKind::Pdf => blocking(move || extract_pdf(&bytes)).await?,
        DocumentKind::Word => blocking(move || extract_docx(&bytes)).await?,
    };

    if text.trim().is_empty() {
        return Err(DocumentError::NoText);
    }

    debug!(
        "Extracted {} chars from {} ({:?}, {} bytes)",
        text.len(),
        upload.filename,
        kind,
        size_bytes
    );

    Ok(LoadedDocument {
        source: SourceDocument {
            filename: upload.filename.clone(),
            kind,
            size_bytes,
        },
        text,
    })
}

async fn blocking<F>(f: F) -> Result<String, DocumentError>
where
    F: FnOnce() -> Result<String, DocumentError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DocumentError::Unreadable(format!("extraction task failed: {e}")))?
}

fn extract_pdf(bytes: &[u8]) -> Result<String, DocumentError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| DocumentError::Unreadable(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, DocumentError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|_| DocumentError::LegacyWordFormat)?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| DocumentError::Unreadable(format!("missing word/document.xml: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| DocumentError::Unreadable(e.to_string()))?;
    Ok(word_xml_to_text(&xml))
}

/// Flattens WordprocessingML into plain text: one line per paragraph, tabs and
/// breaks preserved, all other markup dropped.
fn word_xml_to_text(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 4);
    let mut rest = xml;

    while let Some(start) = rest.find('<') {
        out.push_str(&decode_entities(&rest[..start]));
        let Some(end) = rest[start..].find('>') else {
            break;
        };
        let tag = &rest[start + 1..start + end];
        let tag_name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("");
        match tag_name {
            "w:p" if tag.starts_with('/') => out.push('\n'),
            "w:tab" => out.push('\t'),
            "w:br" | "w:cr" => out.push('\n'),
            _ => {}
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(&decode_entities(rest));
    out
}

/// Longest entity body we try to decode (`#x10FFFF`).
const MAX_ENTITY_LEN: usize = 8;

/// Decodes the predefined XML entities and numeric character references in
/// one pass. Anything unrecognised is kept verbatim.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let decoded = tail
            .find(';')
            .filter(|&end| end <= MAX_ENTITY_LEN)
            .and_then(|end| decode_entity(&tail[..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(body: &str) -> Option<char> {
    match body {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let numeric = body.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
