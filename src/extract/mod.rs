//! Document ingestion: turns uploaded bytes into one linear transcript string
//! suitable both as narration input and as the visual transcript.

use std::path::Path;

use thiserror::Error;

pub mod pdf;
pub mod text;

pub use pdf::{PdfImporter, PdfPage, ScriptPdfImporter};

/// Separator inserted between consecutive PDF pages in the transcript.
pub const PAGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Error)]
pub enum DocumentReadError {
    #[error("document is not valid UTF-8 text")]
    Decode(#[from] std::string::FromUtf8Error),
    #[error("document I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to launch the PDF importer: {0}")]
    ImporterSpawn(#[source] std::io::Error),
    #[error("PDF importer exited with status {status}: {stderr}")]
    ImporterFailed { status: i32, stderr: String },
    #[error("PDF importer produced a malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),
    #[error("{message}")]
    Rejected { code: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Pdf,
    PlainText,
}

impl MediaKind {
    /// Anything that does not declare itself a PDF is narrated as plain text.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("pdf") => MediaKind::Pdf,
            _ => MediaKind::PlainText,
        }
    }
}

/// Converts an uploaded document into a single normalized text string.
///
/// Extraction is all-or-nothing: a failure never returns the text of pages
/// processed before it, and never touches playback state.
pub struct DocumentExtractor {
    importer: Box<dyn PdfImporter + Send + Sync>,
}

impl DocumentExtractor {
    pub fn new() -> Self {
        Self::with_importer(Box::new(ScriptPdfImporter::from_env()))
    }

    pub fn with_importer(importer: Box<dyn PdfImporter + Send + Sync>) -> Self {
        Self { importer }
    }

    /// Produces the transcript for `bytes` according to its declared kind.
    ///
    /// Empty input yields an empty transcript for every media kind. For PDFs,
    /// fragments within a page are joined with a single space and pages are
    /// joined with [`PAGE_SEPARATOR`], preserving the importer's ordering.
    pub fn extract(&self, kind: MediaKind, bytes: &[u8]) -> Result<String, DocumentReadError> {
        if bytes.is_empty() {
            return Ok(String::new());
        }
        match kind {
            MediaKind::PlainText => text::decode(bytes),
            MediaKind::Pdf => {
                let pages = self.importer.open(bytes)?;
                let joined: Vec<String> =
                    pages.iter().map(|page| page.fragments.join(" ")).collect();
                Ok(joined.join(PAGE_SEPARATOR))
            }
        }
    }
}

impl Default for DocumentExtractor {
    fn default() -> Self {
        Self::new()
    }
}
