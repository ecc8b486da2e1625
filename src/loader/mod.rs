//! Format-specific document loaders.
//!
//! A loader turns a file on disk into ordered [`TextSegment`]s, one per page
//! for paged formats. Loading is blocking; callers run it on the blocking pool.

mod pdf;

use std::path::Path;

pub use pdf::PdfLoader;

use crate::error::{Error, Result};
use crate::models::TextSegment;

pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path, mime_type: &str) -> Result<Vec<TextSegment>>;
}

/// Plain text and markdown, loaded as a single segment.
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn load(&self, path: &Path, _mime_type: &str) -> Result<Vec<TextSegment>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::load(path.display().to_string(), e))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![TextSegment {
            text,
            page_number: None,
            source: source_name(path),
        }])
    }
}

/// Picks a loader from the MIME type, falling back to the file extension.
pub struct FileLoader {
    pdf: PdfLoader,
    text: TextLoader,
}

impl Default for FileLoader {
    fn default() -> Self {
        Self {
            pdf: PdfLoader,
            text: TextLoader,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Pdf,
    Text,
}

fn detect_format(path: &Path, mime_type: &str) -> Option<Format> {
    match mime_type.split(';').next().unwrap_or("").trim() {
        "application/pdf" => return Some(Format::Pdf),
        "text/plain" | "text/markdown" => return Some(Format::Text),
        _ => {}
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    match ext.as_deref() {
        Some("pdf") => Some(Format::Pdf),
        Some("txt") | Some("md") | Some("markdown") => Some(Format::Text),
        _ => None,
    }
}

impl DocumentLoader for FileLoader {
    fn load(&self, path: &Path, mime_type: &str) -> Result<Vec<TextSegment>> {
        if !path.exists() {
            return Err(Error::load(path.display().to_string(), "file does not exist"));
        }
        match detect_format(path, mime_type) {
            Some(Format::Pdf) => self.pdf.load(path, mime_type),
            Some(Format::Text) => self.text.load(path, mime_type),
            None => Err(Error::load(
                path.display().to_string(),
                format!("unsupported format '{mime_type}'"),
            )),
        }
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format_prefers_mime() {
        assert_eq!(
            detect_format(Path::new("upload.bin"), "application/pdf"),
            Some(Format::Pdf)
        );
        assert_eq!(
            detect_format(Path::new("notes"), "text/plain; charset=utf-8"),
            Some(Format::Text)
        );
    }

    #[test]
    fn test_detect_format_falls_back_to_extension() {
        assert_eq!(
            detect_format(Path::new("a.PDF"), "application/octet-stream"),
            Some(Format::Pdf)
        );
        assert_eq!(detect_format(Path::new("a.md"), ""), Some(Format::Text));
        assert_eq!(detect_format(Path::new("a.docx"), ""), None);
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = FileLoader::default()
            .load(Path::new("/nonexistent/file.pdf"), "application/pdf")
            .unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }

    #[test]
    fn test_unsupported_format_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.xlsx");
        std::fs::write(&path, b"PK").unwrap();
        let err = FileLoader::default().load(&path, "").unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }

    #[test]
    fn test_text_loader_single_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "Line one\nLine two\n").unwrap();
        let segments = FileLoader::default().load(&path, "text/plain").unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].source, "notes.txt");
        assert_eq!(segments[0].page_number, None);
        assert!(segments[0].text.contains("Line two"));
    }

    #[test]
    fn test_blank_text_file_gives_no_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, "  \n ").unwrap();
        assert!(TextLoader.load(&path, "text/plain").unwrap().is_empty());
    }
}
