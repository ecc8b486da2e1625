use std::path::Path;

use super::{source_name, DocumentLoader};
use crate::error::{Error, Result};
use crate::models::TextSegment;

/// Extracts text page by page. Pages without extractable text are skipped.
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn load(&self, path: &Path, _mime_type: &str) -> Result<Vec<TextSegment>> {
        let display = path.display().to_string();
        let doc = lopdf::Document::load(path).map_err(|e| Error::load(&display, e))?;
        if doc.is_encrypted() {
            return Err(Error::load(&display, "encrypted PDFs are not supported"));
        }

        let source = source_name(path);
        let mut segments = Vec::new();
        for page_number in doc.get_pages().into_keys() {
            let text = match doc.extract_text(&[page_number]) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("{source}: no text on page {page_number}: {e}");
                    continue;
                }
            };
            if text.trim().is_empty() {
                continue;
            }
            segments.push(TextSegment {
                text,
                page_number: Some(page_number),
                source: source.clone(),
            });
        }

        tracing::debug!("{source}: extracted {} pages with text", segments.len());
        Ok(segments)
    }
}

/// Test helper: writes a PDF with one text page per entry of `pages`.
#[cfg(test)]
pub(crate) fn write_test_pdf(path: &Path, pages: &[&str]) {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_pages_become_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contract.pdf");
        write_test_pdf(&path, &["Payment is due monthly.", "Either party may terminate."]);

        let segments = PdfLoader.load(&path, "application/pdf").unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].page_number, Some(1));
        assert_eq!(segments[1].page_number, Some(2));
        assert!(segments[0].text.contains("Payment is due monthly."));
        assert!(segments[1].text.contains("terminate"));
        assert_eq!(segments[0].source, "contract.pdf");
    }

    #[test]
    fn test_garbage_bytes_are_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"definitely not a pdf").unwrap();
        assert!(matches!(
            PdfLoader.load(&path, "application/pdf"),
            Err(Error::Load { .. })
        ));
    }
}
