//! Text extraction for uploaded documents.
//!
//! Callers supply bytes plus a content type; this module returns plain UTF-8
//! text. Images never come through here: they are embedded directly from
//! their bytes by the image embedder.

use std::path::Path;

use crate::error::{RagError, Result};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// What kind of payload a content type describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Text,
    Pdf,
    Image,
}

/// Classify a MIME type, ignoring parameters such as `; charset=utf-8`.
pub fn classify(content_type: &str) -> Result<PayloadKind> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence == MIME_PDF {
        Ok(PayloadKind::Pdf)
    } else if essence.starts_with("text/") {
        Ok(PayloadKind::Text)
    } else if essence.starts_with("image/") {
        Ok(PayloadKind::Image)
    } else {
        Err(RagError::invalid(format!(
            "unsupported content type: {}",
            if essence.is_empty() { "<none>" } else { &essence }
        )))
    }
}

/// Extract plain text from a text or PDF payload.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String> {
    match classify(content_type)? {
        PayloadKind::Text => Ok(String::from_utf8_lossy(bytes).into_owned()),
        PayloadKind::Pdf => extract_pdf(bytes),
        PayloadKind::Image => Err(RagError::invalid(
            "images carry no text; embed them with the image embedder",
        )),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    // pdf-extract panics on some malformed inputs.
    let owned = bytes.to_vec();
    match std::panic::catch_unwind(move || pdf_extract::extract_text_from_mem(&owned)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(RagError::invalid(format!("PDF extraction failed: {}", e))),
        Err(_) => Err(RagError::invalid("PDF extraction failed: malformed document")),
    }
}

/// Guess a content type from a file extension. Returns `None` for files the
/// pipeline does not ingest.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" | "text" | "log" => MIME_TEXT,
        "md" | "markdown" => MIME_MARKDOWN,
        "pdf" => MIME_PDF,
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pdf_with_phrase() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");
        let o1 = out.len();
        out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
        let o2 = out.len();
        out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
        let o3 = out.len();
        out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
        let o4 = out.len();
        out.extend_from_slice(b"4 0 obj << /Length 50 >> stream\nBT /F1 12 Tf 100 700 Td (vector test phrase) Tj ET\nendstream endobj\n");
        let o5 = out.len();
        out.extend_from_slice(
            b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
        );
        let xref_start = out.len();
        out.extend_from_slice(b"xref\n0 6\n");
        out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
        for offset in [o1, o2, o3, o4, o5] {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
        out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
        out.extend_from_slice(b"%%EOF\n");
        out
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("text/plain; charset=utf-8").unwrap(), PayloadKind::Text);
        assert_eq!(classify("Application/PDF").unwrap(), PayloadKind::Pdf);
        assert_eq!(classify("image/png").unwrap(), PayloadKind::Image);
        assert!(classify("application/zip").is_err());
        assert!(classify("").is_err());
    }

    #[test]
    fn test_extract_text_lossy() {
        let text = extract_text(b"hello \xffworld", "text/plain").unwrap();
        assert!(text.starts_with("hello "));
        assert!(text.ends_with("world"));
    }

    #[test]
    fn test_extract_pdf() {
        let text = extract_text(&minimal_pdf_with_phrase(), MIME_PDF).unwrap();
        assert!(text.contains("vector test phrase"), "got: {:?}", text);
    }

    #[test]
    fn test_corrupt_pdf_is_error() {
        let err = extract_text(b"not a valid pdf", MIME_PDF).unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[test]
    fn test_content_type_for_path() {
        assert_eq!(content_type_for_path(Path::new("a/b.MD")), Some(MIME_MARKDOWN));
        assert_eq!(content_type_for_path(Path::new("scan.pdf")), Some(MIME_PDF));
        assert_eq!(content_type_for_path(Path::new("x.jpeg")), Some("image/jpeg"));
        assert_eq!(content_type_for_path(Path::new("archive.zip")), None);
        assert_eq!(content_type_for_path(Path::new("README")), None);
    }
}
