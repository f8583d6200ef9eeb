//! Text extraction for ingestion (§4.6 step 4). PDFs are walked page by
//! page with `lopdf` and concatenated; everything else is decoded as
//! UTF-8, lossily, since the corpus this service indexes is assumed
//! plain-text-ish (markdown, source, notes) rather than office formats.
//! Grounded on the teacher's `processing/lopdf_parser.rs` page-walking
//! logic, stripped of the form-field/annotation extraction that service's
//! tax-document use case needed and this one does not.

use std::collections::HashMap;

use lopdf::{Document, Object};
use serde_json::Value;

use crate::error::{RagError, Result};

pub struct ExtractedText {
    pub text: String,
    pub metadata: HashMap<String, Value>,
}

pub fn extract(bytes: &[u8], content_type: &str) -> Result<ExtractedText> {
    if content_type == "application/pdf" || looks_like_pdf(bytes) {
        extract_pdf(bytes)
    } else {
        let text = String::from_utf8_lossy(bytes).into_owned();
        let mut metadata = HashMap::new();
        metadata.insert("type".to_string(), Value::String("text".to_string()));
        Ok(ExtractedText { text, metadata })
    }
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText> {
    let doc = Document::load_mem(bytes).map_err(|e| RagError::Pdf(e.to_string()))?;
    let page_ids: Vec<(u32, u16)> = doc.get_pages().values().cloned().collect();

    let mut pages = Vec::with_capacity(page_ids.len());
    for &page_id in &page_ids {
        pages.push(extract_page_text(&doc, page_id).unwrap_or_default());
    }

    let text = pages.join("\n");
    let mut metadata = HashMap::new();
    metadata.insert("type".to_string(), Value::String("pdf".to_string()));
    metadata.insert("pages".to_string(), Value::from(pages.len()));
    Ok(ExtractedText { text, metadata })
}

fn extract_page_text(doc: &Document, page_id: (u32, u16)) -> Result<String> {
    let page = doc
        .get_object(page_id)
        .map_err(|e| RagError::Pdf(e.to_string()))?;
    let page_dict = page.as_dict().map_err(|e| RagError::Pdf(e.to_string()))?;

    match page_dict.get(b"Contents") {
        Ok(contents) => extract_content_text(doc, contents),
        Err(_) => Ok(String::new()),
    }
}

fn extract_content_text(doc: &Document, contents: &Object) -> Result<String> {
    match contents {
        Object::Reference(ref_id) => {
            let obj = doc.get_object(*ref_id).map_err(|e| RagError::Pdf(e.to_string()))?;
            extract_content_text(doc, &obj)
        }
        Object::Array(arr) => {
            let mut text = String::new();
            for item in arr {
                if let Ok(t) = extract_content_text(doc, item) {
                    text.push_str(&t);
                }
            }
            Ok(text)
        }
        Object::Stream(stream) => {
            if let Ok(data) = stream.decode_content() {
                if let Ok(bytes) = data.encode() {
                    let content = String::from_utf8_lossy(&bytes);
                    return Ok(parse_content_stream(&content));
                }
            }
            Ok(String::new())
        }
        _ => Ok(String::new()),
    }
}

/// Parse PDF content-stream text-showing operators (`Tj`, `TJ`, `ET`).
fn parse_content_stream(content: &str) -> String {
    let mut result = String::new();
    let mut current = String::new();

    for line in content.lines() {
        let line = line.trim();
        if line.ends_with("Tj") {
            if let (Some(start), Some(end)) = (line.find('('), line.rfind(')')) {
                if end > start {
                    current.push_str(&unescape_pdf_string(&line[start + 1..end]));
                    current.push(' ');
                }
            }
        } else if line.ends_with("TJ") {
            if let (Some(start), Some(end)) = (line.find('['), line.rfind(']')) {
                if end > start {
                    for part in line[start + 1..end].split(')').filter(|s| !s.is_empty()) {
                        if let Some(ts) = part.rfind('(') {
                            current.push_str(&unescape_pdf_string(&part[ts + 1..]));
                        }
                    }
                    current.push(' ');
                }
            }
        } else if line == "ET" && !current.is_empty() {
            result.push_str(current.trim());
            result.push('\n');
            current.clear();
        }
    }
    if !current.is_empty() {
        result.push_str(current.trim());
    }
    result
}

fn unescape_pdf_string(s: &str) -> String {
    s.replace("\\n", "\n")
        .replace("\\r", "\r")
        .replace("\\t", "\t")
        .replace("\\(", "(")
        .replace("\\)", ")")
        .replace("\\\\", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_decoded_lossily() {
        let extracted = extract(b"hello world", "text/plain").unwrap();
        assert_eq!(extracted.text, "hello world");
        assert_eq!(extracted.metadata.get("type").unwrap(), "text");
    }

    #[test]
    fn invalid_utf8_does_not_error() {
        let extracted = extract(&[0xff, 0xfe, 0x00], "text/plain").unwrap();
        assert_eq!(extracted.metadata.get("type").unwrap(), "text");
    }
}
