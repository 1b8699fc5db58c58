//! Text extraction from uploaded file bytes.
//!
//! [`FileKind::from_name`] picks an extraction path from the lowercased file
//! extension; the functions here turn raw bytes into UTF-8 text. Nothing in
//! this module touches the filesystem. Failures are [`ExtractError`]s the
//! ingestor logs and skips; the ingestor also runs extraction on a blocking
//! task so a parser panic only loses that one file.

use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_JSON: &str = "application/json";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Maximum sheets to read from a workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to read per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Bytes inspected when deciding whether unknown content is text.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("invalid UTF-8 text: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported binary content for extension '{0}'")]
    Binary(String),
}

/// Extraction path chosen from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// Page-aware PDF extraction.
    Pdf,
    /// Whole-file UTF-8 text (`.txt`, `.md`).
    Text { markdown: bool },
    /// Parsed and re-serialized JSON.
    Json,
    /// Best-effort extraction for everything else, keyed by the lowercased
    /// extension (empty when the name has none).
    Generic(String),
}

impl FileKind {
    pub fn from_name(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => FileKind::Pdf,
            "txt" => FileKind::Text { markdown: false },
            "md" => FileKind::Text { markdown: true },
            "json" => FileKind::Json,
            _ => FileKind::Generic(ext),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            FileKind::Pdf => MIME_PDF,
            FileKind::Text { markdown: false } => MIME_TEXT,
            FileKind::Text { markdown: true } => MIME_MARKDOWN,
            FileKind::Json => MIME_JSON,
            FileKind::Generic(ext) => match ext.as_str() {
                "docx" => MIME_DOCX,
                "pptx" => MIME_PPTX,
                "xlsx" => MIME_XLSX,
                _ => MIME_OCTET_STREAM,
            },
        }
    }
}

/// Extract text per page. The result has one entry per page, in order;
/// pages without text are present as empty strings.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Strict UTF-8 decode of the whole file.
pub fn extract_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Parse JSON and re-serialize it pretty-printed with two-space indentation.
/// Object key order is preserved.
pub fn extract_json_pretty(bytes: &[u8]) -> Result<String, ExtractError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Best-effort extraction for formats without a dedicated path.
///
/// Office Open XML documents go through their XML readers. Anything else is
/// accepted as plain text when it decodes as UTF-8 and does not look binary.
pub fn extract_generic(bytes: &[u8], ext: &str) -> Result<String, ExtractError> {
    match ext {
        "docx" => extract_docx(bytes),
        "pptx" => extract_pptx(bytes),
        "xlsx" => extract_xlsx(bytes),
        _ => {
            let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
            if sniff.contains(&0) {
                return Err(ExtractError::Binary(ext.to_string()));
            }
            String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::Binary(ext.to_string()))
        }
    }
}

type ZipReader<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_zip(bytes: &[u8]) -> Result<ZipReader<'_>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry_bounded(archive: &mut ZipReader<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entry names matching `<prefix>N.xml`, ordered by N.
fn numbered_entries(archive: &ZipReader<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml")?;
    collect_paragraph_text(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let text = collect_paragraph_text(&xml)?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

/// Text of every `<t>` element, one line per `<p>` paragraph. Works for
/// both WordprocessingML (`w:`) and DrawingML (`a:`) since only local names
/// are compared.
fn collect_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        lines.push(trimmed.to_string());
                    }
                    line.clear();
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                line.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    let trimmed = line.trim();
    if !trimmed.is_empty() {
        lines.push(trimmed.to_string());
    }
    Ok(lines.join("\n"))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    // Workbooks with only numbers or inline strings have no shared-string table.
    let shared = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        let xml = read_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };
    let mut sheets = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let text = read_sheet_rows(&xml, &shared)?;
        if !text.is_empty() {
            sheets.push(text);
        }
    }
    Ok(sheets.join("\n\n"))
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// One line per `<row>`, cells separated by tabs. Shared-string cells are
/// resolved against `shared`; numeric and inline-string cells are kept as is.
fn read_sheet_rows(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut cell_is_shared = false;
    let mut in_value = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_is_shared = e.attributes().flatten().any(|a| {
                        a.key.local_name().as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => cell_is_shared = false,
                b"row" => {
                    if !cells.is_empty() {
                        rows.push(cells.join("\t"));
                        cells.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                let value = raw.trim();
                let resolved = if value.is_empty() {
                    None
                } else if cell_is_shared {
                    value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i))
                        .cloned()
                } else {
                    Some(value.to_string())
                };
                if let Some(text) = resolved {
                    cells.push(text);
                    cell_count += 1;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !cells.is_empty() {
        rows.push(cells.join("\t"));
    }
    Ok(rows.join("\n"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Minimal docx (ZIP) with one `<w:p>` per paragraph.
    pub(crate) fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip_with_entries(&[("word/document.xml", xml)])
    }

    fn zip_with_entries(entries: &[(&str, String)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn file_kind_dispatch_is_case_insensitive() {
        assert_eq!(FileKind::from_name("Spec.PDF"), FileKind::Pdf);
        assert_eq!(
            FileKind::from_name("README.md"),
            FileKind::Text { markdown: true }
        );
        assert_eq!(FileKind::from_name("a.Json"), FileKind::Json);
        assert_eq!(
            FileKind::from_name("brief.docx"),
            FileKind::Generic("docx".to_string())
        );
        assert_eq!(
            FileKind::from_name("Makefile"),
            FileKind::Generic(String::new())
        );
    }

    #[test]
    fn json_is_pretty_printed_in_source_order() {
        let text = extract_json_pretty(br#"{"z":1,"a":[true]}"#).unwrap();
        assert_eq!(text, "{\n  \"z\": 1,\n  \"a\": [\n    true\n  ]\n}");
    }

    #[test]
    fn invalid_json_returns_error() {
        let err = extract_json_pretty(b"{not json").unwrap_err();
        assert!(matches!(err, ExtractError::Json(_)));
    }

    #[test]
    fn invalid_utf8_returns_error() {
        let err = extract_utf8(&[0xff, 0xfe, 0x41]).unwrap_err();
        assert!(matches!(err, ExtractError::Utf8(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf_pages(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_generic(b"not a zip", "docx").unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let bytes = docx_with_paragraphs(&["Login page", "Password &amp; email"]);
        let text = extract_generic(&bytes, "docx").unwrap();
        assert_eq!(text, "Login page\nPassword & email");
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let slide = |t: &str| {
            format!(
                "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>",
                t
            )
        };
        let bytes = zip_with_entries(&[
            ("ppt/slides/slide10.xml", slide("ten")),
            ("ppt/slides/slide2.xml", slide("two")),
        ]);
        assert_eq!(extract_generic(&bytes, "pptx").unwrap(), "two\n\nten");
    }

    #[test]
    fn xlsx_resolves_shared_strings() {
        let shared = "<sst><si><t>Total</t></si><si><t>Discount</t></si></sst>".to_string();
        let sheet = "<worksheet><sheetData><row><c t=\"s\"><v>0</v></c><c><v>42</v></c></row><row><c t=\"s\"><v>1</v></c></row></sheetData></worksheet>".to_string();
        let bytes = zip_with_entries(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        assert_eq!(extract_generic(&bytes, "xlsx").unwrap(), "Total\t42\nDiscount");
    }

    #[test]
    fn unknown_text_extension_is_decoded() {
        let text = extract_generic(b"<form id='login'></form>", "html").unwrap();
        assert!(text.contains("login"));
    }

    #[test]
    fn unknown_binary_extension_is_rejected() {
        let err = extract_generic(&[0x89, b'P', b'N', b'G', 0, 0, 0], "png").unwrap_err();
        assert!(matches!(err, ExtractError::Binary(_)));
    }
}
