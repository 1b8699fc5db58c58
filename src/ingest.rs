//! Upload ingestion: staging and text extraction.
//!
//! Each uploaded file is first written verbatim to the staging directory
//! under its own file name, whatever happens afterwards. Its text is then
//! extracted according to the lowercased extension:
//!
//! | Extension | Result |
//! |-----------|--------|
//! | `.pdf` | one document per page with text, carrying `page` / `total_pages` |
//! | `.txt`, `.md` | the whole file, strict UTF-8 |
//! | `.json` | the parsed value re-serialized with two-space indentation |
//! | anything else | OOXML readers for `.docx` / `.pptx` / `.xlsx`, otherwise plain text if it is not binary |
//!
//! Failures are per file. A file that cannot be staged or extracted is
//! logged at `warn` and yields no documents; the rest of the batch goes on.
//!
//! Staging keys on the bare file name, so a second upload with the same
//! name replaces the first one on disk. This is logged but not prevented.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::extract::{
    extract_generic, extract_json_pretty, extract_pdf_pages, extract_utf8, ExtractError, FileKind,
};
use crate::models::{
    Document, Metadata, UploadedFile, META_CONTENT_TYPE, META_FILE_PATH, META_PAGE, META_SOURCE,
    META_TOTAL_PAGES,
};

/// Writes uploads to the staging directory and turns them into documents.
#[derive(Debug, Clone)]
pub struct Ingestor {
    staging_dir: PathBuf,
}

impl Ingestor {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Create the staging directory if it does not exist yet.
    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.staging_dir).await
    }

    /// Stage `file` and extract its documents. Never fails; an unusable
    /// file produces an empty vector.
    pub async fn ingest(&self, file: &UploadedFile) -> Vec<Document> {
        let Some(name) = staging_file_name(&file.name) else {
            warn!("Skipping upload with unusable file name {:?}", file.name);
            return Vec::new();
        };

        let path = match self.stage(&name, &file.bytes).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to stage {}: {}", name, e);
                return Vec::new();
            }
        };

        extract_upload(&name, &path, file.bytes.clone()).await
    }

    async fn stage(&self, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let path = self.staging_dir.join(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!("Overwriting previously staged file {}", path.display());
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// Final path component of a client-supplied name. Directory parts (either
/// separator style) are discarded; empty, `.` and `..` are rejected.
pub fn staging_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    match last {
        "" | "." | ".." => None,
        other => Some(other.to_string()),
    }
}

/// Extract the documents of one file without staging it. `path` is
/// recorded as the `file_path` metadata. Failures are logged and yield an
/// empty vector.
pub async fn extract_upload(name: &str, path: &Path, bytes: Vec<u8>) -> Vec<Document> {
    let kind = FileKind::from_name(name);
    debug!("Extracting {} as {:?} ({} bytes)", name, kind, bytes.len());

    let mut base = Metadata::new();
    base.insert(META_SOURCE.to_string(), name.to_string());
    base.insert(META_FILE_PATH.to_string(), path.display().to_string());
    base.insert(META_CONTENT_TYPE.to_string(), kind.content_type().to_string());

    let extracted =
        tokio::task::spawn_blocking(move || extract_documents(&kind, &bytes, &base)).await;

    match extracted {
        Ok(Ok(documents)) => {
            if documents.is_empty() {
                warn!("No text extracted from {}", name);
            }
            documents
        }
        Ok(Err(e)) => {
            warn!("Extraction failed for {}: {}", name, e);
            Vec::new()
        }
        Err(e) => {
            warn!("Extraction task for {} did not complete: {}", name, e);
            Vec::new()
        }
    }
}

/// Run the extractor for `kind` and wrap non-blank results as documents.
fn extract_documents(
    kind: &FileKind,
    bytes: &[u8],
    base: &Metadata,
) -> Result<Vec<Document>, ExtractError> {
    let mut documents = Vec::new();
    match kind {
        FileKind::Pdf => {
            let pages = extract_pdf_pages(bytes)?;
            let total = pages.len();
            for (page, text) in pages.into_iter().enumerate() {
                if text.trim().is_empty() {
                    continue;
                }
                let mut metadata = base.clone();
                metadata.insert(META_PAGE.to_string(), page.to_string());
                metadata.insert(META_TOTAL_PAGES.to_string(), total.to_string());
                documents.push(Document::new(text, metadata));
            }
        }
        FileKind::Text { .. } => push_if_text(&mut documents, extract_utf8(bytes)?, base),
        FileKind::Json => push_if_text(&mut documents, extract_json_pretty(bytes)?, base),
        FileKind::Generic(ext) => push_if_text(&mut documents, extract_generic(bytes, ext)?, base),
    }
    Ok(documents)
}

fn push_if_text(documents: &mut Vec<Document>, text: String, base: &Metadata) {
    if !text.trim().is_empty() {
        documents.push(Document::new(text, base.clone()));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extract::tests::docx_with_paragraphs;
    use crate::extract::{MIME_DOCX, MIME_JSON, MIME_MARKDOWN, MIME_PDF, MIME_TEXT};
    use tempfile::TempDir;

    /// Single-page PDF whose content stream draws `phrase` in Helvetica.
    /// Object offsets are computed so the xref table is valid.
    pub(crate) fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
        let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
        let mut out = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");
        let mut offsets = Vec::new();
        offsets.push(out.len());
        out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
        offsets.push(out.len());
        out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
        offsets.push(out.len());
        out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                stream.len(),
                stream
            )
            .as_bytes(),
        );
        offsets.push(out.len());
        out.extend_from_slice(
            b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
        );
        let xref_start = out.len();
        out.extend_from_slice(b"xref\n0 6\n");
        out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
        out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
        out.extend_from_slice(b"%%EOF\n");
        out
    }

    fn ingestor(tmp: &TempDir) -> Ingestor {
        Ingestor::new(tmp.path().join("data"))
    }

    #[test]
    fn staging_name_is_final_component() {
        assert_eq!(staging_file_name("spec.md").as_deref(), Some("spec.md"));
        assert_eq!(staging_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(staging_file_name("C:\\docs\\plan.txt").as_deref(), Some("plan.txt"));
        assert_eq!(staging_file_name("dir/"), None);
        assert_eq!(staging_file_name(".."), None);
        assert_eq!(staging_file_name(""), None);
    }

    #[tokio::test]
    async fn text_file_becomes_one_document() {
        let tmp = TempDir::new().unwrap();
        let ingestor = ingestor(&tmp);
        let docs = ingestor
            .ingest(&UploadedFile::new("notes.TXT", "Users log in with email."))
            .await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "Users log in with email.");
        assert_eq!(docs[0].source(), Some("notes.TXT"));
        assert_eq!(docs[0].metadata[META_CONTENT_TYPE], MIME_TEXT);
        let staged = tmp.path().join("data").join("notes.TXT");
        assert_eq!(docs[0].metadata[META_FILE_PATH], staged.display().to_string());
    }

    #[tokio::test]
    async fn markdown_file_becomes_one_document() {
        let tmp = TempDir::new().unwrap();
        let text = "# Checkout\n\n- Card number is required\n- Expiry must be in the future\n";
        let docs = ingestor(&tmp)
            .ingest(&UploadedFile::new("checkout.md", text))
            .await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, text);
        assert_eq!(docs[0].source(), Some("checkout.md"));
        assert_eq!(docs[0].metadata[META_CONTENT_TYPE], MIME_MARKDOWN);
        assert!(tmp.path().join("data").join("checkout.md").exists());
    }

    #[tokio::test]
    async fn json_is_pretty_printed() {
        let tmp = TempDir::new().unwrap();
        let docs = ingestor(&tmp)
            .ingest(&UploadedFile::new("data.json", r#"{"a":1}"#))
            .await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "{\n  \"a\": 1\n}");
        assert_eq!(docs[0].metadata[META_CONTENT_TYPE], MIME_JSON);
    }

    #[tokio::test]
    async fn pdf_yields_page_documents() {
        let tmp = TempDir::new().unwrap();
        let docs = ingestor(&tmp)
            .ingest(&UploadedFile::new("spec.pdf", minimal_pdf_with_phrase("checkout total")))
            .await;
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.contains("checkout total"));
        assert_eq!(docs[0].metadata[META_PAGE], "0");
        assert_eq!(docs[0].metadata[META_TOTAL_PAGES], "1");
        assert_eq!(docs[0].metadata[META_CONTENT_TYPE], MIME_PDF);
    }

    #[tokio::test]
    async fn docx_goes_through_generic_path() {
        let tmp = TempDir::new().unwrap();
        let docs = ingestor(&tmp)
            .ingest(&UploadedFile::new(
                "req.docx",
                docx_with_paragraphs(&["Cart holds ten items"]),
            ))
            .await;
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.contains("Cart holds ten items"));
        assert_eq!(docs[0].metadata[META_CONTENT_TYPE], MIME_DOCX);
    }

    #[tokio::test]
    async fn corrupt_files_yield_nothing_but_are_staged() {
        let tmp = TempDir::new().unwrap();
        let ingestor = ingestor(&tmp);
        for (name, bytes) in [
            ("broken.json", b"{not json".to_vec()),
            ("broken.pdf", b"%PDF-garbage".to_vec()),
            ("latin1.txt", vec![0xe9, 0x74, 0xe9]),
            ("blob.bin", vec![0u8, 1, 2, 3]),
        ] {
            let docs = ingestor.ingest(&UploadedFile::new(name, bytes.clone())).await;
            assert!(docs.is_empty(), "{} should yield nothing", name);
            let staged = std::fs::read(tmp.path().join("data").join(name)).unwrap();
            assert_eq!(staged, bytes);
        }
    }

    #[tokio::test]
    async fn blank_text_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let docs = ingestor(&tmp)
            .ingest(&UploadedFile::new("empty.md", "  \n\t"))
            .await;
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn same_name_overwrites_staged_copy() {
        let tmp = TempDir::new().unwrap();
        let ingestor = ingestor(&tmp);
        ingestor.ingest(&UploadedFile::new("a.txt", "first")).await;
        ingestor.ingest(&UploadedFile::new("dir/a.txt", "second")).await;
        let staged = std::fs::read_to_string(tmp.path().join("data").join("a.txt")).unwrap();
        assert_eq!(staged, "second");
    }
}
