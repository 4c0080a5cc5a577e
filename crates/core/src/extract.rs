use std::path::Path;

use plinth_storage::FileRecord;
use snafu::{ResultExt, Snafu};
use tokio::io::AsyncReadExt;

/// Per-file cap on extracted text; one reference document never claims more
/// of the context window than this.
pub const FILE_SUMMARY_BYTE_CAP: usize = 2048;
/// PDFs contribute at most their first pages.
pub const PDF_PAGE_LIMIT: usize = 3;

#[derive(Debug, Snafu)]
pub enum DocumentParseError {
    #[snafu(display("document '{path}' could not be parsed: {details}"))]
    Malformed { path: String, details: String },
    #[snafu(display("no parser is wired in for '{path}'"))]
    ParserMissing { path: String },
}

/// Seam for the binary document parsers this platform deliberately does not
/// implement itself. Implementations return page-wise or paragraph-wise text
/// and may fail on corrupt input.
pub trait DocumentParser: Send + Sync {
    fn pdf_page_texts(
        &self,
        path: &Path,
        max_pages: usize,
    ) -> Result<Vec<String>, DocumentParseError>;

    fn word_document_paragraphs(&self, path: &Path) -> Result<Vec<String>, DocumentParseError>;
}

/// Default parser: reports every document as unparseable, so PDF and DOCX
/// summaries degrade to omission until a real parser is injected.
pub struct NoDocumentParser;

impl DocumentParser for NoDocumentParser {
    fn pdf_page_texts(
        &self,
        path: &Path,
        _max_pages: usize,
    ) -> Result<Vec<String>, DocumentParseError> {
        ParserMissingSnafu {
            path: path.display().to_string(),
        }
        .fail()
    }

    fn word_document_paragraphs(&self, path: &Path) -> Result<Vec<String>, DocumentParseError> {
        ParserMissingSnafu {
            path: path.display().to_string(),
        }
        .fail()
    }
}

#[derive(Debug, Snafu)]
pub enum SummaryError {
    #[snafu(display("failed to read uploaded file '{path}'"))]
    ReadUpload {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse uploaded document: {source}"))]
    ParseDocument {
        stage: &'static str,
        source: DocumentParseError,
    },
}

/// Handling variant for a declared file type tag. Tags accept both MIME names
/// and bare extensions, as registrations from different upload paths carry
/// either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    PlainText,
    Pdf,
    WordDocument,
    Image,
    Other,
}

fn classify(content_type: &str) -> FileKind {
    match content_type {
        "text/plain" | "txt" => FileKind::PlainText,
        "application/pdf" | "pdf" => FileKind::Pdf,
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/msword"
        | "docx"
        | "doc" => FileKind::WordDocument,
        tag if tag.starts_with("image/") => FileKind::Image,
        _ => FileKind::Other,
    }
}

/// Builds the bounded plain-text summary for one uploaded file.
///
/// Image and unknown types never touch the disk; they yield a fixed
/// placeholder naming the file.
pub async fn extract_summary(
    file: &FileRecord,
    upload_dir: &Path,
    parser: &dyn DocumentParser,
) -> Result<String, SummaryError> {
    let path = upload_dir.join(&file.stored_filename);
    let summary = match classify(&file.content_type) {
        FileKind::PlainText => {
            let content = read_text_prefix(&path, FILE_SUMMARY_BYTE_CAP).await?;
            format!("File '{}':\n{}\n", file.original_filename, content)
        }
        FileKind::Pdf => {
            let pages = parser
                .pdf_page_texts(&path, PDF_PAGE_LIMIT)
                .context(ParseDocumentSnafu {
                    stage: "summary-pdf-pages",
                })?;
            let text = truncate_to_cap(pages.concat(), FILE_SUMMARY_BYTE_CAP);
            format!("File '{}' (PDF):\n{}\n", file.original_filename, text)
        }
        FileKind::WordDocument => {
            let paragraphs =
                parser
                    .word_document_paragraphs(&path)
                    .context(ParseDocumentSnafu {
                        stage: "summary-word-paragraphs",
                    })?;
            let text = truncate_to_cap(paragraphs.join("\n"), FILE_SUMMARY_BYTE_CAP);
            format!("File '{}' (DOCX):\n{}\n", file.original_filename, text)
        }
        FileKind::Image => format!(
            "File '{}' is an image. (Image content not extracted.)\n",
            file.original_filename
        ),
        FileKind::Other => format!(
            "File '{}' is of type {}. Content extraction not supported.\n",
            file.original_filename, file.content_type
        ),
    };

    Ok(summary)
}

/// Concatenated file context for a whole project, in upload order.
///
/// Per-file failures are logged and absorbed; one unreadable file must never
/// block a chat turn. Empty when there are no files or nothing extracted.
pub async fn project_file_context(
    files: &[FileRecord],
    upload_dir: &Path,
    parser: &dyn DocumentParser,
) -> String {
    let mut summaries = Vec::with_capacity(files.len());
    for file in files {
        match extract_summary(file, upload_dir, parser).await {
            Ok(summary) => summaries.push(summary),
            Err(failure) => {
                tracing::warn!(
                    stored_filename = %file.stored_filename,
                    original_filename = %file.original_filename,
                    error = %failure,
                    "could not extract file summary, omitting it from context"
                );
            }
        }
    }

    summaries.join("\n")
}

async fn read_text_prefix(path: &Path, cap: usize) -> Result<String, SummaryError> {
    let file = tokio::fs::File::open(path).await.context(ReadUploadSnafu {
        stage: "summary-open-text",
        path: path.display().to_string(),
    })?;

    let mut prefix = Vec::with_capacity(cap);
    file.take(cap as u64)
        .read_to_end(&mut prefix)
        .await
        .context(ReadUploadSnafu {
            stage: "summary-read-text",
            path: path.display().to_string(),
        })?;

    // Invalid UTF-8 degrades to replacement characters instead of failing.
    Ok(String::from_utf8_lossy(&prefix).into_owned())
}

/// Byte-capped truncation that never splits a UTF-8 character.
fn truncate_to_cap(mut text: String, cap: usize) -> String {
    if text.len() <= cap {
        return text;
    }

    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_storage::{FileId, ProjectId};

    struct FakeParser {
        pages: Vec<String>,
    }

    impl DocumentParser for FakeParser {
        fn pdf_page_texts(
            &self,
            _path: &Path,
            max_pages: usize,
        ) -> Result<Vec<String>, DocumentParseError> {
            Ok(self.pages.iter().take(max_pages).cloned().collect())
        }

        fn word_document_paragraphs(
            &self,
            _path: &Path,
        ) -> Result<Vec<String>, DocumentParseError> {
            Ok(self.pages.clone())
        }
    }

    fn file_record(stored: &str, original: &str, content_type: &str) -> FileRecord {
        FileRecord {
            id: FileId::new_v7(),
            project_id: ProjectId::new_v7(),
            stored_filename: stored.to_string(),
            original_filename: original.to_string(),
            size_bytes: 0,
            content_type: content_type.to_string(),
            external_ref: None,
            created_at_unix_ms: 0,
        }
    }

    #[tokio::test]
    async fn text_file_is_framed_with_its_filename() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc_notes.txt"), "release checklist").unwrap();

        let record = file_record("abc_notes.txt", "notes.txt", "text/plain");
        let summary = extract_summary(&record, dir.path(), &NoDocumentParser)
            .await
            .unwrap();

        assert_eq!(summary, "File 'notes.txt':\nrelease checklist\n");
    }

    #[tokio::test]
    async fn text_file_is_capped_at_the_byte_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(5000)).unwrap();

        let record = file_record("big.txt", "big.txt", "text/plain");
        let summary = extract_summary(&record, dir.path(), &NoDocumentParser)
            .await
            .unwrap();

        let body = summary
            .strip_prefix("File 'big.txt':\n")
            .unwrap()
            .strip_suffix('\n')
            .unwrap();
        assert_eq!(body.len(), FILE_SUMMARY_BYTE_CAP);
    }

    #[tokio::test]
    async fn pdf_uses_at_most_the_first_three_pages() {
        let parser = FakeParser {
            pages: vec![
                "one ".to_string(),
                "two ".to_string(),
                "three ".to_string(),
                "four".to_string(),
            ],
        };
        let record = file_record("doc.pdf", "doc.pdf", "application/pdf");

        let summary = extract_summary(&record, Path::new("/nowhere"), &parser)
            .await
            .unwrap();

        assert!(summary.contains("one two three "));
        assert!(!summary.contains("four"));
    }

    #[tokio::test]
    async fn unsupported_and_image_types_yield_placeholders() {
        let image = file_record("p.png", "photo.png", "image/png");
        let other = file_record("a.bin", "archive.bin", "application/zip");

        let image_summary = extract_summary(&image, Path::new("/nowhere"), &NoDocumentParser)
            .await
            .unwrap();
        let other_summary = extract_summary(&other, Path::new("/nowhere"), &NoDocumentParser)
            .await
            .unwrap();

        assert_eq!(
            image_summary,
            "File 'photo.png' is an image. (Image content not extracted.)\n"
        );
        assert_eq!(
            other_summary,
            "File 'archive.bin' is of type application/zip. Content extraction not supported.\n"
        );
    }

    #[tokio::test]
    async fn missing_file_is_omitted_and_others_survive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.txt"), "still here").unwrap();

        let files = vec![
            file_record("ok.txt", "ok.txt", "text/plain"),
            file_record("gone.txt", "gone.txt", "text/plain"),
            file_record("p.png", "photo.png", "image/png"),
        ];

        let context = project_file_context(&files, dir.path(), &NoDocumentParser).await;

        assert!(context.contains("File 'ok.txt':\nstill here\n"));
        assert!(!context.contains("gone.txt"));
        assert!(context.contains("photo.png"));
        // Upload order is preserved for the surviving entries.
        let ok_at = context.find("ok.txt").unwrap();
        let photo_at = context.find("photo.png").unwrap();
        assert!(ok_at < photo_at);
    }

    #[tokio::test]
    async fn parser_failure_degrades_to_omission() {
        let files = vec![file_record("broken.pdf", "broken.pdf", "application/pdf")];
        let context = project_file_context(&files, Path::new("/nowhere"), &NoDocumentParser).await;
        assert!(context.is_empty());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(2000); // two bytes per char
        let capped = truncate_to_cap(text, FILE_SUMMARY_BYTE_CAP);
        assert!(capped.len() <= FILE_SUMMARY_BYTE_CAP);
        assert!(capped.chars().all(|c| c == 'é'));
    }

    #[test]
    fn type_tags_accept_mime_names_and_bare_extensions() {
        assert_eq!(classify("txt"), FileKind::PlainText);
        assert_eq!(classify("application/pdf"), FileKind::Pdf);
        assert_eq!(classify("doc"), FileKind::WordDocument);
        assert_eq!(classify("image/gif"), FileKind::Image);
        assert_eq!(classify("application/zip"), FileKind::Other);
    }
}
