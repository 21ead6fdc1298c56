// Converts stored attachments to markdown. Every call resolves to a
// `ConvertResult`: extracted text, a base64 fallback of the raw bytes, or a
// bare warning when even reading the file fails.
use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use calamine::{Data, Reader, Xlsx};
use encoding_rs::Encoding;
use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// Outcome of a conversion attempt. At most one of `markdown` / `base64`
/// carries the answer; both absent means the file itself could not be read.
#[derive(Debug, Clone, Default)]
pub struct ConvertResult {
    pub markdown: Option<String>,
    pub base64: Option<String>,
    pub warning: Option<String>,
}

/// Formats the engine knows how to turn into text. Anything else goes
/// straight to the base64 fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Text,
    Pdf,
    Docx,
    Xlsx,
    Zip,
    Other,
}

const ARCHIVE_LEAF_EXTENSIONS: &[&str] = &["txt", "pdf", "docx", "xlsx"];

/// Converts one stored file, dispatching on its extension with the declared
/// media type as a tiebreaker. Never raises: parser failures degrade to the
/// raw-bytes fallback with a warning.
pub async fn convert_file_to_markdown(path: &Path, mime: Option<&str>) -> ConvertResult {
    let path = path.to_path_buf();
    let mime = mime.map(str::to_string);
    match tokio::task::spawn_blocking(move || convert_sync(&path, mime.as_deref())).await {
        Ok(result) => result,
        Err(err) => ConvertResult {
            warning: Some(format!("Conversion failed: {err}")),
            ..ConvertResult::default()
        },
    }
}

fn convert_sync(path: &Path, mime: Option<&str>) -> ConvertResult {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            return ConvertResult {
                warning: Some(format!("Conversion failed: {err}")),
                ..ConvertResult::default()
            }
        }
    };

    let kind = detect_kind(extension_of(path).as_deref(), mime);
    if kind == FileKind::Other {
        return fallback(&bytes, "Unsupported file type for markdown conversion");
    }

    match extract_markdown(kind, &bytes) {
        Ok(Some(markdown)) => ConvertResult {
            markdown: Some(markdown),
            ..ConvertResult::default()
        },
        // Recognized container with nothing convertible inside.
        Ok(None) => fallback(&bytes, "Unsupported file type for markdown conversion"),
        Err(err) => {
            debug!(path = %path.display(), "extraction failed: {err:#}");
            // Re-read rather than reusing the buffer: if the file vanished
            // mid-conversion the caller gets a warning-only result.
            match std::fs::read(path) {
                Ok(bytes) => fallback(&bytes, &format!("Conversion failed: {err}")),
                Err(read_err) => ConvertResult {
                    warning: Some(format!("Conversion failed: {read_err}")),
                    ..ConvertResult::default()
                },
            }
        }
    }
}

fn fallback(bytes: &[u8], warning: &str) -> ConvertResult {
    ConvertResult {
        markdown: None,
        base64: Some(BASE64.encode(bytes)),
        warning: Some(warning.to_string()),
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

fn detect_kind(extension: Option<&str>, mime: Option<&str>) -> FileKind {
    match extension {
        Some("txt") => return FileKind::Text,
        Some("pdf") => return FileKind::Pdf,
        Some("docx") => return FileKind::Docx,
        Some("xlsx") => return FileKind::Xlsx,
        Some("zip") => return FileKind::Zip,
        _ => {}
    }
    match mime.map(|value| value.trim().to_lowercase()) {
        Some(value) if value.starts_with("text/plain") => FileKind::Text,
        Some(value) if value == "application/pdf" => FileKind::Pdf,
        Some(value)
            if value
                == "application/vnd.openxmlformats-officedocument.wordprocessingml.document" =>
        {
            FileKind::Docx
        }
        Some(value)
            if value == "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" =>
        {
            FileKind::Xlsx
        }
        Some(value) if value == "application/zip" => FileKind::Zip,
        _ => FileKind::Other,
    }
}

/// `Ok(Some(text))` on success, `Ok(None)` when the format was recognized but
/// nothing convertible was found, `Err` on a parser failure.
fn extract_markdown(kind: FileKind, bytes: &[u8]) -> Result<Option<String>> {
    match kind {
        FileKind::Text => Ok(Some(convert_text(bytes))),
        FileKind::Pdf => convert_pdf(bytes).map(Some),
        FileKind::Docx => convert_docx(bytes).map(Some),
        FileKind::Xlsx => convert_xlsx(bytes, "##").map(Some),
        FileKind::Zip => expand_archive(bytes),
        FileKind::Other => Ok(None),
    }
}

fn convert_text(bytes: &[u8]) -> String {
    normalize_text(&decode_text(bytes))
}

// Attachments from Japanese agencies are occasionally Shift-JIS; try the
// usual labels before giving up to a lossy UTF-8 pass.
fn decode_text(bytes: &[u8]) -> String {
    for label in ["utf-8", "shift_jis", "euc-jp"] {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            let (decoded, _, had_errors) = encoding.decode(bytes);
            if !had_errors {
                return decoded.to_string();
            }
        }
    }
    String::from_utf8_lossy(bytes).to_string()
}

/// CRLF line endings become LF and outer whitespace is trimmed; interior
/// layout is preserved.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

fn convert_pdf(bytes: &[u8]) -> Result<String> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|err| anyhow!("pdf parse failed: {err}"))?;
    let markdown = normalize_text(&text);
    if markdown.is_empty() {
        return Err(anyhow!("pdf contains no extractable text"));
    }
    Ok(markdown)
}

fn convert_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| anyhow!("docx is not a valid container: {err}"))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|_| anyhow!("docx has no word/document.xml"))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    let paragraphs = docx_paragraphs(&xml)?;
    if paragraphs.is_empty() {
        return Err(anyhow!("docx contains no extractable text"));
    }
    Ok(normalize_text(&paragraphs.join("\n\n")))
}

/// Raw paragraph text from the WordprocessingML body: `w:t` runs concatenate
/// within a paragraph, `w:tab` and `w:br` become whitespace.
fn docx_paragraphs(xml: &str) -> Result<Vec<String>> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()) {
                b"p" => current.clear(),
                b"t" => in_text = true,
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match local_name(e.name().as_ref()) {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text {
                    if let Ok(text) = e.unescape() {
                        current.push_str(text.as_ref());
                    }
                }
            }
            Ok(Event::End(ref e)) => match local_name(e.name().as_ref()) {
                b"t" => in_text = false,
                b"p" => {
                    let text = current.trim();
                    if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(anyhow!("docx xml parse failed: {err}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// Renders every sheet of a workbook as a pipe table under a heading at the
/// given level, in workbook order. Sheets with an empty grid contribute
/// nothing, heading included.
fn convert_xlsx(bytes: &[u8], heading: &str) -> Result<String> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))
        .map_err(|err| anyhow!("spreadsheet open failed: {err}"))?;
    let sheet_names = workbook.sheet_names().to_owned();
    let mut blocks = Vec::new();
    for name in sheet_names {
        if let Ok(range) = workbook.worksheet_range(&name) {
            let rows: Vec<Vec<String>> = range
                .rows()
                .map(|row| row.iter().map(|cell| normalize_cell(&cell_value(cell))).collect())
                .collect();
            let table = render_table(&rows);
            if table.is_empty() {
                continue;
            }
            blocks.push(format!("{heading} {name}\n\n{table}"));
        }
    }
    if blocks.is_empty() {
        return Err(anyhow!("spreadsheet contains no extractable text"));
    }
    Ok(blocks.join("\n\n"))
}

/// Spreadsheet cell shapes, tagged once at the ingestion boundary so the
/// normalizer never inspects library types.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    /// Textual content; line breaks collapse to a single space on display.
    Text(String),
    /// Canonical textual representation of a non-text scalar.
    Scalar(String),
    /// Rich-text runs, concatenated in order with no separator.
    RichText(Vec<String>),
    /// A hyperlink with a display label, rendered as `label (url)`.
    Hyperlink { label: String, url: String },
    /// Anything else; passes through the generic textual coercion.
    Opaque(String),
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(text) => CellValue::Text(text.clone()),
        other => CellValue::Scalar(other.to_string()),
    }
}

/// Reduces any cell shape to a single display string.
pub fn normalize_cell(value: &CellValue) -> String {
    match value {
        CellValue::Empty => String::new(),
        CellValue::Text(text) | CellValue::Opaque(text) => coerce_text(text),
        CellValue::Scalar(repr) => repr.clone(),
        CellValue::RichText(runs) => coerce_text(&runs.concat()),
        CellValue::Hyperlink { label, url } => coerce_text(&format!("{label} ({url})")),
    }
}

fn coerce_text(text: &str) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                collapsed.push(' ');
            }
            '\n' => collapsed.push(' '),
            _ => collapsed.push(ch),
        }
    }
    collapsed.trim().to_string()
}

/// Pipe-delimited table: row 0 is the header, followed by a `---` separator
/// row matching the header's column count, then the body rows. An empty grid
/// renders as empty text.
pub fn render_table(rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let separator: Vec<String> = rows[0].iter().map(|_| "---".to_string()).collect();
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(render_row(&rows[0]));
    lines.push(render_row(&separator));
    for row in &rows[1..] {
        lines.push(render_row(row));
    }
    lines.join("\n")
}

fn render_row(row: &[String]) -> String {
    format!("| {} |", row.join(" | "))
}

/// Walks the first-level entries of a zip container and converts each
/// supported one with the matching single-file extractor. Nested archives are
/// not descended into. `Ok(None)` when no entry produced a section.
fn expand_archive(bytes: &[u8]) -> Result<Option<String>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| anyhow!("zip open failed: {err}"))?;
    let mut sections = Vec::new();
    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(err) => {
                debug!("skipping unreadable zip entry {i}: {err}");
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let Some(ext) = name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()) else {
            continue;
        };
        if !ARCHIVE_LEAF_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        let mut entry_bytes = Vec::new();
        if entry.read_to_end(&mut entry_bytes).is_err() {
            continue;
        }
        let converted = match ext.as_str() {
            "txt" => Ok(convert_text(&entry_bytes)),
            "pdf" => convert_pdf(&entry_bytes),
            "docx" => convert_docx(&entry_bytes),
            // Sheet headings nest one level below the entry heading.
            "xlsx" => convert_xlsx(&entry_bytes, "###"),
            _ => unreachable!("extension filtered above"),
        };
        match converted {
            Ok(body) => sections.push(format!("## {name}\n\n{body}")),
            Err(err) => debug!("skipping zip entry {name}: {err:#}"),
        }
    }
    if sections.is_empty() {
        return Ok(None);
    }
    Ok(Some(sections.join("\n\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_converts_crlf_and_trims() {
        assert_eq!(normalize_text("  a\r\nb\r\n"), "a\nb");
        assert_eq!(normalize_text("plain"), "plain");
        assert_eq!(normalize_text("\r\n\r\n"), "");
    }

    #[test]
    fn render_table_matches_expected_layout() {
        let grid = vec![
            vec!["A".to_string(), "B".to_string()],
            vec!["1".to_string(), "2".to_string()],
        ];
        assert_eq!(render_table(&grid), "| A | B |\n| --- | --- |\n| 1 | 2 |");
    }

    #[test]
    fn render_table_empty_grid_is_empty_text() {
        assert_eq!(render_table(&[]), "");
    }

    #[test]
    fn cells_normalize_by_shape() {
        assert_eq!(normalize_cell(&CellValue::Empty), "");
        assert_eq!(normalize_cell(&CellValue::Text(" a\r\nb ".to_string())), "a b");
        assert_eq!(normalize_cell(&CellValue::Scalar("42".to_string())), "42");
        assert_eq!(
            normalize_cell(&CellValue::RichText(vec![
                "補助".to_string(),
                "金".to_string()
            ])),
            "補助金"
        );
        assert_eq!(
            normalize_cell(&CellValue::Hyperlink {
                label: "portal".to_string(),
                url: "https://jgrants-portal.go.jp".to_string(),
            }),
            "portal (https://jgrants-portal.go.jp)"
        );
        assert_eq!(
            normalize_cell(&CellValue::Opaque("x\ny".to_string())),
            "x y"
        );
    }

    #[test]
    fn kind_detection_prefers_extension_then_mime() {
        assert_eq!(detect_kind(Some("pdf"), None), FileKind::Pdf);
        assert_eq!(detect_kind(Some("bin"), Some("text/plain")), FileKind::Text);
        assert_eq!(
            detect_kind(None, Some("application/zip")),
            FileKind::Zip
        );
        assert_eq!(detect_kind(Some("exe"), Some("application/octet-stream")), FileKind::Other);
        assert_eq!(detect_kind(None, None), FileKind::Other);
    }

    #[test]
    fn docx_paragraph_extraction_reads_runs() {
        let xml = r#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>補助金の</w:t></w:r><w:r><w:t>概要</w:t></w:r></w:p>
                <w:p><w:r><w:t>second</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;
        let paragraphs = docx_paragraphs(xml).unwrap();
        assert_eq!(paragraphs, vec!["補助金の概要".to_string(), "second".to_string()]);
    }
}
