use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jgrants_mcp::convert::convert_file_to_markdown;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::ZipWriter;

fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn build_docx(body_xml: &str) -> Vec<u8> {
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>{body_xml}</w:body>
</w:document>"#
    );
    build_zip(&[
        (
            "[Content_Types].xml",
            br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#
                .as_slice(),
        ),
        ("word/document.xml", document.as_bytes()),
    ])
}

#[tokio::test]
async fn text_conversion_normalizes_crlf_and_trims() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "sample.txt", b"  hello\r\nworld\r\n");

    let result = convert_file_to_markdown(&path, None).await;
    assert_eq!(result.markdown.as_deref(), Some("hello\nworld"));
    assert!(result.base64.is_none());
    assert!(result.warning.is_none());
}

#[tokio::test]
async fn mime_hint_covers_missing_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "README", b"plain body");

    let result = convert_file_to_markdown(&path, Some("text/plain")).await;
    assert_eq!(result.markdown.as_deref(), Some("plain body"));
}

#[tokio::test]
async fn unsupported_format_falls_back_to_original_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let original = [0x01u8, 0x02, 0x03, 0xff];
    let path = write_file(dir.path(), "sample.bin", &original);

    let result = convert_file_to_markdown(&path, None).await;
    assert!(result.markdown.is_none());
    let warning = result.warning.expect("fallback carries a warning");
    assert!(!warning.is_empty());
    let decoded = BASE64.decode(result.base64.unwrap()).unwrap();
    assert_eq!(decoded, original);
}

#[tokio::test]
async fn unreadable_file_yields_warning_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.pdf");

    let result = convert_file_to_markdown(&path, None).await;
    assert!(result.markdown.is_none());
    assert!(result.base64.is_none());
    assert!(result.warning.is_some());
}

#[tokio::test]
async fn docx_extracts_paragraph_text() {
    let dir = tempfile::tempdir().unwrap();
    let docx = build_docx(
        "<w:p><w:r><w:t>公募要領</w:t></w:r></w:p>\
         <w:p><w:r><w:t>申請は電子申請のみ</w:t></w:r></w:p>",
    );
    let path = write_file(dir.path(), "guide.docx", &docx);

    let result = convert_file_to_markdown(&path, None).await;
    let markdown = result.markdown.unwrap();
    assert_eq!(markdown, "公募要領\n\n申請は電子申請のみ");
    assert!(result.warning.is_none());
}

#[tokio::test]
async fn corrupt_docx_degrades_to_base64_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    let bogus = b"not a zip container at all";
    let path = write_file(dir.path(), "broken.docx", bogus);

    let result = convert_file_to_markdown(&path, None).await;
    assert!(result.markdown.is_none());
    assert!(result.warning.unwrap().starts_with("Conversion failed"));
    let decoded = BASE64.decode(result.base64.unwrap()).unwrap();
    assert_eq!(decoded, bogus);
}

#[tokio::test]
async fn archive_keeps_supported_entries_and_skips_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let zip = build_zip(&[
        ("docs/overview.txt", b"first line\r\nsecond line".as_slice()),
        ("tool.exe", &[0x4du8, 0x5a, 0x00]),
    ]);
    let path = write_file(dir.path(), "bundle.zip", &zip);

    let result = convert_file_to_markdown(&path, None).await;
    let markdown = result.markdown.unwrap();
    assert_eq!(markdown, "## docs/overview.txt\n\nfirst line\nsecond line");
    assert!(!markdown.contains("tool.exe"));
    assert!(result.base64.is_none());
}

#[tokio::test]
async fn archive_with_docx_entry_produces_section_per_entry() {
    let dir = tempfile::tempdir().unwrap();
    let docx = build_docx("<w:p><w:r><w:t>entry body</w:t></w:r></w:p>");
    let zip = build_zip(&[
        ("readme.txt", b"top".as_slice()),
        ("forms/entry.docx", &docx),
    ]);
    let path = write_file(dir.path(), "bundle.zip", &zip);

    let markdown = convert_file_to_markdown(&path, None).await.markdown.unwrap();
    assert!(markdown.contains("## readme.txt\n\ntop"));
    assert!(markdown.contains("## forms/entry.docx\n\nentry body"));
}

#[tokio::test]
async fn archive_without_supported_entries_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let zip = build_zip(&[("image.png", [0x89u8, 0x50, 0x4e, 0x47].as_slice())]);
    let path = write_file(dir.path(), "images.zip", &zip);

    let result = convert_file_to_markdown(&path, None).await;
    assert!(result.markdown.is_none());
    assert!(result.warning.is_some());
    let decoded = BASE64.decode(result.base64.unwrap()).unwrap();
    assert_eq!(decoded, zip);
}
