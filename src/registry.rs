// Durable registry of downloaded subsidy attachments. Files live under
// `<base>/<sanitized-subsidy>/<uuid>-<sanitized-name>` and the full record set
// is mirrored to `index.json` after every successful insertion.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

const INDEX_FILE_NAME: &str = "index.json";
const INDEX_VERSION: u32 = 1;
const FALLBACK_SEGMENT: &str = "file";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("attachment exceeds limit: {size} bytes (max {max})")]
    SizeLimitExceeded { size: usize, max: usize },
    #[error("attachment payload is not valid base64: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to serialize registry index: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub subsidy_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryIndex {
    version: u32,
    records: Vec<FileRecord>,
}

#[derive(Debug, Clone)]
pub struct AddAttachmentInput {
    pub subsidy_id: String,
    pub category: Option<String>,
    pub name: String,
    pub data_base64: String,
}

/// In-memory record index plus its on-disk mirror. Mutations are serialized
/// behind a single lock so two concurrent insertions cannot lose each other's
/// index entries.
pub struct FileRegistry {
    base_dir: PathBuf,
    index_path: PathBuf,
    max_bytes: usize,
    records: Mutex<HashMap<String, FileRecord>>,
}

impl FileRegistry {
    pub fn new(base_dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        let base_dir = base_dir.into();
        let index_path = base_dir.join(INDEX_FILE_NAME);
        Self {
            base_dir,
            index_path,
            max_bytes,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Reads the durable index into memory. A missing index is a first-run
    /// condition; an unparseable one is quarantined under a timestamped name
    /// and the registry starts empty. Other I/O failures propagate.
    pub async fn load_from_disk(&self) -> Result<(), RegistryError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let raw = match tokio::fs::read(&self.index_path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let parsed = match serde_json::from_slice::<RegistryIndex>(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.quarantine_index(&err).await?;
                return Ok(());
            }
        };
        let mut records = self.records.lock().await;
        records.clear();
        for record in parsed.records {
            records.insert(record.file_id.clone(), record);
        }
        info!(count = records.len(), "loaded attachment index");
        Ok(())
    }

    async fn quarantine_index(&self, err: &serde_json::Error) -> Result<(), RegistryError> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let quarantine = self.base_dir.join(format!("index.invalid-{stamp}.json"));
        warn!(
            index = %self.index_path.display(),
            quarantine = %quarantine.display(),
            "attachment index is not parseable, moving aside: {err}"
        );
        tokio::fs::rename(&self.index_path, &quarantine).await?;
        Ok(())
    }

    /// Overwrites the durable index with a complete snapshot of the in-memory
    /// set. Records are ordered by insertion time for stable diffs.
    async fn save_snapshot(
        &self,
        records: &HashMap<String, FileRecord>,
    ) -> Result<(), RegistryError> {
        let mut ordered: Vec<FileRecord> = records.values().cloned().collect();
        ordered.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        let index = RegistryIndex {
            version: INDEX_VERSION,
            records: ordered,
        };
        let payload = serde_json::to_vec_pretty(&index)?;
        tokio::fs::create_dir_all(&self.base_dir).await?;
        tokio::fs::write(&self.index_path, payload).await?;
        Ok(())
    }

    pub async fn save_to_disk(&self) -> Result<(), RegistryError> {
        let records = self.records.lock().await;
        self.save_snapshot(&records).await
    }

    /// Pure lookup; an unknown id is a normal negative result.
    pub async fn get(&self, file_id: &str) -> Option<FileRecord> {
        self.records.lock().await.get(file_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Decodes and stores one attachment. The size ceiling is checked before
    /// any directory or file is created, and the file is written before the
    /// index is updated: a crash in between leaves an orphan file, never an
    /// index entry pointing at a missing file.
    pub async fn add_attachment(
        &self,
        input: AddAttachmentInput,
    ) -> Result<FileRecord, RegistryError> {
        let bytes = BASE64.decode(input.data_base64.as_bytes())?;
        let size = bytes.len();
        if size > self.max_bytes {
            return Err(RegistryError::SizeLimitExceeded {
                size,
                max: self.max_bytes,
            });
        }

        let safe_subsidy = sanitize_file_name(&input.subsidy_id);
        let safe_name = sanitize_file_name(&input.name);
        let subsidy_dir = self.base_dir.join(&safe_subsidy);
        tokio::fs::create_dir_all(&subsidy_dir).await?;

        let file_id = uuid::Uuid::new_v4().to_string();
        let file_path = subsidy_dir.join(format!("{file_id}-{safe_name}"));
        tokio::fs::write(&file_path, &bytes).await?;

        let record = FileRecord {
            file_id: file_id.clone(),
            subsidy_id: input.subsidy_id,
            category: input.category,
            name: safe_name.clone(),
            path: file_path,
            size: size as u64,
            mime: guess_mime(&safe_name).map(str::to_string),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let mut records = self.records.lock().await;
        records.insert(file_id, record.clone());
        self.save_snapshot(&records).await?;
        Ok(record)
    }
}

/// Normalizes an untrusted identifier into one filesystem-safe path segment:
/// separators, reserved and control characters become `_`, whitespace runs
/// collapse to a single space, and an empty result gets a placeholder name.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned = reserved_chars_regex().replace_all(name, "_");
    let cleaned = whitespace_regex().replace_all(&cleaned, " ");
    let cleaned = cleaned.trim().trim_matches(['.', ' ']).replace("..", "_");
    if cleaned.is_empty() {
        FALLBACK_SEGMENT.to_string()
    } else {
        cleaned
    }
}

fn reserved_chars_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"[\\/:*?"<>|\x00-\x1f]"#).expect("invalid reserved chars regex")
    })
}

fn whitespace_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\s+").expect("invalid whitespace regex"))
}

/// Best-effort media type from a sanitized file name's extension.
pub fn guess_mime(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())?;
    let mime = match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => return None,
    };
    Some(mime)
}
