use serde::{Deserialize, Serialize};

/// Coarse classification of an attachment, derived from its MIME type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Image,
    Pdf,
    Doc,
    Text,
    #[default]
    Other,
}

impl FileKind {
    pub fn from_mime(content_type: &str) -> Self {
        let ct = content_type.to_ascii_lowercase();
        if ct.starts_with("image/") {
            FileKind::Image
        } else if ct == "application/pdf" {
            FileKind::Pdf
        } else if ct == "application/msword" || ct.contains("officedocument") {
            FileKind::Doc
        } else if ct.starts_with("text/") {
            FileKind::Text
        } else {
            FileKind::Other
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileKind::Image => "image",
            FileKind::Pdf => "pdf",
            FileKind::Doc => "doc",
            FileKind::Text => "text",
            FileKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

pub const DEFAULT_FOLDER: &str = "root";

/// Attachment metadata. Embedded in a task's `files` list and also written next
/// to the blob bytes so a download can set its headers without the task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Original client-side file name.
    pub name: String,
    /// Blob key: `<millis>-<sanitised name>`.
    #[serde(rename = "filename")]
    pub key: String,
    pub url: String,
    pub content_type: String,
    pub size: u64,
    #[serde(rename = "type", default)]
    pub kind: FileKind,
    #[serde(default = "default_folder")]
    pub folder: String,
}

fn default_folder() -> String {
    DEFAULT_FOLDER.to_string()
}

/// Download path for a blob key, relative to the API root.
pub fn blob_url(key: &str) -> String {
    format!("/tasks/files/{key}")
}

/// An attachment received from a client, not yet persisted.
#[derive(Debug, Clone)]
pub struct Upload {
    pub original_name: String,
    pub content_type: String,
    pub bytes: bytes::Bytes,
}
