use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use super::file::{FileRecord, Upload};

/// Attachments accepted by a single create/update call.
pub const MAX_FILES_PER_REQUEST: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Category {
    Work,
    Home,
    Health,
    Errands,
    Leisure,
    #[default]
    Other,
    #[serde(rename = "")]
    Unset,
}

impl Category {
    /// Blank input (after trimming) falls back to `Other`.
    pub fn parse_or_default(raw: &str) -> anyhow::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Category::Other);
        }
        trimmed.parse()
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Work => "Work",
            Category::Home => "Home",
            Category::Health => "Health",
            Category::Errands => "Errands",
            Category::Leisure => "Leisure",
            Category::Other => "Other",
            Category::Unset => "",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Work" => Ok(Category::Work),
            "Home" => Ok(Category::Home),
            "Health" => Ok(Category::Health),
            "Errands" => Ok(Category::Errands),
            "Leisure" => Ok(Category::Leisure),
            "Other" => Ok(Category::Other),
            "" => Ok(Category::Unset),
            _ => Err(anyhow::anyhow!("Unknown category: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(anyhow::anyhow!("Unknown priority: {other}")),
        }
    }
}

/// DB row: category/priority are plain TEXT, files a JSONB array.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub priority: String,
    pub due_date: Option<DateTime<Utc>>,
    pub completed: bool,
    pub files: Json<Vec<FileRecord>>,
    pub created_by: Uuid,
    pub group_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Joined from users; absent if the creator was removed.
    pub creator_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub priority: String,
    pub due_date: Option<DateTime<Utc>>,
    pub completed: bool,
    pub files: Vec<FileRecord>,
    pub created_by: Uuid,
    pub creator_name: Option<String>,
    #[serde(rename = "group")]
    pub group_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<TaskRow> for Task {
    fn from(r: TaskRow) -> Self {
        Self {
            id: r.id,
            title: r.title,
            description: r.description,
            category: r.category,
            priority: r.priority,
            due_date: r.due_date,
            completed: r.completed,
            files: r.files.0,
            created_by: r.created_by,
            creator_name: r.creator_name,
            group_id: r.group_id,
            created_at: r.created_at,
        }
    }
}

/// Validated create input. There is deliberately no group field: the group
/// always comes from the caller's token.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub due_date: Option<DateTime<Utc>>,
    pub uploads: Vec<Upload>,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed: Option<bool>,
    pub uploads: Vec<Upload>,
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
/// Blank input means "no due date".
pub fn parse_due_date(raw: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" {
        return Ok(None);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid due date: {raw}"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid due date: {raw}"))?;
    Ok(Some(midnight.and_utc()))
}

pub fn parse_completed(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Ok(true),
        "false" | "0" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("Invalid completed flag: {other}")),
    }
}
