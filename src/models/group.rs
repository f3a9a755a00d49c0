use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const DEFAULT_GROUP_NAME: &str = "Default Group";

/// DB row. `members` is ordered: the first entry is the creator.
#[derive(Debug, Clone, FromRow)]
pub struct GroupRow {
    pub id: Uuid,
    pub name: String,
    pub members: Vec<Uuid>,
    pub current_project: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl GroupRow {
    pub fn creator(&self) -> Option<Uuid> {
        self.members.first().copied()
    }

    /// Only the creator may delete. A group without members has no creator,
    /// so nobody may delete it.
    pub fn can_delete(&self, user_id: Uuid) -> bool {
        self.creator() == Some(user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct Member {
    pub id: Uuid,
    pub username: String,
}

/// Group with member ids resolved to display names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub members: Vec<Member>,
    pub current_project: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub name: String,
    pub current_project: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetProjectRequest {
    #[serde(default)]
    pub project_name: String,
}
