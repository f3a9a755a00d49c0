use std::collections::HashMap;

use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        group::{CreateGroupRequest, Group, GroupRow, Member, DEFAULT_GROUP_NAME},
        user::GroupSummary,
    },
};

const GROUP_COLS: &str = "id, name, members, current_project, created_at";

pub struct GroupService;

impl GroupService {
    pub async fn list(pool: &PgPool) -> AppResult<Vec<Group>> {
        let rows = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {GROUP_COLS} FROM groups ORDER BY created_at"
        ))
        .fetch_all(pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().flat_map(|g| g.members.iter().copied()).collect();
        let names = resolve_usernames(pool, &ids).await?;
        Ok(rows.into_iter().map(|row| with_members(row, &names)).collect())
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> AppResult<Group> {
        let row = Self::find_row(pool, id).await?;
        Self::resolve(pool, row).await
    }

    /// Create a group with the caller as its first (and only) member.
    pub async fn create(
        pool: &PgPool,
        creator: Uuid,
        req: &CreateGroupRequest,
    ) -> AppResult<Group> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AppError::invalid("Group name is required"));
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM groups WHERE name = $1)")
            .bind(name)
            .fetch_one(pool)
            .await?;
        if exists {
            return Err(AppError::Conflict("Group name already exists".into()));
        }

        let project = req
            .current_project
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let row = sqlx::query_as::<_, GroupRow>(&format!(
            "INSERT INTO groups (name, members, current_project)
             VALUES ($1, ARRAY[$2]::UUID[], $3)
             RETURNING {GROUP_COLS}"
        ))
        .bind(name)
        .bind(creator)
        .bind(project)
        .fetch_one(pool)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::Conflict(_) => AppError::Conflict("Group name already exists".into()),
            other => other,
        })?;

        info!("Group {} ({}) created by {}", row.name, row.id, creator);
        Self::resolve(pool, row).await
    }

    /// Add the caller to the group. Joining twice is a no-op.
    /// The caller's affiliation moves to this group; the token scope follows
    /// on the next login.
    pub async fn join(pool: &PgPool, id: Uuid, user_id: Uuid) -> AppResult<Group> {
        sqlx::query(
            "UPDATE groups SET members = array_append(members, $2)
             WHERE id = $1 AND NOT ($2 = ANY(members))",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

        let row = Self::find_row(pool, id).await?;

        sqlx::query("UPDATE users SET group_id = $1 WHERE id = $2")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?;

        Self::resolve(pool, row).await
    }

    /// Remove the caller from the group. Leaving a group one is not in is a
    /// no-op. Leaving one's affiliated group falls back to the Default Group.
    pub async fn leave(pool: &PgPool, id: Uuid, user_id: Uuid) -> AppResult<Group> {
        sqlx::query("UPDATE groups SET members = array_remove(members, $2) WHERE id = $1")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?;

        let row = Self::find_row(pool, id).await?;

        let default_group = Self::ensure_default(pool).await?;
        sqlx::query("UPDATE users SET group_id = $1 WHERE id = $2 AND group_id = $3")
            .bind(default_group.id)
            .bind(user_id)
            .bind(id)
            .execute(pool)
            .await?;

        Self::resolve(pool, row).await
    }

    /// Only the creator (first member) may delete. Tasks of the group are
    /// left in place.
    pub async fn delete(pool: &PgPool, id: Uuid, user_id: Uuid) -> AppResult<()> {
        let row = Self::find_row(pool, id).await?;
        if !row.can_delete(user_id) {
            return Err(AppError::Forbidden("Only group creator can delete".into()));
        }

        sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        info!("Group {} ({}) deleted by {}", row.name, id, user_id);
        Ok(())
    }

    pub async fn set_project(pool: &PgPool, id: Uuid, label: &str) -> AppResult<Group> {
        let label = label.trim();
        if label.is_empty() {
            return Err(AppError::invalid("Project name required"));
        }
        Self::update_project(pool, id, Some(label)).await
    }

    pub async fn clear_project(pool: &PgPool, id: Uuid) -> AppResult<Group> {
        Self::update_project(pool, id, None).await
    }

    /// Fetch the Default Group, creating it on first use.
    pub async fn ensure_default(pool: &PgPool) -> AppResult<GroupRow> {
        sqlx::query("INSERT INTO groups (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(DEFAULT_GROUP_NAME)
            .execute(pool)
            .await?;

        let row = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {GROUP_COLS} FROM groups WHERE name = $1"
        ))
        .bind(DEFAULT_GROUP_NAME)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn summary(pool: &PgPool, id: Uuid) -> AppResult<Option<GroupSummary>> {
        let group = sqlx::query_as::<_, GroupSummary>("SELECT id, name FROM groups WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(group)
    }

    async fn update_project(pool: &PgPool, id: Uuid, label: Option<&str>) -> AppResult<Group> {
        let row = sqlx::query_as::<_, GroupRow>(&format!(
            "UPDATE groups SET current_project = $2 WHERE id = $1 RETURNING {GROUP_COLS}"
        ))
        .bind(id)
        .bind(label)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Group not found"))?;
        Self::resolve(pool, row).await
    }

    async fn find_row(pool: &PgPool, id: Uuid) -> AppResult<GroupRow> {
        sqlx::query_as::<_, GroupRow>(&format!("SELECT {GROUP_COLS} FROM groups WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Group not found"))
    }

    async fn resolve(pool: &PgPool, row: GroupRow) -> AppResult<Group> {
        let names = resolve_usernames(pool, &row.members).await?;
        Ok(with_members(row, &names))
    }
}

async fn resolve_usernames(pool: &PgPool, ids: &[Uuid]) -> AppResult<HashMap<Uuid, String>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let members = sqlx::query_as::<_, Member>("SELECT id, username FROM users WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(pool)
        .await?;
    Ok(members.into_iter().map(|m| (m.id, m.username)).collect())
}

/// Keep member order; ids without a matching user are dropped.
fn with_members(row: GroupRow, names: &HashMap<Uuid, String>) -> Group {
    let members = row
        .members
        .iter()
        .filter_map(|id| {
            names.get(id).map(|username| Member {
                id: *id,
                username: username.clone(),
            })
        })
        .collect();
    Group {
        id: row.id,
        name: row.name,
        members,
        current_project: row.current_project,
        created_at: row.created_at,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn members_keep_creator_first() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let ghost = Uuid::new_v4();
        let names = HashMap::from([(alice, "alice".to_string()), (bob, "bob".to_string())]);
        let row = GroupRow {
            id: Uuid::new_v4(),
            name: "Eng".into(),
            members: vec![alice, ghost, bob],
            current_project: Some("Launch".into()),
            created_at: Utc::now(),
        };

        let group = with_members(row, &names);
        let usernames: Vec<_> = group.members.iter().map(|m| m.username.as_str()).collect();
        assert_eq!(usernames, ["alice", "bob"]);
        assert_eq!(group.current_project.as_deref(), Some("Launch"));
    }

    #[tokio::test]
    async fn blank_names_and_labels_are_rejected_up_front() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();

        let req = CreateGroupRequest {
            name: "  ".into(),
            current_project: None,
        };
        assert!(matches!(
            GroupService::create(&pool, Uuid::new_v4(), &req).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            GroupService::set_project(&pool, Uuid::new_v4(), " ").await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
