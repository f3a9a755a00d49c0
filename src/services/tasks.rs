use axum::extract::Multipart;
use futures_util::future::try_join_all;
use sqlx::{types::Json, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::AuthenticatedUser,
        file::{FileRecord, Upload},
        task::{
            parse_completed, parse_due_date, Category, NewTask, Priority, Task, TaskPatch, TaskRow,
            MAX_FILES_PER_REQUEST,
        },
    },
    services::metrics,
    storage::{resolve_content_type, BlobStore},
};

/// Column list for TaskRow. Queries alias the task relation as `t` and join
/// the creator as `u`.
const TASK_COLS: &str = "t.id, t.title, t.description, t.category, t.priority, t.due_date,
     t.completed, t.files, t.created_by, t.group_id, t.created_at,
     u.username AS creator_name";

pub struct TaskService;

impl TaskService {
    /// Persist attachments first, then the task. The group always comes from
    /// the caller's token.
    pub async fn create(
        pool: &PgPool,
        blobs: &BlobStore,
        caller: &AuthenticatedUser,
        new: NewTask,
    ) -> AppResult<Task> {
        let files = store_all(blobs, &new.uploads).await?;

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "WITH t AS (
                INSERT INTO tasks (title, description, category, due_date, files, created_by, group_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
             )
             SELECT {TASK_COLS} FROM t LEFT JOIN users u ON u.id = t.created_by"
        ))
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.category.to_string())
        .bind(new.due_date)
        .bind(Json(&files))
        .bind(caller.user_id)
        .bind(caller.group_id)
        .fetch_one(pool)
        .await?;

        metrics::TASKS_CREATED_COUNTER.inc();
        info!(
            "Task {} created by {} in group {} with {} attachment(s)",
            row.id,
            caller.user_id,
            caller.group_id,
            files.len()
        );
        Ok(row.into())
    }

    /// Tasks of the caller's group, newest first.
    pub async fn list(pool: &PgPool, group_id: Uuid) -> AppResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLS} FROM tasks t LEFT JOIN users u ON u.id = t.created_by
             WHERE t.group_id = $1
             ORDER BY t.created_at DESC"
        ))
        .bind(group_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(Task::from).collect())
    }

    /// A task of another group is reported as absent.
    pub async fn get(pool: &PgPool, group_id: Uuid, id: Uuid) -> AppResult<Task> {
        sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLS} FROM tasks t LEFT JOIN users u ON u.id = t.created_by
             WHERE t.id = $1 AND t.group_id = $2"
        ))
        .bind(id)
        .bind(group_id)
        .fetch_optional(pool)
        .await?
        .map(Task::from)
        .ok_or_else(task_not_found)
    }

    /// Merge the provided scalar fields and append new attachments.
    pub async fn update(
        pool: &PgPool,
        blobs: &BlobStore,
        caller: &AuthenticatedUser,
        id: Uuid,
        patch: TaskPatch,
    ) -> AppResult<Task> {
        Self::ensure_exists(pool, caller.group_id, id).await?;
        let files = store_all(blobs, &patch.uploads).await?;

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "WITH t AS (
                UPDATE tasks
                SET title = COALESCE($3, title),
                    description = COALESCE($4, description),
                    priority = COALESCE($5, priority),
                    due_date = COALESCE($6, due_date),
                    completed = COALESCE($7, completed),
                    files = files || $8
                WHERE id = $1 AND group_id = $2
                RETURNING *
             )
             SELECT {TASK_COLS} FROM t LEFT JOIN users u ON u.id = t.created_by"
        ))
        .bind(id)
        .bind(caller.group_id)
        .bind(&patch.title)
        .bind(&patch.description)
        .bind(patch.priority.map(|p| p.to_string()))
        .bind(patch.due_date)
        .bind(patch.completed)
        .bind(Json(&files))
        .fetch_optional(pool)
        .await?
        .ok_or_else(task_not_found)?;

        info!("Task {} updated by {}", id, caller.user_id);
        Ok(row.into())
    }

    /// Store one file and append it to the task's attachment list.
    pub async fn add_attachment(
        pool: &PgPool,
        blobs: &BlobStore,
        caller: &AuthenticatedUser,
        id: Uuid,
        upload: Upload,
    ) -> AppResult<Task> {
        Self::ensure_exists(pool, caller.group_id, id).await?;
        let record = store_one(blobs, &upload).await?;

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "WITH t AS (
                UPDATE tasks SET files = files || $3
                WHERE id = $1 AND group_id = $2
                RETURNING *
             )
             SELECT {TASK_COLS} FROM t LEFT JOIN users u ON u.id = t.created_by"
        ))
        .bind(id)
        .bind(caller.group_id)
        .bind(Json(vec![&record]))
        .fetch_optional(pool)
        .await?
        .ok_or_else(task_not_found)?;

        info!("File {} attached to task {}", record.key, id);
        Ok(row.into())
    }

    /// Removes the record only; attachment blobs stay in the blob store
    /// until `purge-orphan-blobs` sweeps them.
    pub async fn delete(pool: &PgPool, group_id: Uuid, id: Uuid) -> AppResult<()> {
        let deleted: Option<Uuid> =
            sqlx::query_scalar("DELETE FROM tasks WHERE id = $1 AND group_id = $2 RETURNING id")
                .bind(id)
                .bind(group_id)
                .fetch_optional(pool)
                .await?;
        deleted.ok_or_else(task_not_found)?;
        info!("Task {} deleted", id);
        Ok(())
    }

    /// Every blob key referenced by any task.
    pub async fn referenced_blob_keys(pool: &PgPool) -> AppResult<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT f->>'filename'
             FROM tasks, jsonb_array_elements(files) AS f
             WHERE f ? 'filename'",
        )
        .fetch_all(pool)
        .await?;
        Ok(keys)
    }

    async fn ensure_exists(pool: &PgPool, group_id: Uuid, id: Uuid) -> AppResult<()> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = $1 AND group_id = $2)",
        )
        .bind(id)
        .bind(group_id)
        .fetch_one(pool)
        .await?;
        if exists {
            Ok(())
        } else {
            Err(task_not_found())
        }
    }

    /// Read a create form: `task` (or `title`), `description`, `category`,
    /// `dueDate` and up to five `files`. A `group` field is ignored.
    pub async fn parse_create_form(mut multipart: Multipart) -> AppResult<NewTask> {
        let mut title: Option<String> = None;
        let mut description: Option<String> = None;
        let mut category = Category::Other;
        let mut due_date = None;
        let mut uploads = Vec::new();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "files" | "files[]" => {
                    push_upload(&mut uploads, read_upload(field).await?)?;
                }
                "task" | "title" => {
                    title = Some(field.text().await?);
                }
                "description" => {
                    description = non_blank(field.text().await?);
                }
                "category" => {
                    category = Category::parse_or_default(&field.text().await?)
                        .map_err(|e| AppError::invalid(e.to_string()))?;
                }
                "dueDate" => {
                    due_date = parse_due_date(&field.text().await?)
                        .map_err(|e| AppError::invalid(e.to_string()))?;
                }
                _ => {}
            }
        }

        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::invalid("Task title is required"))?;

        Ok(NewTask {
            title,
            description,
            category,
            due_date,
            uploads,
        })
    }

    /// Read an update form: any of `title`, `description`, `priority`,
    /// `dueDate`, `completed`, plus up to five new `files`.
    pub async fn parse_update_form(mut multipart: Multipart) -> AppResult<TaskPatch> {
        let mut patch = TaskPatch::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "files" | "files[]" => {
                    push_upload(&mut patch.uploads, read_upload(field).await?)?;
                }
                "title" => {
                    let title = field.text().await?.trim().to_string();
                    if title.is_empty() {
                        return Err(AppError::invalid("Task title cannot be empty"));
                    }
                    patch.title = Some(title);
                }
                "description" => {
                    patch.description = Some(field.text().await?);
                }
                "priority" => {
                    let raw = field.text().await?;
                    if !raw.trim().is_empty() {
                        patch.priority = Some(
                            raw.parse::<Priority>()
                                .map_err(|e| AppError::invalid(e.to_string()))?,
                        );
                    }
                }
                "dueDate" => {
                    patch.due_date = parse_due_date(&field.text().await?)
                        .map_err(|e| AppError::invalid(e.to_string()))?;
                }
                "completed" => {
                    let raw = field.text().await?;
                    if !raw.trim().is_empty() {
                        patch.completed =
                            Some(parse_completed(&raw).map_err(|e| AppError::invalid(e.to_string()))?);
                    }
                }
                _ => {}
            }
        }

        Ok(patch)
    }

    /// Read the single `file` field of an attachment upload.
    pub async fn parse_single_file(mut multipart: Multipart) -> AppResult<Upload> {
        while let Some(field) = multipart.next_field().await? {
            if field.name() == Some("file") {
                return read_upload(field).await;
            }
        }
        Err(AppError::invalid("No file field in upload"))
    }
}

fn task_not_found() -> AppError {
    AppError::not_found("Task not found")
}

fn non_blank(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn push_upload(uploads: &mut Vec<Upload>, upload: Upload) -> AppResult<()> {
    if uploads.len() >= MAX_FILES_PER_REQUEST {
        return Err(AppError::invalid(format!(
            "At most {MAX_FILES_PER_REQUEST} files per request"
        )));
    }
    uploads.push(upload);
    Ok(())
}

async fn read_upload(field: axum::extract::multipart::Field<'_>) -> AppResult<Upload> {
    let original_name = field.file_name().unwrap_or("upload").to_string();
    let content_type = resolve_content_type(field.content_type(), &original_name);
    let bytes = field.bytes().await?;
    Ok(Upload {
        original_name,
        content_type,
        bytes,
    })
}

async fn store_one(blobs: &BlobStore, upload: &Upload) -> AppResult<FileRecord> {
    let record = blobs.store(upload).await?;
    metrics::BLOBS_STORED_COUNTER.inc();
    Ok(record)
}

async fn store_all(blobs: &BlobStore, uploads: &[Upload]) -> AppResult<Vec<FileRecord>> {
    try_join_all(uploads.iter().map(|u| store_one(blobs, u))).await
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, extract::FromRequest, http::Request};

    use super::*;

    const BOUNDARY: &str = "XBOUNDARYX";

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a str, &'a str),
    }

    async fn multipart(parts: &[Part<'_>]) -> Multipart {
        let mut body = String::new();
        for part in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match part {
                Part::Text(name, value) => {
                    body.push_str(&format!(
                        "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                    ));
                }
                Part::File(name, filename, ct, content) => {
                    body.push_str(&format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: {ct}\r\n\r\n{content}\r\n"
                    ));
                }
            }
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));

        let req = Request::builder()
            .method("POST")
            .uri("/tasks")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(req, &()).await.unwrap()
    }

    #[tokio::test]
    async fn create_form_defaults_blank_category_and_ignores_group() {
        let mp = multipart(&[
            Part::Text("task", "  Buy milk "),
            Part::Text("category", ""),
            Part::Text("group", "00000000-0000-0000-0000-000000000001"),
            Part::File("files", "list.txt", "text/plain", "milk, eggs"),
        ])
        .await;

        let new = TaskService::parse_create_form(mp).await.unwrap();
        assert_eq!(new.title, "Buy milk");
        assert_eq!(new.category, Category::Other);
        assert_eq!(new.description, None);
        assert_eq!(new.uploads.len(), 1);
        assert_eq!(new.uploads[0].original_name, "list.txt");
        assert_eq!(new.uploads[0].content_type, "text/plain");
        assert_eq!(&new.uploads[0].bytes[..], b"milk, eggs");
    }

    #[tokio::test]
    async fn create_form_requires_title() {
        let mp = multipart(&[Part::Text("category", "Work")]).await;
        assert!(matches!(
            TaskService::parse_create_form(mp).await,
            Err(AppError::InvalidInput(_))
        ));

        let mp = multipart(&[Part::Text("task", "   ")]).await;
        assert!(matches!(
            TaskService::parse_create_form(mp).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn create_form_rejects_unknown_category_and_bad_date() {
        let mp = multipart(&[Part::Text("task", "x"), Part::Text("category", "Chores")]).await;
        assert!(TaskService::parse_create_form(mp).await.is_err());

        let mp = multipart(&[Part::Text("task", "x"), Part::Text("dueDate", "soon")]).await;
        assert!(TaskService::parse_create_form(mp).await.is_err());
    }

    #[tokio::test]
    async fn more_than_five_files_is_rejected() {
        let files: Vec<Part> = (0..6)
            .map(|_| Part::File("files", "a.txt", "text/plain", "a"))
            .chain(std::iter::once(Part::Text("task", "x")))
            .collect();
        let mp = multipart(&files).await;
        assert!(matches!(
            TaskService::parse_create_form(mp).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn update_form_only_sets_provided_fields() {
        let mp = multipart(&[
            Part::Text("priority", "high"),
            Part::Text("completed", "true"),
            Part::File("files", "pic.png", "image/png", "PNG"),
        ])
        .await;

        let patch = TaskService::parse_update_form(mp).await.unwrap();
        assert_eq!(patch.title, None);
        assert_eq!(patch.description, None);
        assert_eq!(patch.priority, Some(Priority::High));
        assert_eq!(patch.completed, Some(true));
        assert_eq!(patch.due_date, None);
        assert_eq!(patch.uploads.len(), 1);
    }

    #[tokio::test]
    async fn update_form_rejects_blank_title_and_bad_priority() {
        let mp = multipart(&[Part::Text("title", " ")]).await;
        assert!(TaskService::parse_update_form(mp).await.is_err());

        let mp = multipart(&[Part::Text("priority", "urgent")]).await;
        assert!(TaskService::parse_update_form(mp).await.is_err());
    }

    #[tokio::test]
    async fn single_file_form() {
        let mp = multipart(&[Part::File("file", "a.pdf", "application/pdf", "%PDF")]).await;
        let upload = TaskService::parse_single_file(mp).await.unwrap();
        assert_eq!(upload.original_name, "a.pdf");

        let mp = multipart(&[Part::Text("note", "nothing attached")]).await;
        assert!(matches!(
            TaskService::parse_single_file(mp).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
