use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder, Response,
};
use serde::{de::DeserializeOwned, Deserialize};
use uuid::Uuid;

use super::cache::{CachedTask, TaskCache};
use crate::models::{
    file::Upload,
    group::{CreateGroupRequest, Group, SetProjectRequest},
    task::{NewTask, Task, TaskPatch},
    user::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, UserProfile},
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Non-2xx answer; `message` is the server's `error` field when present.
    #[error("{status}: {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("local cache: {0}")]
    Cache(#[from] anyhow::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct ProfileEnvelope {
    user: UserProfile,
}

#[derive(Deserialize)]
struct GroupEnvelope {
    group: Group,
}

#[derive(Deserialize)]
struct TaskEnvelope {
    task: Task,
}

#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Typed HTTP client for the task board API.
///
/// Holds the bearer token after `login`. Mutations that have a local
/// counterpart go through `submit_task`/`refetch_tasks`, which touch the
/// cache only once the server has answered with success.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn logout(&mut self) {
        self.token = None;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> ClientResult<T> {
        let response = self.checked(req).await?;
        Ok(response.json().await?)
    }

    async fn checked(&self, req: RequestBuilder) -> ClientResult<Response> {
        let response = self.authorized(req).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or_else(|_| {
                if text.is_empty() {
                    status.canonical_reason().unwrap_or("Request failed").to_string()
                } else {
                    text
                }
            });
        tracing::debug!("API error {}: {}", status, message);
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    // Auth

    pub async fn register(&self, username: &str, password: &str) -> ClientResult<RegisterResponse> {
        let body = RegisterRequest {
            username: username.into(),
            password: password.into(),
            email: None,
        };
        self.send(self.http.post(self.url("/auth/register")).json(&body))
            .await
    }

    /// Log in and keep the returned token for subsequent calls.
    pub async fn login(&mut self, username: &str, password: &str) -> ClientResult<LoginResponse> {
        let body = LoginRequest {
            username: username.into(),
            password: password.into(),
        };
        let response: LoginResponse = self
            .send(self.http.post(self.url("/auth/login")).json(&body))
            .await?;
        self.token = Some(response.token.clone());
        Ok(response)
    }

    pub async fn me(&self) -> ClientResult<UserProfile> {
        let envelope: ProfileEnvelope = self.send(self.http.get(self.url("/auth/me"))).await?;
        Ok(envelope.user)
    }

    // Groups

    pub async fn list_groups(&self) -> ClientResult<Vec<Group>> {
        self.send(self.http.get(self.url("/groups"))).await
    }

    pub async fn get_group(&self, id: Uuid) -> ClientResult<Group> {
        self.send(self.http.get(self.url(&format!("/groups/{id}"))))
            .await
    }

    pub async fn create_group(&self, name: &str, project: Option<&str>) -> ClientResult<Group> {
        let body = CreateGroupRequest {
            name: name.into(),
            current_project: project.map(String::from),
        };
        self.send(self.http.post(self.url("/groups")).json(&body))
            .await
    }

    pub async fn join_group(&self, id: Uuid) -> ClientResult<Group> {
        self.send(self.http.put(self.url(&format!("/groups/{id}/join"))))
            .await
    }

    pub async fn leave_group(&self, id: Uuid) -> ClientResult<Group> {
        let envelope: GroupEnvelope = self
            .send(self.http.put(self.url(&format!("/groups/{id}/leave"))))
            .await?;
        Ok(envelope.group)
    }

    pub async fn set_project(&self, id: Uuid, project_name: &str) -> ClientResult<Group> {
        let body = SetProjectRequest {
            project_name: project_name.into(),
        };
        self.send(
            self.http
                .put(self.url(&format!("/groups/{id}/project")))
                .json(&body),
        )
        .await
    }

    pub async fn clear_project(&self, id: Uuid) -> ClientResult<Group> {
        let envelope: GroupEnvelope = self
            .send(self.http.delete(self.url(&format!("/groups/{id}/project"))))
            .await?;
        Ok(envelope.group)
    }

    pub async fn delete_group(&self, id: Uuid) -> ClientResult<MessageResponse> {
        self.send(self.http.delete(self.url(&format!("/groups/{id}"))))
            .await
    }

    // Tasks

    pub async fn create_task(&self, task: NewTask) -> ClientResult<Task> {
        let mut form = Form::new()
            .text("task", task.title)
            .text("category", task.category.to_string());
        if let Some(description) = task.description {
            form = form.text("description", description);
        }
        if let Some(due) = task.due_date {
            form = form.text("dueDate", due.to_rfc3339());
        }
        for upload in task.uploads {
            form = form.part("files", file_part(upload)?);
        }
        self.send(self.http.post(self.url("/tasks")).multipart(form))
            .await
    }

    pub async fn list_tasks(&self) -> ClientResult<Vec<Task>> {
        self.send(self.http.get(self.url("/tasks"))).await
    }

    pub async fn get_task(&self, id: Uuid) -> ClientResult<Task> {
        self.send(self.http.get(self.url(&format!("/tasks/{id}"))))
            .await
    }

    pub async fn update_task(&self, id: Uuid, patch: TaskPatch) -> ClientResult<Task> {
        let mut form = Form::new();
        if let Some(title) = patch.title {
            form = form.text("title", title);
        }
        if let Some(description) = patch.description {
            form = form.text("description", description);
        }
        if let Some(priority) = patch.priority {
            form = form.text("priority", priority.to_string());
        }
        if let Some(due) = patch.due_date {
            form = form.text("dueDate", due.to_rfc3339());
        }
        if let Some(completed) = patch.completed {
            form = form.text("completed", completed.to_string());
        }
        for upload in patch.uploads {
            form = form.part("files", file_part(upload)?);
        }
        self.send(
            self.http
                .put(self.url(&format!("/tasks/{id}")))
                .multipart(form),
        )
        .await
    }

    pub async fn delete_task(&self, id: Uuid) -> ClientResult<MessageResponse> {
        self.send(self.http.delete(self.url(&format!("/tasks/{id}"))))
            .await
    }

    pub async fn upload_file(&self, task_id: Uuid, upload: Upload) -> ClientResult<Task> {
        let form = Form::new().part("file", file_part(upload)?);
        let envelope: TaskEnvelope = self
            .send(
                self.http
                    .post(self.url(&format!("/tasks/{task_id}/files")))
                    .multipart(form),
            )
            .await?;
        Ok(envelope.task)
    }

    /// Fetch blob bytes. Accepts either a bare key or a `/tasks/files/...` url.
    pub async fn download_file(&self, key_or_url: &str) -> ClientResult<bytes::Bytes> {
        let path = if key_or_url.starts_with('/') {
            key_or_url.to_string()
        } else {
            crate::models::file::blob_url(key_or_url)
        };
        let response = self.checked(self.http.get(self.url(&path))).await?;
        Ok(response.bytes().await?)
    }

    // Cache-mirroring calls

    /// Create the task on the server, then mirror the returned record.
    /// A failed request leaves the cache untouched.
    pub async fn submit_task(
        &self,
        cache: &mut TaskCache,
        task: NewTask,
        project_id: Option<String>,
    ) -> ClientResult<Task> {
        let created = self.create_task(task).await?;
        cache.add_task(CachedTask::from_server(&created, project_id))?;
        Ok(created)
    }

    /// Replace the cached task list with the server's listing.
    pub async fn refetch_tasks(&self, cache: &mut TaskCache) -> ClientResult<Vec<Task>> {
        let tasks = self.list_tasks().await?;
        cache.replace_tasks(&tasks)?;
        Ok(tasks)
    }

    /// Delete on the server, then drop the cached copy.
    pub async fn remove_task(&self, cache: &mut TaskCache, id: Uuid) -> ClientResult<()> {
        self.delete_task(id).await?;
        cache.delete_task(&id.to_string())?;
        Ok(())
    }

    /// Flip completion on the server and mirror the new state.
    pub async fn toggle_task(&self, cache: &mut TaskCache, id: Uuid) -> ClientResult<Task> {
        let current = self.get_task(id).await?;
        let patch = TaskPatch {
            completed: Some(!current.completed),
            ..Default::default()
        };
        let updated = self.update_task(id, patch).await?;
        let key = id.to_string();
        if cache.task(&key).map(|t| t.completed) != Some(updated.completed) {
            cache.toggle_task_completion(&key)?;
        }
        Ok(updated)
    }
}

fn file_part(upload: Upload) -> ClientResult<Part> {
    let part = Part::bytes(upload.bytes.to_vec())
        .file_name(upload.original_name)
        .mime_str(&upload.content_type)?;
    Ok(part)
}

