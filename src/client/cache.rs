//! Local, file-persisted mirror of tasks and projects.
//!
//! The cache is a projection, never a source of truth: the API client writes
//! into it only after the server accepted a change, and a full refetch
//! replaces the task list wholesale. Projects exist only here; the server
//! knows nothing but the group's free-text current-project label.

use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::task::Task;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedFile {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub files: Vec<CachedFile>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl CachedTask {
    /// Mirror of a record the server returned. `project_id` is client-only.
    pub fn from_server(task: &Task, project_id: Option<String>) -> Self {
        let folders: BTreeSet<String> = task.files.iter().map(|f| f.folder.clone()).collect();
        Self {
            id: task.id.to_string(),
            title: task.title.clone(),
            category: task.category.clone(),
            project_id,
            files: task
                .files
                .iter()
                .map(|f| CachedFile {
                    name: f.name.clone(),
                    path: f.url.clone(),
                    content_type: f.content_type.clone(),
                    size: f.size,
                })
                .collect(),
            folders: folders.into_iter().collect(),
            completed: task.completed,
            created_at: task.created_at,
            due_date: task.due_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskFilter {
    #[default]
    All,
    Completed,
    Uncompleted,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    tasks: Vec<CachedTask>,
    #[serde(default)]
    projects: Vec<Project>,
}

pub struct TaskCache {
    path: PathBuf,
    snapshot: Snapshot,
}

impl TaskCache {
    /// Load from `path`. A missing or unreadable file yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Discarding unreadable cache {}: {}", path.display(), e);
                Snapshot::default()
            }),
            Err(_) => Snapshot::default(),
        };
        Self { path, snapshot }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tasks(&self) -> &[CachedTask] {
        &self.snapshot.tasks
    }

    pub fn projects(&self) -> &[Project] {
        &self.snapshot.projects
    }

    pub fn task(&self, id: &str) -> Option<&CachedTask> {
        self.snapshot.tasks.iter().find(|t| t.id == id)
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.snapshot.projects.iter().find(|p| p.id == id)
    }

    pub fn add_task(&mut self, task: CachedTask) -> anyhow::Result<()> {
        let project_id = task.project_id.clone();
        self.snapshot.tasks.push(task);
        if let Some(pid) = project_id {
            self.recompute_project(&pid);
        }
        self.save()
    }

    pub fn delete_task(&mut self, id: &str) -> anyhow::Result<()> {
        let project_id = self.task(id).and_then(|t| t.project_id.clone());
        self.snapshot.tasks.retain(|t| t.id != id);
        if let Some(pid) = project_id {
            self.recompute_project(&pid);
        }
        self.save()
    }

    pub fn toggle_task_completion(&mut self, id: &str) -> anyhow::Result<()> {
        let mut project_id = None;
        if let Some(task) = self.snapshot.tasks.iter_mut().find(|t| t.id == id) {
            task.completed = !task.completed;
            project_id = task.project_id.clone();
        }
        if let Some(pid) = project_id {
            self.recompute_project(&pid);
        }
        self.save()
    }

    pub fn complete_all(&mut self) -> anyhow::Result<()> {
        for task in &mut self.snapshot.tasks {
            task.completed = true;
        }
        let project_ids: BTreeSet<String> = self
            .snapshot
            .tasks
            .iter()
            .filter_map(|t| t.project_id.clone())
            .collect();
        for pid in project_ids {
            self.recompute_project(&pid);
        }
        self.save()
    }

    /// Tasks matching `filter`, optionally only those created after `after`.
    pub fn filter_tasks(&self, filter: TaskFilter, after: Option<DateTime<Utc>>) -> Vec<&CachedTask> {
        self.snapshot
            .tasks
            .iter()
            .filter(|t| match filter {
                TaskFilter::All => true,
                TaskFilter::Completed => t.completed,
                TaskFilter::Uncompleted => !t.completed,
            })
            .filter(|t| after.map_or(true, |a| t.created_at > a))
            .collect()
    }

    pub fn add_project(&mut self, id: Option<String>, name: &str) -> anyhow::Result<Project> {
        let name = name.trim();
        let project = Project {
            id: id.unwrap_or_else(|| Utc::now().timestamp_millis().to_string()),
            name: if name.is_empty() { "Untitled Project".into() } else { name.into() },
            completed: false,
        };
        self.snapshot.projects.push(project.clone());
        self.recompute_project(&project.id);
        self.save()?;
        Ok(self.project(&project.id).cloned().unwrap_or(project))
    }

    /// Remove the project and detach its tasks.
    pub fn delete_project(&mut self, id: &str) -> anyhow::Result<()> {
        self.snapshot.projects.retain(|p| p.id != id);
        for task in &mut self.snapshot.tasks {
            if task.project_id.as_deref() == Some(id) {
                task.project_id = None;
            }
        }
        self.save()
    }

    pub fn update_project_completion(&mut self, id: &str) -> anyhow::Result<()> {
        self.recompute_project(id);
        self.save()
    }

    /// Replace the task list with a fresh server listing, keeping the
    /// client-only project assignment of tasks that were already cached.
    pub fn replace_tasks(&mut self, server: &[Task]) -> anyhow::Result<()> {
        let assignments: HashMap<String, String> = self
            .snapshot
            .tasks
            .iter()
            .filter_map(|t| t.project_id.clone().map(|p| (t.id.clone(), p)))
            .collect();

        self.snapshot.tasks = server
            .iter()
            .map(|t| {
                let pid = assignments.get(&t.id.to_string()).cloned();
                CachedTask::from_server(t, pid)
            })
            .collect();

        let ids: Vec<String> = self.snapshot.projects.iter().map(|p| p.id.clone()).collect();
        for pid in ids {
            self.recompute_project(&pid);
        }
        self.save()
    }

    /// Completed iff the project has at least one task and all are done.
    fn recompute_project(&mut self, id: &str) {
        let mut tasks = self
            .snapshot
            .tasks
            .iter()
            .filter(|t| t.project_id.as_deref() == Some(id))
            .peekable();
        let has_tasks = tasks.peek().is_some();
        let all_complete = has_tasks && tasks.all(|t| t.completed);

        if let Some(project) = self.snapshot.projects.iter_mut().find(|p| p.id == id) {
            project.completed = all_complete;
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.snapshot)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

pub fn is_overdue(task: &CachedTask, now: DateTime<Utc>) -> bool {
    !task.completed && task.due_date.is_some_and(|due| due < now)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::models::file::{FileKind, FileRecord};

    fn cache_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("taskboard-cache-{}", Uuid::new_v4()))
            .join("cache.json")
    }

    fn local(id: &str, project: Option<&str>) -> CachedTask {
        CachedTask {
            id: id.into(),
            title: format!("task {id}"),
            category: String::new(),
            project_id: project.map(String::from),
            files: vec![],
            folders: vec![],
            completed: false,
            created_at: Utc::now(),
            due_date: None,
        }
    }

    #[test]
    fn project_completes_only_when_every_task_is_done() {
        let mut cache = TaskCache::load(cache_path());
        cache.add_project(Some("p1".into()), "Launch").unwrap();
        assert!(!cache.project("p1").unwrap().completed, "no tasks yet");

        cache.add_task(local("a", Some("p1"))).unwrap();
        cache.add_task(local("b", Some("p1"))).unwrap();
        cache.toggle_task_completion("a").unwrap();
        assert!(!cache.project("p1").unwrap().completed);

        cache.toggle_task_completion("b").unwrap();
        assert!(cache.project("p1").unwrap().completed);

        cache.toggle_task_completion("a").unwrap();
        assert!(!cache.project("p1").unwrap().completed);
    }

    #[test]
    fn complete_all_marks_every_project() {
        let mut cache = TaskCache::load(cache_path());
        cache.add_project(Some("p1".into()), "One").unwrap();
        cache.add_project(Some("p2".into()), "Two").unwrap();
        cache.add_task(local("a", Some("p1"))).unwrap();
        cache.add_task(local("b", Some("p2"))).unwrap();
        cache.add_task(local("c", None)).unwrap();

        cache.complete_all().unwrap();
        assert!(cache.tasks().iter().all(|t| t.completed));
        assert!(cache.projects().iter().all(|p| p.completed));
    }

    #[test]
    fn deleting_last_open_task_recomputes_project() {
        let mut cache = TaskCache::load(cache_path());
        cache.add_project(Some("p1".into()), "One").unwrap();
        cache.add_task(local("a", Some("p1"))).unwrap();
        cache.add_task(local("b", Some("p1"))).unwrap();
        cache.toggle_task_completion("a").unwrap();

        cache.delete_task("b").unwrap();
        assert!(cache.project("p1").unwrap().completed);

        cache.delete_task("a").unwrap();
        assert!(!cache.project("p1").unwrap().completed, "empty project is not complete");
    }

    #[test]
    fn delete_project_detaches_tasks() {
        let mut cache = TaskCache::load(cache_path());
        cache.add_project(Some("p1".into()), "One").unwrap();
        cache.add_task(local("a", Some("p1"))).unwrap();
        cache.delete_project("p1").unwrap();
        assert!(cache.projects().is_empty());
        assert_eq!(cache.task("a").unwrap().project_id, None);
    }

    #[test]
    fn state_survives_reload_and_corruption_resets() {
        let path = cache_path();
        {
            let mut cache = TaskCache::load(&path);
            cache.add_task(local("a", None)).unwrap();
            cache.add_project(None, "  ").unwrap();
        }
        let reloaded = TaskCache::load(&path);
        assert_eq!(reloaded.tasks().len(), 1);
        assert_eq!(reloaded.projects()[0].name, "Untitled Project");

        std::fs::write(&path, b"{ not json").unwrap();
        let reset = TaskCache::load(&path);
        assert!(reset.tasks().is_empty());
    }

    #[test]
    fn filter_by_status_and_creation_time() {
        let mut cache = TaskCache::load(cache_path());
        let mut old = local("old", None);
        old.created_at = Utc::now() - Duration::days(10);
        cache.add_task(old).unwrap();
        cache.add_task(local("new", None)).unwrap();
        cache.toggle_task_completion("new").unwrap();

        assert_eq!(cache.filter_tasks(TaskFilter::All, None).len(), 2);
        let done: Vec<_> = cache
            .filter_tasks(TaskFilter::Completed, None)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(done, ["new"]);
        assert_eq!(cache.filter_tasks(TaskFilter::Uncompleted, None)[0].id, "old");

        let recent = cache.filter_tasks(TaskFilter::All, Some(Utc::now() - Duration::days(1)));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "new");
    }

    #[test]
    fn overdue_requires_open_task_with_past_due_date() {
        let now = Utc::now();
        let mut task = local("a", None);
        assert!(!is_overdue(&task, now));
        task.due_date = Some(now - Duration::hours(1));
        assert!(is_overdue(&task, now));
        task.completed = true;
        assert!(!is_overdue(&task, now));
        task.completed = false;
        task.due_date = Some(now + Duration::hours(1));
        assert!(!is_overdue(&task, now));
    }

    fn server_task(title: &str, completed: bool) -> Task {
        Task {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            category: "Other".into(),
            priority: "medium".into(),
            due_date: None,
            completed,
            files: vec![FileRecord {
                name: "a.txt".into(),
                key: "1-a.txt".into(),
                url: "/tasks/files/1-a.txt".into(),
                content_type: "text/plain".into(),
                size: 3,
                kind: FileKind::Text,
                folder: "root".into(),
            }],
            created_by: Uuid::new_v4(),
            creator_name: None,
            group_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn refetch_keeps_project_assignment_and_drops_vanished_tasks() {
        let mut cache = TaskCache::load(cache_path());
        cache.add_project(Some("p1".into()), "One").unwrap();

        let kept = server_task("kept", true);
        let gone = server_task("gone", false);
        cache
            .add_task(CachedTask::from_server(&kept, Some("p1".into())))
            .unwrap();
        cache
            .add_task(CachedTask::from_server(&gone, Some("p1".into())))
            .unwrap();
        assert!(!cache.project("p1").unwrap().completed);

        cache.replace_tasks(&[kept.clone()]).unwrap();
        assert_eq!(cache.tasks().len(), 1);
        let mirrored = cache.task(&kept.id.to_string()).unwrap();
        assert_eq!(mirrored.project_id.as_deref(), Some("p1"));
        assert_eq!(mirrored.files[0].path, "/tasks/files/1-a.txt");
        assert_eq!(mirrored.folders, ["root"]);
        assert!(cache.project("p1").unwrap().completed);
    }
}
