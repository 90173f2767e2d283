//! Session discovery from opencode's storage tree
//!
//! Layout: `<storage>/project/<projectID>.json` and
//! `<storage>/session/<projectID>/<sessionID>.json`

use chrono::{DateTime, Duration, Local, Utc};
use fxhash::FxHashMap;
use log::{debug, warn};
use rayon::prelude::*;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMeta {
    pub id: String,
    pub project_id: String,
    pub directory: String,
    pub title: String,
    pub parent_id: Option<String>,
    /// Worktree of the owning project, empty when the project file is missing
    pub worktree: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionMeta {
    /// Title for list rows, falling back to the id
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid session json in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid timestamp {0} in session file")]
    Timestamp(i64),
}

#[derive(Debug, Deserialize)]
struct SessionJson {
    id: String,
    #[serde(rename = "projectID", default)]
    project_id: String,
    #[serde(default)]
    directory: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "parentID", default)]
    parent_id: Option<String>,
    time: SessionTime,
}

#[derive(Debug, Deserialize)]
struct ProjectJson {
    id: String,
    #[serde(default)]
    worktree: String,
}

/// Worktree of the catch-all project opencode uses outside any repository
const GLOBAL_WORKTREE: &str = "/";

#[derive(Debug, Deserialize)]
struct SessionTime {
    created: i64,
    #[serde(default)]
    updated: Option<i64>,
}

fn millis(ms: i64) -> Result<DateTime<Utc>, SessionError> {
    DateTime::from_timestamp_millis(ms).ok_or(SessionError::Timestamp(ms))
}

pub fn parse_session_file(path: &Path) -> Result<SessionMeta, SessionError> {
    let content = fs::read_to_string(path).map_err(|source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let json: SessionJson = serde_json::from_str(&content).map_err(|source| SessionError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let created_at = millis(json.time.created)?;
    let updated_at = match json.time.updated {
        Some(ms) => millis(ms)?,
        None => created_at,
    };

    Ok(SessionMeta {
        id: json.id,
        project_id: json.project_id,
        directory: json.directory,
        title: json.title,
        parent_id: json.parent_id.filter(|p| !p.is_empty()),
        worktree: String::new(),
        created_at,
        updated_at,
    })
}

fn list_json_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect()
}

/// Project id to worktree, for every readable project file.
/// The global project is included so callers can recognise it.
pub fn discover_projects(storage: &Path) -> FxHashMap<String, String> {
    list_json_files(&storage.join("project"))
        .into_iter()
        .filter_map(|path| {
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<ProjectJson>(&content).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(project) => Some((project.id, project.worktree)),
                Err(e) => {
                    warn!("Skipping project file {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect()
}

/// All sessions under `storage`, most recently updated first.
/// Sessions of the global project are left out; the rest carry their
/// project's worktree. Missing directories give an empty list; bad files are skipped.
pub fn discover_sessions(storage: &Path) -> Vec<SessionMeta> {
    let projects = discover_projects(storage);
    let session_root = storage.join("session");
    let Ok(entries) = fs::read_dir(&session_root) else {
        debug!("No session directory at {}", session_root.display());
        return Vec::new();
    };

    let project_dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            let id = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            projects.get(id).map(String::as_str) != Some(GLOBAL_WORKTREE)
        })
        .collect();

    let mut sessions: Vec<SessionMeta> = project_dirs
        .par_iter()
        .flat_map_iter(|dir| list_json_files(dir))
        .filter_map(|path| match parse_session_file(&path) {
            Ok(mut session) => {
                if let Some(worktree) = projects.get(&session.project_id) {
                    session.worktree.clone_from(worktree);
                }
                Some(session)
            }
            Err(e) => {
                warn!("Skipping session file: {}", e);
                None
            }
        })
        .collect();

    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    debug!("Discovered {} sessions in {}", sessions.len(), session_root.display());
    sessions
}

/// Keep only sessions started in `project`, or belonging to a project rooted there
pub fn filter_by_directory(sessions: Vec<SessionMeta>, project: &Path) -> Vec<SessionMeta> {
    sessions
        .into_iter()
        .filter(|s| {
            Path::new(&s.directory) == project
                || (!s.worktree.is_empty() && Path::new(&s.worktree) == project)
        })
        .collect()
}

/// Local midnight of the current day, in UTC
pub fn start_of_today() -> DateTime<Utc> {
    let now = Local::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc) - Duration::hours(24))
}

/// Keep sessions updated at or after `cutoff`
pub fn filter_updated_since(sessions: Vec<SessionMeta>, cutoff: DateTime<Utc>) -> Vec<SessionMeta> {
    sessions
        .into_iter()
        .filter(|s| s.updated_at >= cutoff)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_session(root: &Path, project: &str, id: &str, dir: &str, updated: i64) {
        let project_dir = root.join("session").join(project);
        fs::create_dir_all(&project_dir).unwrap();
        let body = format!(
            r#"{{"id":"{id}","slug":"s","projectID":"{project}","directory":"{dir}","title":"Title {id}","time":{{"created":1700000000000,"updated":{updated}}}}}"#
        );
        fs::write(project_dir.join(format!("{id}.json")), body).unwrap();
    }

    #[test]
    fn discovers_sessions_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        write_session(tmp.path(), "p1", "ses_a", "/work/a", 1700000001000);
        write_session(tmp.path(), "p2", "ses_b", "/work/b", 1700000009000);
        write_session(tmp.path(), "p1", "ses_c", "/work/a", 1700000005000);
        fs::write(tmp.path().join("session/p1/broken.json"), "{not json").unwrap();
        fs::write(tmp.path().join("session/p1/notes.txt"), "ignored").unwrap();

        let sessions = discover_sessions(tmp.path());
        let ids: Vec<_> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ses_b", "ses_c", "ses_a"]);
        assert_eq!(sessions[0].project_id, "p2");
        assert_eq!(sessions[0].title, "Title ses_b");
        assert_eq!(sessions[0].updated_at.timestamp_millis(), 1700000009000);
    }

    fn write_project(root: &Path, id: &str, worktree: &str) {
        let dir = root.join("project");
        fs::create_dir_all(&dir).unwrap();
        let body = format!(
            r#"{{"id":"{id}","worktree":"{worktree}","vcs":"git","time":{{"created":1700000000000,"updated":1700000000000}}}}"#
        );
        fs::write(dir.join(format!("{id}.json")), body).unwrap();
    }

    #[test]
    fn skips_global_project_and_attaches_worktree() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), "p1", "/work/repo");
        write_project(tmp.path(), "global", "/");
        write_session(tmp.path(), "p1", "ses_a", "/work/repo/sub", 1700000001000);
        write_session(tmp.path(), "global", "ses_g", "/home/me", 1700000009000);
        write_session(tmp.path(), "p9", "ses_x", "/work/other", 1700000002000);

        let sessions = discover_sessions(tmp.path());
        let ids: Vec<_> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ses_x", "ses_a"]);
        assert_eq!(sessions[1].worktree, "/work/repo");
        assert_eq!(sessions[0].worktree, "");

        let in_repo = filter_by_directory(sessions, Path::new("/work/repo"));
        assert_eq!(in_repo.len(), 1);
        assert_eq!(in_repo[0].id, "ses_a");
    }

    #[test]
    fn today_filter_keeps_midnight_and_later() {
        let tmp = tempfile::tempdir().unwrap();
        let midnight = start_of_today();
        assert!(midnight <= Utc::now());

        let at = |id: &str, updated: DateTime<Utc>| {
            write_session(tmp.path(), "p1", id, "/w", updated.timestamp_millis());
        };
        at("ses_now", Utc::now());
        at("ses_midnight", midnight);
        at("ses_yesterday", midnight - Duration::seconds(1));

        let today = filter_updated_since(discover_sessions(tmp.path()), midnight);
        let mut ids: Vec<_> = today.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["ses_midnight", "ses_now"]);
    }

    #[test]
    fn missing_storage_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_sessions(&tmp.path().join("nope")).is_empty());
    }

    #[test]
    fn parses_parent_and_defaults_updated() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("child.json");
        fs::write(
            &path,
            r#"{"id":"ses_child","projectID":"p","directory":"/w","title":"","parentID":"ses_root","time":{"created":1700000000000}}"#,
        )
        .unwrap();
        let session = parse_session_file(&path).unwrap();
        assert_eq!(session.parent_id.as_deref(), Some("ses_root"));
        assert_eq!(session.updated_at, session.created_at);
        assert_eq!(session.display_title(), "ses_child");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        fs::write(&path, "[]").unwrap();
        assert!(matches!(parse_session_file(&path), Err(SessionError::Json { .. })));
    }

    #[test]
    fn filters_by_project_directory() {
        let tmp = tempfile::tempdir().unwrap();
        write_session(tmp.path(), "p1", "ses_a", "/work/a", 1700000001000);
        write_session(tmp.path(), "p2", "ses_b", "/work/b", 1700000002000);
        let only_a = filter_by_directory(discover_sessions(tmp.path()), Path::new("/work/a"));
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].id, "ses_a");
    }
}
