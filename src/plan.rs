//! Plan progress from `.sisyphus/boulder.json` and its markdown checklist

use log::warn;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

static CHECKBOX: OnceLock<Regex> = OnceLock::new();

#[inline]
fn checkbox_regex() -> &'static Regex {
    CHECKBOX.get_or_init(|| Regex::new(r"-[ \t]+\[([ xX])\][ \t]*(.*)").expect("checkbox pattern"))
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupted boulder.json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("boulder.json has no active plan")]
    NoActivePlan,
}

/// Accepts both the snake_case keys written today and the legacy camelCase ones
#[derive(Debug, Deserialize)]
struct BoulderJson {
    #[serde(alias = "activePlan")]
    active_plan: Option<String>,
    #[serde(alias = "sessionIDs", default)]
    session_ids: Vec<String>,
    #[serde(default)]
    status: String,
    #[serde(alias = "planName", default)]
    plan_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boulder {
    pub active_plan: Option<PathBuf>,
    pub session_ids: Vec<String>,
    pub status: String,
    pub plan_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanTask {
    pub description: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanProgress {
    pub plan_name: String,
    pub completed: usize,
    pub total: usize,
    pub tasks: Vec<PlanTask>,
}

impl PlanProgress {
    /// 0..=100, zero when the plan has no tasks
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }
}

fn read(path: &Path) -> Result<String, PlanError> {
    fs::read_to_string(path).map_err(|source| PlanError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_boulder(project_dir: &Path) -> Result<Boulder, PlanError> {
    let content = read(&project_dir.join(".sisyphus").join("boulder.json"))?;
    let json: BoulderJson = serde_json::from_str(&content)?;

    let active_plan = json.active_plan.filter(|p| !p.is_empty()).map(|p| {
        let path = PathBuf::from(p);
        if path.is_absolute() {
            path
        } else {
            project_dir.join(path)
        }
    });

    Ok(Boulder {
        active_plan,
        session_ids: json.session_ids,
        status: json.status,
        plan_name: json.plan_name,
    })
}

pub fn count_checkboxes(content: &str) -> PlanProgress {
    let tasks: Vec<PlanTask> = checkbox_regex()
        .captures_iter(content)
        .map(|caps| PlanTask {
            completed: matches!(&caps[1], "x" | "X"),
            description: caps[2].trim().to_string(),
        })
        .collect();

    PlanProgress {
        plan_name: String::new(),
        completed: tasks.iter().filter(|t| t.completed).count(),
        total: tasks.len(),
        tasks,
    }
}

pub fn load_plan_progress(project_dir: &Path) -> Result<PlanProgress, PlanError> {
    let boulder = read_boulder(project_dir)?;
    let plan_path = boulder.active_plan.ok_or(PlanError::NoActivePlan)?;
    let mut progress = count_checkboxes(&read(&plan_path)?);
    progress.plan_name = boulder.plan_name;
    Ok(progress)
}

/// Missing files are the normal "no plan" case; only corrupt state is logged
pub fn read_plan_progress(project_dir: &Path) -> Option<PlanProgress> {
    match load_plan_progress(project_dir) {
        Ok(progress) => Some(progress),
        Err(PlanError::Json(e)) => {
            warn!("Corrupted boulder.json in {}: {}", project_dir.display(), e);
            None
        }
        Err(_) => None,
    }
}
