//! Repair audit trail persistence
//!
//! Storage is an audit trail, not a correctness dependency: the loop logs
//! save failures and keeps iterating. One implementation is selected at
//! startup and injected into the session. `JsonlStore` appends records
//! under `.autofix/` in the project; `MemoryStore` keeps them in-process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub name: String,
    pub source_path: String,
    pub source_type: String,
    pub language: Option<String>,
    pub framework: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub iteration: u32,
    pub command: String,
    pub stderr: String,
    pub error_detected: bool,
    /// The serialized `RepairRequest` that was sent
    pub ai_prompt: Option<String>,
    /// The normalized reply (fixes + analysis)
    pub ai_response: serde_json::Value,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifiedFileRecord {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub file_path: String,
    pub old_content: String,
    pub new_content: String,
    pub created_at: DateTime<Utc>,
}

pub trait AttemptStore {
    fn save_project(&mut self, record: ProjectRecord) -> Result<(), String>;
    fn save_attempt(&mut self, record: AttemptRecord) -> Result<(), String>;
    fn save_modified_file(&mut self, record: ModifiedFileRecord) -> Result<(), String>;
}

impl<T: AttemptStore + ?Sized> AttemptStore for Box<T> {
    fn save_project(&mut self, record: ProjectRecord) -> Result<(), String> {
        (**self).save_project(record)
    }

    fn save_attempt(&mut self, record: AttemptRecord) -> Result<(), String> {
        (**self).save_attempt(record)
    }

    fn save_modified_file(&mut self, record: ModifiedFileRecord) -> Result<(), String> {
        (**self).save_modified_file(record)
    }
}

/// Ephemeral in-process store. Records die with the session.
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: Vec<ProjectRecord>,
    attempts: Vec<AttemptRecord>,
    modified_files: Vec<ModifiedFileRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projects(&self) -> &[ProjectRecord] {
        &self.projects
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn modified_files(&self) -> &[ModifiedFileRecord] {
        &self.modified_files
    }
}

impl AttemptStore for MemoryStore {
    fn save_project(&mut self, record: ProjectRecord) -> Result<(), String> {
        self.projects.push(record);
        Ok(())
    }

    fn save_attempt(&mut self, record: AttemptRecord) -> Result<(), String> {
        self.attempts.push(record);
        Ok(())
    }

    fn save_modified_file(&mut self, record: ModifiedFileRecord) -> Result<(), String> {
        self.modified_files.push(record);
        Ok(())
    }
}

/// Durable store: one JSON line per record, appended under a directory
/// (conventionally `<project>/.autofix`).
#[derive(Debug)]
pub struct JsonlStore {
    dir: PathBuf,
}

impl JsonlStore {
    pub fn open(dir: &Path) -> Result<Self, String> {
        fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append<T: Serialize>(&self, file_name: &str, record: &T) -> Result<(), String> {
        let path = self.dir.join(file_name);
        let line = serde_json::to_string(record)
            .map_err(|e| format!("Failed to serialize record: {}", e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
        writeln!(file, "{}", line).map_err(|e| format!("Failed to write {}: {}", path.display(), e))
    }
}

impl AttemptStore for JsonlStore {
    fn save_project(&mut self, record: ProjectRecord) -> Result<(), String> {
        self.append("projects.jsonl", &record)
    }

    fn save_attempt(&mut self, record: AttemptRecord) -> Result<(), String> {
        self.append("attempts.jsonl", &record)
    }

    fn save_modified_file(&mut self, record: ModifiedFileRecord) -> Result<(), String> {
        self.append("modified_files.jsonl", &record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt_record(iteration: u32) -> AttemptRecord {
        AttemptRecord {
            id: Uuid::new_v4(),
            project_id: None,
            iteration,
            command: "npm run dev".to_string(),
            stderr: "boom".to_string(),
            error_detected: true,
            ai_prompt: None,
            ai_response: serde_json::json!({"fixes": [], "analysis": "ok"}),
            success: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_store_accumulates() {
        let mut store = MemoryStore::new();
        store.save_attempt(attempt_record(1)).unwrap();
        store.save_attempt(attempt_record(2)).unwrap();

        assert_eq!(store.attempts().len(), 2);
        assert_eq!(store.attempts()[1].iteration, 2);
    }

    #[test]
    fn test_jsonl_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlStore::open(&dir.path().join(".autofix")).unwrap();

        store.save_attempt(attempt_record(1)).unwrap();
        store.save_attempt(attempt_record(2)).unwrap();

        let content = fs::read_to_string(store.dir().join("attempts.jsonl")).unwrap();
        let records: Vec<AttemptRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].iteration, 1);
        assert_eq!(records[1].command, "npm run dev");
    }
}
