//! In-memory project file store and directory ingestion
//!
//! One repair session owns one `FileStore`: the authoritative set of text
//! files for the target project. Fixes replace content in place; fixes for
//! unknown paths append new entries. Entries are never deleted.

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Directories that are never ingested.
const IGNORED_DIRS: [&str; 8] = [
    "node_modules",
    ".git",
    "dist",
    "build",
    ".next",
    ".nuxt",
    "coverage",
    ".cache",
];

/// Extensions (including the dot) recognized as project text files.
const TEXT_EXTENSIONS: [&str; 14] = [
    ".js",
    ".jsx",
    ".ts",
    ".tsx",
    ".json",
    ".css",
    ".scss",
    ".html",
    ".md",
    ".txt",
    ".yml",
    ".yaml",
    ".env",
    ".gitignore",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// One record in the file store. `path` is root-relative with '/' separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub path: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

impl ProjectFile {
    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            kind: FileKind::File,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: String::new(),
            kind: FileKind::Directory,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileStore {
    files: Vec<ProjectFile>,
}

impl FileStore {
    pub fn new(files: Vec<ProjectFile>) -> Self {
        Self { files }
    }

    /// Ingest a project directory from disk, skipping ignored directories and
    /// files without a recognized text extension. Contents are read in
    /// parallel; unreadable files are skipped with a warning.
    pub fn read_dir(root: &Path) -> Result<Self> {
        let mut entries: Vec<(PathBuf, String, FileKind)> = Vec::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_ignored(e));

        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();
            let path = to_slash_path(&rel);

            if entry.file_type().is_dir() {
                entries.push((entry.path().to_path_buf(), path, FileKind::Directory));
            } else if entry.file_type().is_file() && has_text_extension(entry.file_name().to_string_lossy().as_ref()) {
                entries.push((entry.path().to_path_buf(), path, FileKind::File));
            }
        }

        let files: Vec<ProjectFile> = entries
            .into_par_iter()
            .filter_map(|(abs, path, kind)| match kind {
                FileKind::Directory => Some(ProjectFile::directory(path)),
                FileKind::File => match fs::read_to_string(&abs) {
                    Ok(content) => Some(ProjectFile::file(path, content)),
                    Err(err) => {
                        eprintln!("  Warning: Failed to read {}: {}", path, err);
                        None
                    }
                },
            })
            .collect();

        Ok(Self { files })
    }

    pub fn files(&self) -> &[ProjectFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ProjectFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn content_of(&self, path: &str) -> Option<&str> {
        self.get(path).map(|f| f.content.as_str())
    }

    /// Apply a whole-file replacement. An unknown path becomes a new file
    /// entry; path uniqueness is preserved either way.
    pub fn apply_fix(&mut self, path: &str, content: &str) {
        match self.files.iter_mut().find(|f| f.path == path) {
            Some(file) => file.content = content.to_string(),
            None => self.files.push(ProjectFile::file(path, content)),
        }
    }

    /// All paths (files and directories), sorted.
    pub fn file_tree(&self) -> Vec<String> {
        let mut tree: Vec<String> = self.files.iter().map(|f| f.path.clone()).collect();
        tree.sort();
        tree
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    // depth 0 is the project root itself, whatever it is named
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORED_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Extension check matching on everything from the last '.' in the file
/// name, so dotfiles like `.gitignore` and `.env` count as their own
/// extension.
fn has_text_extension(name: &str) -> bool {
    match name.rfind('.') {
        Some(idx) => TEXT_EXTENSIONS.contains(&&name[idx..]),
        None => false,
    }
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
