use std::path::{Component, Path, PathBuf};

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

pub struct ProjectPath {
    pub absolute: PathBuf,
    pub relative: PathBuf,
}

/// Resolve a root-relative path for writing, allowing files that do not
/// exist yet. Rejects absolute paths and parent traversal so a fix path
/// coming back from the model can never escape the project directory.
pub fn resolve_project_path_allow_new(root: &Path, candidate: &Path) -> Result<ProjectPath, String> {
    if candidate.as_os_str().is_empty() {
        return Err("Path is empty".to_string());
    }
    if candidate.is_absolute() {
        return Err(format!(
            "Absolute paths are not allowed: {}",
            candidate.display()
        ));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(format!(
            "Parent traversal is not allowed: {}",
            candidate.display()
        ));
    }

    let root = root
        .canonicalize()
        .map_err(|e| format!("Failed to resolve project root: {}", e))?;
    let joined = root.join(candidate);
    let parent = joined
        .parent()
        .ok_or_else(|| format!("Invalid path: {}", candidate.display()))?;
    let parent_canon = canonicalize_existing_parent(parent)?;

    if !parent_canon.starts_with(&root) {
        return Err(format!("Path escapes project: {}", candidate.display()));
    }

    let relative = joined
        .strip_prefix(&root)
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|_| candidate.to_path_buf());

    Ok(ProjectPath {
        absolute: joined,
        relative,
    })
}

fn canonicalize_existing_parent(path: &Path) -> Result<PathBuf, String> {
    let mut current = path.to_path_buf();
    while !current.exists() {
        if !current.pop() {
            return Err("Path has no existing parent".to_string());
        }
    }
    current
        .canonicalize()
        .map_err(|e| format!("Failed to resolve path {}: {}", current.display(), e))
}

#[cfg(test)]
mod tests {
    use super::{resolve_project_path_allow_new, truncate};
    use std::path::PathBuf;

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn test_resolve_project_path_allow_new_accepts_missing_file() {
        let root = tempfile::tempdir().unwrap();

        let candidate = PathBuf::from("src/components/NewWidget.tsx");
        let resolved = resolve_project_path_allow_new(root.path(), &candidate).unwrap();
        assert_eq!(resolved.relative, candidate);
        assert!(resolved.absolute.ends_with("src/components/NewWidget.tsx"));
    }

    #[test]
    fn test_resolve_project_path_rejects_escape() {
        let root = tempfile::tempdir().unwrap();

        assert!(resolve_project_path_allow_new(root.path(), &PathBuf::from("../evil.ts")).is_err());
        assert!(resolve_project_path_allow_new(root.path(), &PathBuf::from("/etc/passwd")).is_err());
        assert!(resolve_project_path_allow_new(root.path(), &PathBuf::from("")).is_err());
    }
}
