//! Heuristic relevance scoring
//!
//! Ranks project files by how likely they are to be involved in an error
//! log. This is a cheap lexical heuristic, not error localization: the goal
//! is bounding how much context gets sent to the model, so false positives
//! and negatives are acceptable.

use crate::files::{FileKind, ProjectFile};
use regex::Regex;
use std::sync::LazyLock;

/// Default cap on the number of candidate files per iteration.
pub const DEFAULT_MAX_FILES: usize = 10;

static SCRIPT_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(tsx?|jsx?)$").expect("valid regex"));

/// Score a single path against a lowercased error log.
fn score_path(path: &str, error_log_lower: &str) -> u32 {
    let mut score = 0;

    if error_log_lower.contains(&path.to_lowercase()) {
        score += 100;
    }

    if path.contains("package.json") {
        score += 50;
    }
    if path.contains("tsconfig") || path.contains("vite.config") {
        score += 30;
    }
    if SCRIPT_EXT.is_match(path) {
        score += 20;
    }
    if path.contains("/src/") {
        score += 10;
    }

    for segment in path.split('/') {
        if !segment.is_empty() && error_log_lower.contains(&segment.to_lowercase()) {
            score += 20;
        }
    }

    score
}

/// Rank the files most likely related to `error_log`, best first.
///
/// Directories and zero-score files never appear; ties keep their original
/// store order; at most `max_files` entries are returned.
pub fn extract_relevant_files<'a>(
    files: &'a [ProjectFile],
    error_log: &str,
    max_files: usize,
) -> Vec<&'a ProjectFile> {
    let error_log_lower = error_log.to_lowercase();

    let mut scored: Vec<(&ProjectFile, u32)> = files
        .iter()
        .filter(|f| f.kind == FileKind::File)
        .map(|f| (f, score_path(&f.path, &error_log_lower)))
        .filter(|(_, score)| *score > 0)
        .collect();

    // sort_by is stable, so equal scores preserve ingestion order
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    scored
        .into_iter()
        .take(max_files)
        .map(|(file, _)| file)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::ProjectFile;

    fn store() -> Vec<ProjectFile> {
        vec![
            ProjectFile::directory("src"),
            ProjectFile::file("package.json", "{}"),
            ProjectFile::file("src/App.tsx", "app"),
            ProjectFile::file("src/widgets/Counter.tsx", "counter"),
            ProjectFile::file("README.md", "readme"),
            ProjectFile::file("tsconfig.json", "{}"),
        ]
    }

    #[test]
    fn test_full_path_match_ranks_first() {
        let files = store();
        let log = "TypeError in src/widgets/Counter.tsx: count is undefined";
        let ranked = extract_relevant_files(&files, log, DEFAULT_MAX_FILES);

        assert_eq!(ranked[0].path, "src/widgets/Counter.tsx");
    }

    #[test]
    fn test_never_returns_directories_or_zero_scores() {
        let files = store();
        let ranked = extract_relevant_files(&files, "some unrelated message", 10);

        assert!(ranked.iter().all(|f| f.kind == FileKind::File));
        // README.md matches nothing: no extension bonus, no segment match
        assert!(ranked.iter().all(|f| f.path != "README.md"));
    }

    #[test]
    fn test_respects_max_files() {
        let files: Vec<ProjectFile> = (0..30)
            .map(|i| ProjectFile::file(format!("src/mod_{i}.ts"), ""))
            .collect();
        let ranked = extract_relevant_files(&files, "error", 10);
        assert_eq!(ranked.len(), 10);
    }

    #[test]
    fn test_ties_preserve_original_order() {
        let files: Vec<ProjectFile> = vec![
            ProjectFile::file("src/a.ts", ""),
            ProjectFile::file("src/b.ts", ""),
            ProjectFile::file("src/c.ts", ""),
        ];
        let ranked = extract_relevant_files(&files, "something broke", 10);
        let paths: Vec<&str> = ranked.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.ts", "src/b.ts", "src/c.ts"]);
    }

    #[test]
    fn test_scoring_weights() {
        let log = "failed to load vite.config.ts".to_lowercase();
        // extension .ts (+20), vite.config (+30), segment "vite.config.ts" (+20),
        // full path substring (+100)
        assert_eq!(score_path("vite.config.ts", &log), 170);
        // package.json: +50 only, the log does not mention it
        assert_eq!(score_path("package.json", &log), 50);
        // unrelated markdown file scores zero
        assert_eq!(score_path("docs/notes.md", &log), 0);
    }

    #[test]
    fn test_segment_match_is_case_insensitive() {
        let log = "Cannot find module COUNTER".to_lowercase();
        let score = score_path("src/counter/index.ts", &log);
        // .ts extension (+20) and the "counter" segment (+20); a leading
        // "src/" is not a "/src/" segment
        assert_eq!(score, 40);
    }
}
