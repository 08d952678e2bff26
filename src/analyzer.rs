//! Project analysis heuristics
//!
//! One-shot classification of language, framework, package manager, and the
//! recommended run command from the project manifest and file list. Runs
//! once at ingestion; the result is immutable for the session.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Framework detection order. First dependency match wins.
const FRAMEWORKS: [&str; 7] = ["react", "vue", "angular", "svelte", "next", "nuxt", "express"];

/// The subset of package.json this tool cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
}

impl Manifest {
    pub fn parse(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| format!("Failed to parse package.json: {}", e))
    }

    fn has_dependency(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }
}

/// Build a stand-in manifest for projects without a package.json, guessing
/// dependencies from the file types present.
pub fn synthesize_manifest(name: &str, paths: &[String]) -> Manifest {
    let has_react = paths
        .iter()
        .any(|p| p.ends_with(".jsx") || p.ends_with(".tsx"));
    let has_vue = paths.iter().any(|p| p.ends_with(".vue"));
    let has_typescript = paths
        .iter()
        .any(|p| p.ends_with(".ts") || p.ends_with(".tsx"));

    let mut manifest = Manifest {
        name: Some(name.to_string()),
        ..Manifest::default()
    };

    if has_react {
        manifest
            .dependencies
            .insert("react".to_string(), "^18.0.0".to_string());
        manifest
            .dependencies
            .insert("react-dom".to_string(), "^18.0.0".to_string());
    }
    if has_vue {
        manifest
            .dependencies
            .insert("vue".to_string(), "^3.0.0".to_string());
    }
    if has_typescript {
        manifest
            .dev_dependencies
            .insert("typescript".to_string(), "^4.0.0".to_string());
    }

    manifest
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAnalysis {
    pub language: String,
    pub framework: Option<String>,
    pub package_manager: String,
    pub has_typescript: bool,
    pub available_scripts: Vec<String>,
    pub recommended_command: String,
}

/// Classify the project. `files` is the full file tree (paths only).
pub fn analyze(manifest: &Manifest, files: &[String]) -> ProjectAnalysis {
    let has_typescript = manifest.has_dependency("typescript")
        || files
            .iter()
            .any(|f| f.ends_with(".ts") || f.ends_with(".tsx"));
    let language = if has_typescript {
        "typescript"
    } else {
        "javascript"
    };

    let framework = detect_framework(manifest);
    let available_scripts: Vec<String> = manifest.scripts.keys().cloned().collect();

    let package_manager = detect_package_manager(files);
    let recommended_command =
        with_package_manager(&recommended_script(&manifest.scripts), package_manager);

    ProjectAnalysis {
        language: language.to_string(),
        framework,
        package_manager: package_manager.to_string(),
        has_typescript,
        available_scripts,
        recommended_command,
    }
}

fn detect_framework(manifest: &Manifest) -> Option<String> {
    FRAMEWORKS
        .iter()
        .find(|&&name| {
            manifest.has_dependency(name)
                || (name == "angular" && manifest.has_dependency("@angular/core"))
        })
        .map(|name| name.to_string())
}

fn recommended_script(scripts: &BTreeMap<String, String>) -> String {
    let command = if scripts.contains_key("dev") {
        "npm run dev"
    } else if scripts.contains_key("start") {
        "npm start"
    } else if scripts.contains_key("test") {
        "npm test"
    } else if scripts.contains_key("build") {
        "npm run build"
    } else {
        "npm start"
    };
    command.to_string()
}

fn detect_package_manager(files: &[String]) -> &'static str {
    if files.iter().any(|f| f == "yarn.lock") {
        "yarn"
    } else if files.iter().any(|f| f == "pnpm-lock.yaml") {
        "pnpm"
    } else {
        "npm"
    }
}

/// Substitute the leading `npm` token for the detected package manager.
fn with_package_manager(command: &str, manager: &str) -> String {
    if manager == "npm" {
        return command.to_string();
    }
    match command.strip_prefix("npm") {
        Some(rest) => format!("{}{}", manager, rest),
        None => command.to_string(),
    }
}
