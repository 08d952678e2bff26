use anyhow::{anyhow, bail, Context, Result};
use autofix::ai::AiClient;
use autofix::analyzer::{self, Manifest, ProjectAnalysis};
use autofix::config::{setup_api_key_interactive, Config};
use autofix::files::{FileKind, FileStore, ProjectFile};
use autofix::spinner::Spinner;
use autofix::storage::{AttemptStore, JsonlStore, MemoryStore, ProjectRecord};
use autofix::util::{resolve_project_path_allow_new, truncate};
use autofix::workflow::{RepairSession, SessionConfig, SessionState};
use chrono::Utc;
use clap::Parser;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "autofix",
    about = "AI-powered code repair for JavaScript and TypeScript projects",
    version
)]
struct Args {
    /// Path to the project directory (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Read the error log from this file instead of stdin
    #[arg(short, long)]
    error_log: Option<PathBuf>,

    /// Maximum repair iterations
    #[arg(short = 'n', long, default_value = "5")]
    max_iterations: u32,

    /// Maximum candidate files sent to the model per iteration
    #[arg(short = 'k', long, default_value = "10")]
    max_files: usize,

    /// Write fixed files back into the project directory
    #[arg(short, long)]
    write: bool,

    /// Keep the audit trail in memory instead of .autofix/
    #[arg(long)]
    ephemeral: bool,

    /// Configure the API key and exit
    #[arg(long)]
    setup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.setup {
        setup_api_key_interactive().map_err(|e| anyhow!(e))?;
        return Ok(());
    }

    let root = args
        .path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", args.path.display()))?;
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string());

    eprintln!("  Reading project files...");
    let files = FileStore::read_dir(&root)?;
    if files.is_empty() {
        bail!("No project files found under {}", root.display());
    }
    let file_count = files
        .files()
        .iter()
        .filter(|f| f.kind == FileKind::File)
        .count();
    eprintln!("  Found {} text files", file_count);

    let tree = files.file_tree();
    let (manifest, had_manifest) = load_manifest(files.files(), &project_name)?;
    let analysis = analyzer::analyze(&manifest, &tree);
    print_analysis(&project_name, &analysis);

    let error_log = read_error_log(args.error_log.as_deref())?;
    if error_log.trim().is_empty() {
        bail!("Error log is empty. Paste the failing build or runtime output.");
    }

    let config = Config::load();
    let client = AiClient::from_config(&config, args.max_iterations).map_err(|e| anyhow!("{}", e))?;

    let mut store: Box<dyn AttemptStore> = if args.ephemeral {
        Box::new(MemoryStore::new())
    } else {
        match JsonlStore::open(&root.join(".autofix")) {
            Ok(store) => Box::new(store),
            Err(err) => {
                eprintln!("  Warning: {}; keeping the audit trail in memory", err);
                Box::new(MemoryStore::new())
            }
        }
    };

    let project_id = Uuid::new_v4();
    let project_record = ProjectRecord {
        id: project_id,
        name: project_name.clone(),
        source_path: root.display().to_string(),
        source_type: if had_manifest {
            "local".to_string()
        } else {
            "local-no-package-json".to_string()
        },
        language: Some(analysis.language.clone()),
        framework: analysis.framework.clone(),
        status: "repairing".to_string(),
        created_at: Utc::now(),
    };
    if let Err(err) = store.save_project(project_record) {
        eprintln!("  Warning: Failed to save project record: {}", err);
    }

    let session_config = SessionConfig {
        max_iterations: args.max_iterations,
        max_candidates: args.max_files,
        command: analysis.recommended_command.clone(),
    };
    let mut session = RepairSession::new(
        client,
        store,
        files,
        error_log,
        session_config,
        Some(project_id),
    )
    .map_err(|e| anyhow!(e))?;

    // Drive one transition at a time so each finished attempt can be
    // reported as it lands.
    let mut printed = 0;
    loop {
        let state = session.state();
        if state.is_terminal() {
            break;
        }
        if let SessionState::Iterating { iteration } = state {
            let spinner = Spinner::start(format!(
                "Iteration {}/{}: asking the model...",
                iteration, args.max_iterations
            ));
            session.step().await;
            spinner.stop();
        } else {
            session.step().await;
        }

        for attempt in &session.attempts()[printed..] {
            print_attempt(attempt);
            printed += 1;
        }
    }

    let state = session.state();
    println!();
    println!("  Result: {}", state.status_text());
    if state == SessionState::Exhausted {
        println!(
            "  Reached maximum iterations ({}). Some issues may remain.",
            args.max_iterations
        );
    }

    let fixed_paths = report_fixed_files(&session);

    if args.write && !fixed_paths.is_empty() {
        println!();
        write_fixed_files(&root, session.files(), &fixed_paths)?;
    } else if !fixed_paths.is_empty() {
        println!();
        println!("  Run again with --write to apply the fixes to disk.");
    }

    match state {
        SessionState::Succeeded => Ok(()),
        SessionState::Exhausted => std::process::exit(2),
        _ => std::process::exit(1),
    }
}

/// Find the project manifest at the root or one directory deep, or
/// synthesize one from file types.
fn load_manifest(files: &[ProjectFile], project_name: &str) -> Result<(Manifest, bool)> {
    let manifest_file = files.iter().find(|f| f.path == "package.json").or_else(|| {
        files
            .iter()
            .find(|f| f.path.ends_with("/package.json") && f.path.split('/').count() == 2)
    });

    match manifest_file {
        Some(file) => {
            let manifest = Manifest::parse(&file.content)
                .map_err(|e| anyhow!("Found {} but could not parse it: {}", file.path, e))?;
            Ok((manifest, true))
        }
        None => {
            eprintln!("  No package.json found; inferring dependencies from file types");
            let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
            Ok((analyzer::synthesize_manifest(project_name, &paths), false))
        }
    }
}

fn read_error_log(source: Option<&Path>) -> Result<String> {
    match source {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read error log from {}", path.display())),
        None => {
            eprintln!("  Paste the error log, then press Ctrl-D:");
            let mut log = String::new();
            std::io::stdin()
                .read_to_string(&mut log)
                .context("Failed to read error log from stdin")?;
            Ok(log)
        }
    }
}

fn print_analysis(project_name: &str, analysis: &ProjectAnalysis) {
    let framework = analysis.framework.as_deref().unwrap_or("none");
    println!();
    println!("  ┌─────────────────────────────────────────────────────────┐");
    println!("  │  PROJECT ANALYSIS                                       │");
    println!("  └─────────────────────────────────────────────────────────┘");
    println!("    project:   {}", project_name);
    println!("    language:  {}", analysis.language);
    println!("    framework: {}", framework);
    println!("    manager:   {}", analysis.package_manager);
    println!("    command:   {}", analysis.recommended_command);
    println!();
}

fn print_attempt(attempt: &autofix::workflow::RepairAttempt) {
    println!();
    println!(
        "  Iteration {} - {} fix{}",
        attempt.iteration,
        attempt.fixes.len(),
        if attempt.fixes.len() == 1 { "" } else { "es" }
    );
    for fix in &attempt.fixes {
        println!("    {} - {}", fix.path, truncate(&fix.reason, 70));
    }
    if !attempt.analysis.is_empty() {
        println!("    analysis: {}", truncate(&attempt.analysis, 200));
    }
    if attempt.fixes.is_empty() && attempt.error_log.starts_with("Repair iteration failed") {
        println!("    {}", attempt.error_log);
    }
}

/// Print the set of files touched across the run and return their paths,
/// de-duplicated, in first-touched order.
fn report_fixed_files<P, S>(session: &RepairSession<P, S>) -> Vec<String>
where
    P: autofix::ai::RepairProvider,
    S: AttemptStore,
{
    let mut paths: Vec<String> = Vec::new();
    for fix in session.all_fixes() {
        if !paths.contains(&fix.path) {
            paths.push(fix.path.clone());
        }
    }

    if !paths.is_empty() {
        println!();
        println!("  Fixed files:");
        for path in &paths {
            println!("    {}", path);
        }
    }
    paths
}

fn write_fixed_files(root: &Path, files: &FileStore, paths: &[String]) -> Result<()> {
    for path in paths {
        let Some(content) = files.content_of(path) else {
            continue;
        };
        let resolved = resolve_project_path_allow_new(root, Path::new(path))
            .map_err(|e| anyhow!("Refusing to write {}: {}", path, e))?;
        if let Some(parent) = resolved.absolute.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&resolved.absolute, content)
            .with_context(|| format!("Failed to write {}", resolved.absolute.display()))?;
        println!("  + wrote {}", resolved.relative.display());
    }
    Ok(())
}
