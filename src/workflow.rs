//! Repair loop state machine
//!
//! Drives up to N iterations of score -> ask the model -> apply fixes,
//! recording one attempt per iteration. States move Idle -> Iterating ->
//! {Succeeded, Exhausted, Aborted}; `step` advances exactly one transition
//! so tests can walk the machine deterministically, `run` drives it to a
//! terminal state. Iterations are strictly sequential: each one scores the
//! file store as mutated by its predecessors, against the same error log.

use crate::ai::{CandidateFile, FileFix, ModelReply, RepairProvider, RepairRequest};
use crate::files::FileStore;
use crate::relevance;
use crate::storage::{AttemptRecord, AttemptStore, ModifiedFileRecord};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Default iteration cap.
pub const MAX_ITERATIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Preconditions checked, no iteration started yet
    Idle,
    /// Iteration `iteration` is the next one to execute
    Iterating { iteration: u32 },
    /// The model returned a parsed reply with zero fixes
    Succeeded,
    /// The iteration cap was reached with fixes still being produced
    Exhausted,
    /// A propagating client error or an unparsable reply ended the run
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Succeeded | SessionState::Exhausted | SessionState::Aborted
        )
    }

    /// Human-readable status for display
    pub fn status_text(&self) -> &'static str {
        match self {
            SessionState::Idle => "Ready",
            SessionState::Iterating { .. } => "Repairing...",
            SessionState::Succeeded => "No further fixes needed",
            SessionState::Exhausted => "Iteration cap reached",
            SessionState::Aborted => "Aborted",
        }
    }
}

/// One loop iteration's record. Immutable once pushed, except that the
/// final attempt of a successful run gets `success` retro-set.
#[derive(Debug, Clone)]
pub struct RepairAttempt {
    pub id: Uuid,
    pub iteration: u32,
    pub command: String,
    pub error_log: String,
    pub fixes: Vec<FileFix>,
    pub analysis: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_iterations: u32,
    pub max_candidates: usize,
    /// The analyzer's recommended run command, recorded on each attempt
    pub command: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            max_candidates: relevance::DEFAULT_MAX_FILES,
            command: "npm run dev".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct RepairSession<P, S> {
    provider: P,
    store: S,
    files: FileStore,
    error_log: String,
    config: SessionConfig,
    state: SessionState,
    attempts: Vec<RepairAttempt>,
    project_id: Option<Uuid>,
}

impl<P: RepairProvider, S: AttemptStore> RepairSession<P, S> {
    /// Entry preconditions: a populated file store and a non-empty error
    /// log. Violations are rejected here; the loop never starts.
    pub fn new(
        provider: P,
        store: S,
        files: FileStore,
        error_log: String,
        config: SessionConfig,
        project_id: Option<Uuid>,
    ) -> Result<Self, String> {
        if files.is_empty() {
            return Err("No project loaded".to_string());
        }
        if error_log.trim().is_empty() {
            return Err("Error log is empty".to_string());
        }
        if config.max_iterations == 0 {
            return Err("Max iterations must be at least 1".to_string());
        }

        Ok(Self {
            provider,
            store,
            files,
            error_log,
            config,
            state: SessionState::Idle,
            attempts: Vec::new(),
            project_id,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempts(&self) -> &[RepairAttempt] {
        &self.attempts
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    /// Every fix applied across the run, in application order.
    pub fn all_fixes(&self) -> Vec<&FileFix> {
        self.attempts.iter().flat_map(|a| a.fixes.iter()).collect()
    }

    /// Advance the machine by one transition. No-op in a terminal state.
    pub async fn step(&mut self) -> SessionState {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Iterating { iteration: 1 };
            }
            SessionState::Iterating { iteration } => {
                self.run_iteration(iteration).await;
            }
            _ => {}
        }
        self.state
    }

    /// Drive the machine until it reaches a terminal state.
    pub async fn run(&mut self) -> SessionState {
        while !self.state.is_terminal() {
            self.step().await;
        }
        self.state
    }

    async fn run_iteration(&mut self, iteration: u32) {
        let candidates: Vec<CandidateFile> =
            relevance::extract_relevant_files(self.files.files(), &self.error_log, self.config.max_candidates)
                .into_iter()
                .map(|f| CandidateFile {
                    path: f.path.clone(),
                    content: f.content.clone(),
                })
                .collect();

        let request = RepairRequest {
            error_log: self.error_log.clone(),
            file_tree: self.files.file_tree(),
            relevant_files: candidates,
            iteration,
        };

        match self.provider.repair(&request).await {
            Ok(reply) => self.apply_reply(iteration, &request, reply),
            Err(err) => {
                // No retry within a run; record a terminal attempt naming
                // the failure and stop.
                let attempt = RepairAttempt {
                    id: Uuid::new_v4(),
                    iteration,
                    command: self.config.command.clone(),
                    error_log: format!("Repair iteration failed: {}", err),
                    fixes: Vec::new(),
                    analysis: String::new(),
                    success: false,
                    timestamp: Utc::now(),
                };
                self.persist_attempt(&attempt, &request);
                self.attempts.push(attempt);
                self.state = SessionState::Aborted;
            }
        }
    }

    fn apply_reply(&mut self, iteration: u32, request: &RepairRequest, reply: ModelReply) {
        let attempt = RepairAttempt {
            id: Uuid::new_v4(),
            iteration,
            command: self.config.command.clone(),
            error_log: self.error_log.clone(),
            fixes: reply.fixes().to_vec(),
            analysis: reply.analysis(),
            success: false,
            timestamp: Utc::now(),
        };
        self.persist_attempt(&attempt, request);

        // Persist before/after content, then mutate the store
        for fix in &attempt.fixes {
            let old_content = self.files.content_of(&fix.path).unwrap_or("").to_string();
            let record = ModifiedFileRecord {
                id: Uuid::new_v4(),
                attempt_id: attempt.id,
                file_path: fix.path.clone(),
                old_content,
                new_content: fix.content.clone(),
                created_at: Utc::now(),
            };
            if let Err(err) = self.store.save_modified_file(record) {
                eprintln!("  Warning: Failed to save modified file record: {}", err);
            }
            self.files.apply_fix(&fix.path, &fix.content);
        }

        let had_fixes = !attempt.fixes.is_empty();
        let parsed = reply.is_parsed();
        self.attempts.push(attempt);

        if !parsed {
            // An unparsable reply is not "nothing to fix": the channel to
            // the model is broken, so the run cannot claim success.
            self.state = SessionState::Aborted;
        } else if !had_fixes {
            if let Some(last) = self.attempts.last_mut() {
                last.success = true;
            }
            self.state = SessionState::Succeeded;
        } else if iteration >= self.config.max_iterations {
            self.state = SessionState::Exhausted;
        } else {
            self.state = SessionState::Iterating {
                iteration: iteration + 1,
            };
        }
    }

    fn persist_attempt(&mut self, attempt: &RepairAttempt, request: &RepairRequest) {
        let record = AttemptRecord {
            id: attempt.id,
            project_id: self.project_id,
            iteration: attempt.iteration,
            command: attempt.command.clone(),
            stderr: attempt.error_log.clone(),
            error_detected: true,
            ai_prompt: serde_json::to_string(request).ok(),
            ai_response: serde_json::json!({
                "fixes": attempt.fixes,
                "analysis": attempt.analysis,
            }),
            success: attempt.success,
            created_at: attempt.timestamp,
        };
        if let Err(err) = self.store.save_attempt(record) {
            eprintln!("  Warning: Failed to save repair attempt: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{FileFix, ModelReply, RepairError};
    use crate::files::ProjectFile;
    use crate::storage::MemoryStore;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays a scripted sequence of replies and records every request.
    /// When the script runs dry it keeps answering "nothing to fix".
    #[derive(Debug)]
    struct ScriptedProvider {
        replies: RefCell<VecDeque<Result<ModelReply, RepairError>>>,
        requests: RefCell<Vec<RepairRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<ModelReply, RepairError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn empty_reply() -> ModelReply {
            ModelReply::Parsed {
                fixes: vec![],
                analysis: "nothing to fix".to_string(),
            }
        }

        fn fix_reply(path: &str, content: &str) -> ModelReply {
            ModelReply::Parsed {
                fixes: vec![FileFix {
                    path: path.to_string(),
                    content: content.to_string(),
                    reason: "test".to_string(),
                }],
                analysis: "one more fix".to_string(),
            }
        }
    }

    impl RepairProvider for ScriptedProvider {
        async fn repair(&self, request: &RepairRequest) -> Result<ModelReply, RepairError> {
            self.requests.borrow_mut().push(request.clone());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(Self::empty_reply()))
        }
    }

    fn store_with_one_file() -> FileStore {
        FileStore::new(vec![ProjectFile::file("src/app.ts", "X")])
    }

    fn session(
        provider: ScriptedProvider,
        files: FileStore,
    ) -> RepairSession<ScriptedProvider, MemoryStore> {
        RepairSession::new(
            provider,
            MemoryStore::new(),
            files,
            "TypeError in src/app.ts".to_string(),
            SessionConfig::default(),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_fixes_succeeds_after_one_iteration() {
        let provider = ScriptedProvider::new(vec![Ok(ScriptedProvider::empty_reply())]);
        let mut session = session(provider, store_with_one_file());

        let state = session.run().await;

        assert_eq!(state, SessionState::Succeeded);
        assert_eq!(session.attempts().len(), 1);
        assert_eq!(session.attempts()[0].iteration, 1);
        assert!(session.attempts()[0].success);
    }

    #[tokio::test]
    async fn test_persistent_fixes_exhaust_the_cap() {
        let replies = (0..10)
            .map(|i| Ok(ScriptedProvider::fix_reply("src/app.ts", &format!("v{i}"))))
            .collect();
        let provider = ScriptedProvider::new(replies);
        let mut session = session(provider, store_with_one_file());

        let state = session.run().await;

        assert_eq!(state, SessionState::Exhausted);
        assert_eq!(session.attempts().len(), 5);
        let iterations: Vec<u32> = session.attempts().iter().map(|a| a.iteration).collect();
        assert_eq!(iterations, vec![1, 2, 3, 4, 5]);
        assert!(!session.attempts().last().unwrap().success);
        // the last applied fix is what the store holds
        assert_eq!(session.files().content_of("src/app.ts"), Some("v4"));
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_on_first_iteration() {
        let provider = ScriptedProvider::new(vec![Err(RepairError::Api {
            status: 500,
            body: "upstream busy".to_string(),
        })]);
        let mut session = session(provider, store_with_one_file());

        let state = session.run().await;

        assert_eq!(state, SessionState::Aborted);
        assert_eq!(session.attempts().len(), 1);
        let attempt = &session.attempts()[0];
        assert!(attempt.fixes.is_empty());
        assert!(!attempt.success);
        assert!(attempt.error_log.contains("API error 500"));
    }

    #[tokio::test]
    async fn test_unparsed_reply_aborts_run() {
        let provider = ScriptedProvider::new(vec![Ok(ModelReply::Unparsed {
            raw: "Sure! Here is what I think went wrong...".to_string(),
        })]);
        let mut session = session(provider, store_with_one_file());

        let state = session.run().await;

        assert_eq!(state, SessionState::Aborted);
        assert_eq!(session.attempts().len(), 1);
        let attempt = &session.attempts()[0];
        assert!(attempt.fixes.is_empty());
        assert!(!attempt.success);
        assert!(attempt.analysis.contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_fix_application_replaces_and_appends() {
        let provider = ScriptedProvider::new(vec![
            Ok(ModelReply::Parsed {
                fixes: vec![
                    FileFix {
                        path: "src/app.ts".to_string(),
                        content: "Y".to_string(),
                        reason: "fix".to_string(),
                    },
                    FileFix {
                        path: "src/new.ts".to_string(),
                        content: "Z".to_string(),
                        reason: "add".to_string(),
                    },
                ],
                analysis: "two fixes".to_string(),
            }),
            Ok(ScriptedProvider::empty_reply()),
        ]);
        let mut session = session(provider, store_with_one_file());

        let state = session.run().await;

        assert_eq!(state, SessionState::Succeeded);
        assert_eq!(session.files().content_of("src/app.ts"), Some("Y"));
        assert_eq!(session.files().content_of("src/new.ts"), Some("Z"));
        assert_eq!(session.all_fixes().len(), 2);
    }

    #[tokio::test]
    async fn test_scoring_sees_applied_fixes() {
        // Iteration 1 creates a file named in the error log; iteration 2
        // must see it among the candidates because scoring runs over the
        // current store, not the original snapshot.
        let provider = ScriptedProvider::new(vec![
            Ok(ScriptedProvider::fix_reply("src/widget.ts", "W")),
            Ok(ScriptedProvider::empty_reply()),
        ]);
        let files = FileStore::new(vec![ProjectFile::file("src/app.ts", "X")]);
        let mut session = RepairSession::new(
            provider,
            MemoryStore::new(),
            files,
            "Cannot resolve src/widget.ts from src/app.ts".to_string(),
            SessionConfig::default(),
            None,
        )
        .unwrap();

        session.run().await;

        let requests = session.provider.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0]
            .relevant_files
            .iter()
            .any(|f| f.path == "src/widget.ts"));
        assert!(requests[1]
            .relevant_files
            .iter()
            .any(|f| f.path == "src/widget.ts"));
    }

    #[tokio::test]
    async fn test_step_advances_one_transition_at_a_time() {
        let provider = ScriptedProvider::new(vec![Ok(ScriptedProvider::fix_reply(
            "src/app.ts",
            "Y",
        ))]);
        let mut session = session(provider, store_with_one_file());

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.step().await, SessionState::Iterating { iteration: 1 });
        assert_eq!(session.step().await, SessionState::Iterating { iteration: 2 });
        assert_eq!(session.attempts().len(), 1);
        assert_eq!(session.step().await, SessionState::Succeeded);
        // terminal states are absorbing
        assert_eq!(session.step().await, SessionState::Succeeded);
    }

    #[tokio::test]
    async fn test_attempts_are_persisted_with_modified_files() {
        let provider = ScriptedProvider::new(vec![
            Ok(ScriptedProvider::fix_reply("src/app.ts", "Y")),
            Ok(ScriptedProvider::empty_reply()),
        ]);
        let mut session = session(provider, store_with_one_file());

        session.run().await;

        let attempts = session.store.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[0].ai_prompt.as_deref().unwrap().contains("errorLog"));

        let modified = session.store.modified_files();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].old_content, "X");
        assert_eq!(modified[0].new_content, "Y");
        assert_eq!(modified[0].attempt_id, attempts[0].id);
    }

    #[test]
    fn test_preconditions_reject_bad_input() {
        let provider = ScriptedProvider::new(vec![]);
        let err = RepairSession::new(
            provider,
            MemoryStore::new(),
            FileStore::new(vec![]),
            "boom".to_string(),
            SessionConfig::default(),
            None,
        )
        .unwrap_err();
        assert!(err.contains("No project loaded"));

        let provider = ScriptedProvider::new(vec![]);
        let err = RepairSession::new(
            provider,
            MemoryStore::new(),
            store_with_one_file(),
            "   \n".to_string(),
            SessionConfig::default(),
            None,
        )
        .unwrap_err();
        assert!(err.contains("empty"));
    }
}
