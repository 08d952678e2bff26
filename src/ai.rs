//! LLM repair client
//!
//! Builds the repair prompt, round-trips with a chat-completions endpoint,
//! and normalizes the model's reply. Model output is untrusted text: parse
//! failures are absorbed into an `Unparsed` reply so the loop can keep its
//! bookkeeping, while transport and configuration failures propagate as
//! `RepairError` and abort the run.

use crate::config::Config;
use crate::util::truncate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const TEMPERATURE: f32 = 0.1;
const MAX_COMPLETION_TOKENS: u32 = 4000;

/// Hard cap on one model round trip; a hung call stalls the whole loop.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Cap on file-tree lines included in the prompt.
const FILE_TREE_LIMIT: usize = 50;

/// How much raw text gets quoted back when a reply fails to parse.
const RAW_EXCERPT_LEN: usize = 500;

/// One repair request, as sent over the wire and persisted to the audit
/// trail. Field names are part of the format; do not rename.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairRequest {
    pub error_log: String,
    pub file_tree: Vec<String>,
    pub relevant_files: Vec<CandidateFile>,
    pub iteration: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateFile {
    pub path: String,
    pub content: String,
}

/// A whole-file replacement proposed by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFix {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub reason: String,
}

/// The model's reply after normalization.
///
/// `Parsed` means the completion was valid JSON (fields coerced as needed);
/// `Unparsed` keeps the raw text so the caller can tell "nothing to fix"
/// apart from "could not understand the model".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReply {
    Parsed { fixes: Vec<FileFix>, analysis: String },
    Unparsed { raw: String },
}

impl ModelReply {
    pub fn fixes(&self) -> &[FileFix] {
        match self {
            ModelReply::Parsed { fixes, .. } => fixes,
            ModelReply::Unparsed { .. } => &[],
        }
    }

    pub fn analysis(&self) -> String {
        match self {
            ModelReply::Parsed { analysis, .. } => analysis.clone(),
            ModelReply::Unparsed { raw } => format!(
                "Model reply was not valid JSON. Raw reply: {}",
                truncate(raw, RAW_EXCERPT_LEN)
            ),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, ModelReply::Parsed { .. })
    }
}

/// Failures that make the loop unable to proceed at all, as opposed to the
/// model replying unhelpfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairError {
    MissingApiKey,
    Transport(String),
    Api { status: u16, body: String },
    EmptyReply,
}

impl fmt::Display for RepairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairError::MissingApiKey => {
                write!(f, "API key not configured. {}", setup_instructions())
            }
            RepairError::Transport(msg) => write!(f, "Request failed: {}", msg),
            RepairError::Api { status, body } => write!(f, "API error {}: {}", status, body),
            RepairError::EmptyReply => write!(f, "No completion in API response"),
        }
    }
}

impl std::error::Error for RepairError {}

/// Get setup instructions
pub fn setup_instructions() -> &'static str {
    "Run `autofix --setup` to configure your DeepSeek API key"
}

/// Anything that can answer a repair request. The production implementation
/// is `AiClient`; tests drive the loop with scripted providers.
#[allow(async_fn_in_trait)]
pub trait RepairProvider {
    async fn repair(&self, request: &RepairRequest) -> Result<ModelReply, RepairError>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

pub struct AiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    max_iterations: u32,
}

impl AiClient {
    pub fn from_config(config: &Config, max_iterations: u32) -> Result<Self, RepairError> {
        let api_key = config.get_api_key().ok_or(RepairError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RepairError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.api_base_url(),
            model: config.model(),
            api_key,
            max_iterations,
        })
    }

    fn system_prompt(&self, iteration: u32) -> String {
        format!(
            r#"You are an expert code repair agent. Your job is to analyze runtime or build errors and fix the code.

Rules:
1. Provide ONLY complete file replacements, no partial edits
2. Return valid JSON with this structure: {{ "fixes": [{{ "path": "src/file.ts", "content": "full file content", "reason": "brief explanation" }}], "analysis": "error analysis" }}
3. Make minimal changes - only fix what's broken
4. Do not add new dependencies unless absolutely necessary
5. Preserve existing code style and structure
6. Focus on the specific error in the log
7. No markdown, no code fences, just raw file content

This is iteration {} of {} maximum attempts."#,
            iteration, self.max_iterations
        )
    }
}

fn user_prompt(request: &RepairRequest) -> String {
    let file_tree = request
        .file_tree
        .iter()
        .take(FILE_TREE_LIMIT)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");

    let files_context = request
        .relevant_files
        .iter()
        .map(|f| format!("### {}\n{}", f.path, f.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Error Log:\n{}\n\n---\n\nFile Tree:\n{}\n\n---\n\nRelevant Files:\n{}\n\n---\n\nAnalyze the error and provide fixes in valid JSON format.",
        request.error_log, file_tree, files_context
    )
}

impl RepairProvider for AiClient {
    async fn repair(&self, request: &RepairRequest) -> Result<ModelReply, RepairError> {
        let chat = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: self.system_prompt(request.iteration),
                },
                Message {
                    role: "user".to_string(),
                    content: user_prompt(request),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_COMPLETION_TOKENS,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&chat)
            .send()
            .await
            .map_err(|e| RepairError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RepairError::Api {
                status,
                body: truncate(&body, 200),
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| RepairError::Transport(format!("Failed to parse response: {}", e)))?;

        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or(RepairError::EmptyReply)?;

        Ok(normalize_reply(&content))
    }
}

/// Strip surrounding markdown code fences (with an optional `json` tag).
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

/// Normalize a raw completion into a `ModelReply`. Total: never fails.
///
/// A completion that parses as JSON becomes `Parsed`, with `fixes` coerced
/// to empty when missing or not an array and `analysis` defaulted when
/// missing. Fix entries without a path or content are dropped. Anything
/// that does not parse at all becomes `Unparsed`.
pub fn normalize_reply(raw: &str) -> ModelReply {
    let cleaned = strip_code_fences(raw);

    let value: serde_json::Value = match serde_json::from_str(cleaned) {
        Ok(value) => value,
        Err(_) => {
            return ModelReply::Unparsed {
                raw: raw.to_string(),
            }
        }
    };

    let fixes = value
        .get("fixes")
        .and_then(|v| v.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let path = entry.get("path")?.as_str()?;
                    let content = entry.get("content")?.as_str()?;
                    let reason = entry
                        .get("reason")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    Some(FileFix {
                        path: path.to_string(),
                        content: content.to_string(),
                        reason,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let analysis = value
        .get("analysis")
        .and_then(|v| v.as_str())
        .unwrap_or("Analysis completed")
        .to_string();

    ModelReply::Parsed { fixes, analysis }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_valid_reply() {
        let raw = r#"{"fixes": [{"path": "src/a.ts", "content": "fixed", "reason": "typo"}], "analysis": "a typo"}"#;
        let reply = normalize_reply(raw);

        assert!(reply.is_parsed());
        assert_eq!(reply.fixes().len(), 1);
        assert_eq!(reply.fixes()[0].path, "src/a.ts");
        assert_eq!(reply.analysis(), "a typo");
    }

    #[test]
    fn test_normalize_fenced_reply() {
        let raw = "```json\n{\"fixes\": [], \"analysis\": \"all good\"}\n```";
        let reply = normalize_reply(raw);
        assert!(reply.is_parsed());
        assert!(reply.fixes().is_empty());
        assert_eq!(reply.analysis(), "all good");

        let raw = "```\n{\"fixes\": [], \"analysis\": \"ok\"}\n```";
        assert!(normalize_reply(raw).is_parsed());
    }

    #[test]
    fn test_normalize_malformed_replies_never_fail() {
        for raw in [
            "",
            "I could not find any problems with your code.",
            r#"{"fixes": [{"path": "a.ts", "conte"#,
            "```json\ntruncated",
        ] {
            let reply = normalize_reply(raw);
            assert!(!reply.is_parsed(), "expected Unparsed for {:?}", raw);
            assert!(reply.fixes().is_empty());
            assert!(!reply.analysis().is_empty());
        }
    }

    #[test]
    fn test_normalize_coerces_missing_fields() {
        // fixes is not an array
        let reply = normalize_reply(r#"{"fixes": "none", "analysis": "ok"}"#);
        assert!(reply.is_parsed());
        assert!(reply.fixes().is_empty());

        // analysis missing
        let reply = normalize_reply(r#"{"fixes": []}"#);
        assert_eq!(reply.analysis(), "Analysis completed");

        // reason missing on a fix entry
        let reply = normalize_reply(r#"{"fixes": [{"path": "a.ts", "content": "x"}]}"#);
        assert_eq!(reply.fixes()[0].reason, "");

        // entries without path or content are dropped
        let reply = normalize_reply(r#"{"fixes": [{"path": "a.ts"}, {"content": "x"}]}"#);
        assert!(reply.fixes().is_empty());
    }

    #[test]
    fn test_unparsed_analysis_quotes_an_excerpt() {
        let raw = "x".repeat(2000);
        let reply = normalize_reply(&raw);
        let analysis = reply.analysis();
        assert!(analysis.contains("not valid JSON"));
        assert!(analysis.len() < 600);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {} "), "{}");
        assert_eq!(strip_code_fences("no fences"), "no fences");
    }

    #[test]
    fn test_repair_request_wire_format() {
        let request = RepairRequest {
            error_log: "boom".to_string(),
            file_tree: vec!["a.ts".to_string()],
            relevant_files: vec![CandidateFile {
                path: "a.ts".to_string(),
                content: "x".to_string(),
            }],
            iteration: 2,
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["errorLog"], "boom");
        assert_eq!(json["fileTree"][0], "a.ts");
        assert_eq!(json["relevantFiles"][0]["path"], "a.ts");
        assert_eq!(json["iteration"], 2);
    }

    #[test]
    fn test_user_prompt_caps_file_tree() {
        let request = RepairRequest {
            error_log: "boom".to_string(),
            file_tree: (0..80).map(|i| format!("src/file_{i}.ts")).collect(),
            relevant_files: vec![],
            iteration: 1,
        };
        let prompt = user_prompt(&request);
        assert!(prompt.contains("src/file_49.ts"));
        assert!(!prompt.contains("src/file_50.ts"));
    }

    #[test]
    fn test_repair_error_display() {
        let err = RepairError::Api {
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error 401: unauthorized");
        assert!(RepairError::MissingApiKey.to_string().contains("--setup"));
    }
}
