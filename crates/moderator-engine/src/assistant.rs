use std::env;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use moderator_contracts::FailureKind;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const ASSISTANTS_BETA: &str = "assistants=v2";

#[derive(Debug, Clone)]
pub struct AssistantReply {
    pub text: String,
    pub elapsed: Duration,
}

/// Sends one image to a moderation assistant and waits for its reply.
///
/// Implementations make at most one attempt per call.
pub trait Assistant {
    fn invoke(&self, image_url: &str) -> Result<AssistantReply, InvokeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    Other(String),
}

impl RunStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "in_progress" => Self::InProgress,
            "requires_action" => Self::RequiresAction,
            "cancelling" => Self::Cancelling,
            "cancelled" => Self::Cancelled,
            "failed" => Self::Failed,
            "completed" => Self::Completed,
            "incomplete" => Self::Incomplete,
            "expired" => Self::Expired,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Expired => "expired",
            Self::Other(raw) => raw,
        }
    }

    /// The run will not change state without further input from us.
    /// `requires_action` counts: this client never submits tool outputs.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Failed
                | Self::Cancelled
                | Self::Expired
                | Self::Incomplete
                | Self::RequiresAction
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("assistant request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("assistant API returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("assistant API returned an unexpected payload: {0}")]
    InvalidResponse(String),
    #[error("assistant run ended with status {status}")]
    RunEnded { status: RunStatus },
    #[error("assistant run did not finish within {waited:.1?}")]
    Timeout { waited: Duration },
    #[error("assistant run completed without a text reply")]
    EmptyReply,
}

impl FailureKind for InvokeError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "HttpError",
            Self::Server { .. } => "ServerError",
            Self::InvalidResponse(_) => "InvalidResponse",
            Self::RunEnded { status } => match status {
                RunStatus::Failed => "RunFailed",
                RunStatus::Cancelled | RunStatus::Cancelling => "RunCancelled",
                RunStatus::Expired => "RunExpired",
                RunStatus::Incomplete => "RunIncomplete",
                RunStatus::RequiresAction => "RunRequiresAction",
                _ => "RunAborted",
            },
            Self::Timeout { .. } => "Timeout",
            Self::EmptyReply => "EmptyReply",
        }
    }
}

/// Identity, credentials and polling limits for the assistant.
#[derive(Clone)]
pub struct AssistantConfig {
    pub api_key: String,
    pub assistant_id: String,
    pub api_base: String,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl AssistantConfig {
    pub fn new(api_key: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            assistant_id: assistant_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            poll_interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(120),
        }
    }

    /// Read `OPENAI_API_KEY`, `ASSISTANT_ID`, `OPENAI_API_BASE`,
    /// `ASSISTANT_POLL_INTERVAL_SECS` and `ASSISTANT_MAX_WAIT_SECS`.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = non_empty_env("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
        let assistant_id = non_empty_env("ASSISTANT_ID").context("ASSISTANT_ID is not set")?;
        let mut config = Self::new(api_key, assistant_id);
        if let Some(base) = non_empty_env("OPENAI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        config.poll_interval = env_seconds("ASSISTANT_POLL_INTERVAL_SECS", 0.5, 0.1, 5.0);
        config.max_wait = env_seconds("ASSISTANT_MAX_WAIT_SECS", 120.0, 5.0, 1800.0);
        Ok(config)
    }
}

impl fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("api_key", &"<redacted>")
            .field("assistant_id", &self.assistant_id)
            .field("api_base", &self.api_base)
            .field("poll_interval", &self.poll_interval)
            .field("max_wait", &self.max_wait)
            .finish()
    }
}

/// OpenAI Assistants v2 client: one thread and run per image.
pub struct OpenAiAssistant {
    config: AssistantConfig,
    http: HttpClient,
}

impl OpenAiAssistant {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base, path.trim_start_matches('/'))
    }

    fn post_json(&self, path: &str, body: &Value) -> Result<Value, InvokeError> {
        let response = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(&self.config.api_key)
            .header("OpenAI-Beta", ASSISTANTS_BETA)
            .json(body)
            .send()?;
        response_json_or_error(response)
    }

    fn get_json(&self, path: &str) -> Result<Value, InvokeError> {
        let response = self
            .http
            .get(self.endpoint(path))
            .bearer_auth(&self.config.api_key)
            .header("OpenAI-Beta", ASSISTANTS_BETA)
            .send()?;
        response_json_or_error(response)
    }

    fn start_run(&self, image_url: &str) -> Result<RunHandle, InvokeError> {
        let body = run_request_body(&self.config.assistant_id, image_url);
        let payload = self.post_json("threads/runs", &body)?;
        RunHandle::from_payload(&payload)
    }

    fn refresh(&self, run: &RunHandle) -> Result<RunStatus, InvokeError> {
        let payload = self.get_json(&format!("threads/{}/runs/{}", run.thread_id, run.run_id))?;
        let status = string_field(&payload, "status")?;
        debug!(run_id = %run.run_id, status = %status, "polled assistant run");
        Ok(RunStatus::parse(&status))
    }

    fn cancel(&self, run: &RunHandle) {
        let path = format!("threads/{}/runs/{}/cancel", run.thread_id, run.run_id);
        if let Err(err) = self.post_json(&path, &json!({})) {
            warn!(run_id = %run.run_id, error = %err, "failed to cancel timed out run");
        }
    }

    fn latest_reply(&self, run: &RunHandle) -> Result<String, InvokeError> {
        let payload = self.get_json(&format!(
            "threads/{}/messages?order=desc&limit=20",
            run.thread_id
        ))?;
        extract_reply_text(&payload).ok_or(InvokeError::EmptyReply)
    }
}

impl Assistant for OpenAiAssistant {
    fn invoke(&self, image_url: &str) -> Result<AssistantReply, InvokeError> {
        let started = Instant::now();
        let run = self.start_run(image_url)?;
        debug!(thread_id = %run.thread_id, run_id = %run.run_id, "assistant run created");

        let status = match poll_until_terminal(
            run.status.clone(),
            self.config.poll_interval,
            self.config.max_wait,
            || self.refresh(&run),
        ) {
            Ok(status) => status,
            Err(err @ InvokeError::Timeout { .. }) => {
                self.cancel(&run);
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        if status != RunStatus::Completed {
            return Err(InvokeError::RunEnded { status });
        }

        let text = self.latest_reply(&run)?;
        Ok(AssistantReply {
            text,
            elapsed: started.elapsed(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RunHandle {
    thread_id: String,
    run_id: String,
    status: RunStatus,
}

impl RunHandle {
    fn from_payload(payload: &Value) -> Result<Self, InvokeError> {
        Ok(Self {
            thread_id: string_field(payload, "thread_id")?,
            run_id: string_field(payload, "id")?,
            status: RunStatus::parse(&string_field(payload, "status")?),
        })
    }
}

/// Refresh the run status until it is terminal or `max_wait` has passed.
fn poll_until_terminal<F>(
    mut status: RunStatus,
    poll_interval: Duration,
    max_wait: Duration,
    mut refresh: F,
) -> Result<RunStatus, InvokeError>
where
    F: FnMut() -> Result<RunStatus, InvokeError>,
{
    let started = Instant::now();
    loop {
        if status.is_terminal() {
            return Ok(status);
        }
        if started.elapsed() >= max_wait {
            return Err(InvokeError::Timeout {
                waited: started.elapsed(),
            });
        }
        thread::sleep(poll_interval);
        status = refresh()?;
    }
}

fn run_request_body(assistant_id: &str, image_url: &str) -> Value {
    json!({
        "assistant_id": assistant_id,
        "thread": {
            "messages": [{
                "role": "user",
                "content": [{
                    "type": "image_url",
                    "image_url": { "url": image_url },
                }],
            }],
        },
    })
}

/// First text part of the newest assistant message in a `order=desc` listing.
fn extract_reply_text(messages: &Value) -> Option<String> {
    messages
        .get("data")?
        .as_array()?
        .iter()
        .find(|message| message.get("role").and_then(Value::as_str) == Some("assistant"))?
        .get("content")?
        .as_array()?
        .iter()
        .find(|part| part.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|part| part.pointer("/text/value"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn string_field(payload: &Value, key: &str) -> Result<String, InvokeError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| InvokeError::InvalidResponse(format!("missing string field `{key}`")))
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, InvokeError> {
    let status = response.status();
    let body = response.text()?;
    if !status.is_success() {
        return Err(InvokeError::Server {
            status: status.as_u16(),
            body: truncate_text(&body, 512),
        });
    }
    serde_json::from_str(&body).map_err(|err| InvokeError::InvalidResponse(err.to_string()))
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_seconds(key: &str, default: f64, min: f64, max: f64) -> Duration {
    let seconds = non_empty_env(key)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max);
    Duration::from_secs_f64(seconds)
}
