//! Client for the agent deployment's HTTP API.
//!
//! Speaks the LangGraph server surface the triage agent runs behind:
//! thread search, per-thread state and history, and the `runs/wait` resume
//! call that answers an interrupt. Auth is an optional bearer token; the
//! local dev server runs without one.

pub mod extract;
pub mod types;

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::utils::short_id;
use types::{ActionKind, ResponseKind, ThreadData};

/// How many interrupted threads one sweep asks for.
const SEARCH_LIMIT: u32 = 20;

/// Per-request timeout. `runs/wait` blocks until the graph resumes, so this
/// is generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Quick probe timeout for connectivity checks.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl AgentClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.get(url);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.post(url);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    // ─── Connectivity ────────────────────────────────────────────────────────

    /// Probe the deployment before starting. `/health` answering 200 wins;
    /// otherwise the base URL answering anything routable (200 or 404)
    /// counts, since older servers have no health endpoint.
    pub async fn verify_connectivity(&self) -> bool {
        let health = format!("{}/health", self.base_url);
        match self.get(&health).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                info!("Agent API healthy at {}", self.base_url);
                return true;
            }
            Ok(resp) => {
                debug!("Health probe answered {}, trying base URL", resp.status());
            }
            Err(e) => {
                debug!("Health probe failed ({e}), trying base URL");
            }
        }
        match self.get(&self.base_url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp)
                if resp.status() == StatusCode::OK || resp.status() == StatusCode::NOT_FOUND =>
            {
                info!("Agent API answering at {}", self.base_url);
                true
            }
            Ok(resp) => {
                warn!("Agent API at {} answered {}", self.base_url, resp.status());
                false
            }
            Err(e) => {
                error!("Could not reach agent API at {}: {e}", self.base_url);
                false
            }
        }
    }

    // ─── Interrupt Fetching ──────────────────────────────────────────────────

    /// List interrupted threads, falling back to a plain thread listing when
    /// the search endpoint is unavailable.
    async fn interrupted_threads(&self) -> Result<Vec<Value>> {
        let url = format!("{}/threads/search", self.base_url);
        let body = json!({ "status": "interrupted", "limit": SEARCH_LIMIT });
        let resp = self.post(&url).json(&body).send().await?;
        if resp.status() == StatusCode::OK {
            return Ok(resp.json().await?);
        }
        warn!(
            "Thread search answered {}, listing all threads instead",
            resp.status()
        );
        let resp = self
            .get(&format!("{}/threads", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn thread_state(&self, thread_id: &str) -> Result<Value> {
        let url = format!("{}/threads/{thread_id}/state", self.base_url);
        let resp = self.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Checkpoint history, used only to backfill extraction. Failures are
    /// logged and treated as no history.
    pub async fn thread_history(&self, thread_id: &str) -> Option<Vec<Value>> {
        let url = format!("{}/threads/{thread_id}/history", self.base_url);
        match self.get(&url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => resp.json().await.ok(),
            Ok(resp) => {
                debug!(
                    "History fetch for {} answered {}",
                    short_id(thread_id),
                    resp.status()
                );
                None
            }
            Err(e) => {
                debug!("History fetch for {} failed: {e}", short_id(thread_id));
                None
            }
        }
    }

    /// Fetch one thread and extract its presentable data.
    pub async fn fetch_interrupt(&self, thread_id: &str) -> Result<ThreadData> {
        let state = self.thread_state(thread_id).await?;
        let history = self.thread_history(thread_id).await;
        Ok(extract::thread_data(thread_id, &state, history.as_deref()))
    }

    /// Fetch every interrupted thread the deployment reports. Threads whose
    /// state cannot be fetched are logged and skipped rather than failing
    /// the whole sweep.
    pub async fn fetch_interrupts(&self) -> Result<Vec<ThreadData>> {
        let threads = self.interrupted_threads().await?;
        if threads.is_empty() {
            debug!("No interrupted threads");
            return Ok(Vec::new());
        }
        info!("Found {} interrupted thread(s)", threads.len());

        let mut out = Vec::new();
        for thread in &threads {
            let Some(thread_id) = thread.get("thread_id").and_then(Value::as_str) else {
                continue;
            };
            match self.fetch_interrupt(thread_id).await {
                Ok(data) => out.push(data),
                Err(e) => warn!("Skipping thread {}: {e}", short_id(thread_id)),
            }
        }
        Ok(out)
    }

    // ─── Responses ───────────────────────────────────────────────────────────

    /// Answer an interrupted thread.
    ///
    /// The response kind is validated against the action's allowed set
    /// before any network traffic. On HTTP 400 the resume item is retried
    /// flattened to the top level, the shape older deployments expect.
    pub async fn send_response(
        &self,
        thread_id: &str,
        kind: ResponseKind,
        content: &str,
        action: &ActionKind,
        assistant_id: Option<&str>,
    ) -> Result<()> {
        if !action.allowed_responses().contains(&kind) {
            return Err(Error::ResponseNotAllowed {
                action: action.as_str().to_string(),
                response: kind.as_str().to_string(),
            });
        }

        let payload = types::resume_payload(kind, content, action, assistant_id);
        let url = format!("{}/threads/{thread_id}/runs/wait", self.base_url);
        let resp = self.post(&url).json(&payload).send().await?;
        let status = resp.status();

        if status == StatusCode::OK {
            info!("Delivered {kind} to thread {}", short_id(thread_id));
            return Ok(());
        }
        if status == StatusCode::BAD_REQUEST {
            warn!(
                "Resume envelope rejected for thread {}, retrying flattened",
                short_id(thread_id)
            );
            let retry = self
                .post(&url)
                .json(&flatten_resume(&payload))
                .send()
                .await?
                .error_for_status()?;
            debug!("Flattened resume accepted with {}", retry.status());
            return Ok(());
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!("Agent API rejected credentials ({status}); check the api_key setting");
        } else if status == StatusCode::NOT_FOUND {
            error!("Thread {} not found on the deployment", short_id(thread_id));
        } else {
            error!("Resume call for thread {} failed with {status}", short_id(thread_id));
        }
        resp.error_for_status()?;
        Ok(())
    }
}

/// Rewrite the command envelope into the flat shape: the first resume item
/// promoted to the top level, keeping the assistant id.
fn flatten_resume(payload: &Value) -> Value {
    let mut flat = payload
        .pointer("/command/resume/0")
        .cloned()
        .unwrap_or_else(|| json!({}));
    if let Some(obj) = flat.as_object_mut() {
        if let Some(assistant) = payload.get("assistant_id") {
            obj.insert("assistant_id".to_string(), assistant.clone());
        }
    }
    flat
}
