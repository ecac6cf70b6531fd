//! Direct HTTP relay to a tenant's agent Service
//!
//! Messages reach the agent process over the tenant's stable Service DNS
//! name - the one the reconciler hands back on every deploy. There is no
//! exec tunnel in the path: the Service routes to whichever Pod currently
//! backs the workload, across redeploys.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::session::Turn;
use crate::{Error, Result, AGENT_QUERY_PATH};

/// Attempts for one query, counting the first
const DEFAULT_ATTEMPTS: u32 = 3;

/// Initial backoff between attempts
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Per-request timeout towards the agent
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Query posted to the agent's query endpoint
///
/// Mirrors the request model of the agent process running in each Pod.
#[derive(Clone, Debug, Serialize)]
pub struct AgentQuery {
    /// The user's message
    pub text: String,
    /// Tenant the message belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Recent exchanges supplied as context, oldest first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_history: Option<Vec<Turn>>,
    /// Whether the agent should weave the history into its answer
    pub use_conversation_context: bool,
}

/// Typed shape of a well-formed agent answer
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AgentAnswer {
    /// The agent's answer text
    pub response: String,
}

/// Decoded agent reply
///
/// The agent is expected to answer `{"response": ...}`, but anything it
/// actually sent is preserved: a body that does not match the schema is
/// passed through raw rather than guessed at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentReply {
    /// The body matched the typed schema
    Structured(AgentAnswer),
    /// Raw body passthrough for anything else
    Raw(String),
}

impl AgentReply {
    /// The answer text regardless of decode outcome
    pub fn text(&self) -> &str {
        match self {
            AgentReply::Structured(answer) => &answer.response,
            AgentReply::Raw(body) => body,
        }
    }
}

/// Decode an agent response body
///
/// Typed decode first; on mismatch, raw passthrough. An empty body is an
/// error - the agent always answers something when it is healthy.
pub fn decode_reply(body: &str) -> Result<AgentReply> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(Error::relay("agent returned an empty response"));
    }
    match serde_json::from_str::<AgentAnswer>(trimmed) {
        Ok(answer) => Ok(AgentReply::Structured(answer)),
        Err(_) => Ok(AgentReply::Raw(trimmed.to_string())),
    }
}

/// HTTP client for tenant agent Services
#[derive(Clone)]
pub struct AgentRelay {
    http: reqwest::Client,
    attempts: u32,
}

impl AgentRelay {
    /// Build a relay with the default timeout and retry policy
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(Error::relay)?;
        Ok(Self {
            http,
            attempts: DEFAULT_ATTEMPTS,
        })
    }

    /// Send a query to the agent behind `service_url` and decode the reply
    ///
    /// Connection-level failures are retried a bounded number of times
    /// with jittered backoff (a Pod mid-rollover briefly has no endpoint
    /// behind the Service). HTTP-level errors are not retried: the agent
    /// answered, and its answer was no.
    pub async fn query(&self, service_url: &str, query: &AgentQuery) -> Result<AgentReply> {
        let url = format!("{service_url}{AGENT_QUERY_PATH}");

        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 0u32;
        let response = loop {
            attempt += 1;
            match self.http.post(&url).json(query).send().await {
                Ok(response) => break response,
                Err(err) if attempt < self.attempts && (err.is_connect() || err.is_timeout()) => {
                    let jitter = rand::thread_rng().gen_range(0.5..1.5);
                    let backoff = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
                    warn!(
                        url = %url,
                        attempt = attempt,
                        error = %err,
                        delay_ms = backoff.as_millis(),
                        "agent unreachable, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    delay *= 2;
                }
                Err(err) => return Err(Error::relay(err)),
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::relay(format!("agent returned {status}")));
        }

        let body = response.text().await.map_err(Error::relay)?;
        debug!(url = %url, bytes = body.len(), "agent replied");
        decode_reply(&body)
    }
}
