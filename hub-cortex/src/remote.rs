//! Remote decision engine backed by an Anthropic-style messages endpoint.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use hub_config::LlmConfig;
use hub_proto::a2a::{message_data, message_text};
use hub_proto::pb::{AgentCard, Message, Role};
use hyper::body::to_bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Method, Request, Uri};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use crate::decision::{Decision, DecisionEngine, DecisionError, DecisionResult};
use crate::http::{build_https_client, HyperClient};

const API_VERSION: &str = "2023-06-01";
const MAX_DECISION_TOKENS: u32 = 1024;
const HISTORY_WINDOW: usize = 20;

const SYSTEM_PROMPT: &str = "You are Cortex, the orchestrator of a multi-agent system. \
Given the conversation so far, the agents currently registered, and a new event, decide \
what to do next. Respond with a single JSON object and nothing else: \
{\"reasoning\": string, \"actions\": [{\"type\": \"chat.response\", \"text\": string} | \
{\"type\": \"task.request\", \"task_type\": string, \"target_agent\": string, \
\"payload\": object}]}. Delegate to an agent only when one of its skills matches the \
request; otherwise answer with a chat.response.";

/// Decision engine that calls a remote model over HTTPS.
pub struct RemoteDecisionEngine {
    client: HyperClient,
    endpoint: Uri,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for RemoteDecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDecisionEngine")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl RemoteDecisionEngine {
    /// Constructs an engine from the supplied configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError::Configuration`] when the API key is missing
    /// or the endpoint does not parse.
    pub fn new(config: &LlmConfig) -> DecisionResult<Self> {
        let api_key = config
            .api_key()
            .ok_or_else(|| DecisionError::configuration("remote engine requires an API key"))?
            .to_owned();

        let base = config.base_url().trim_end_matches('/');
        let endpoint = format!("{base}/v1/messages")
            .parse::<Uri>()
            .map_err(|err| DecisionError::configuration(format!("invalid endpoint: {err}")))?;

        Ok(Self {
            client: build_https_client()?,
            endpoint,
            model: config.model().to_owned(),
            api_key,
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl DecisionEngine for RemoteDecisionEngine {
    async fn decide(
        &self,
        history: &[Message],
        agents: &[AgentCard],
        event: &Message,
    ) -> DecisionResult<Decision> {
        let prompt = render_prompt(history, agents, event);
        let payload = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_DECISION_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![ApiMessage {
                role: "user",
                content: prompt,
            }],
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|err| DecisionError::malformed(format!("encoding request: {err}")))?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .body(Body::from(body))
            .map_err(|err| DecisionError::transport(format!("building request: {err}")))?;

        let response = timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| DecisionError::transport("decision request timed out"))?
            .map_err(|err| DecisionError::transport(err.to_string()))?;

        let status = response.status();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| DecisionError::transport(err.to_string()))?;
        if !status.is_success() {
            return Err(DecisionError::transport(format!(
                "model endpoint returned {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        let parsed: MessagesResponse = serde_json::from_slice(&bytes)
            .map_err(|err| DecisionError::malformed(format!("decoding response: {err}")))?;
        let text: String = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect();
        debug!(model = %self.model, bytes = text.len(), "decision received");
        parse_decision(&text)
    }
}

fn render_prompt(history: &[Message], agents: &[AgentCard], event: &Message) -> String {
    let mut prompt = String::from("## Available agents\n");
    if agents.is_empty() {
        prompt.push_str("(none registered)\n");
    }
    for card in agents {
        prompt.push_str(&format!("- {}: {}\n", card.name, card.description));
        for skill in &card.skills {
            prompt.push_str(&format!("  - skill `{}`: {}", skill.name, skill.description));
            if !skill.examples.is_empty() {
                prompt.push_str(&format!(" (examples: {})", skill.examples.join("; ")));
            }
            prompt.push('\n');
        }
    }

    prompt.push_str("\n## Conversation so far\n");
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    if start > 0 {
        prompt.push_str(&format!("(earlier {start} messages elided)\n"));
    }
    for message in &history[start..] {
        prompt.push_str(&format!(
            "{}: {}\n",
            role_label(message),
            message_text(message)
        ));
    }

    prompt.push_str("\n## New event\n");
    prompt.push_str(&format!(
        "{}: {}\n",
        role_label(event),
        message_text(event)
    ));
    if let Some(data) = message_data(event) {
        prompt.push_str(&format!("payload: {data}\n"));
    }
    prompt
}

fn role_label(message: &Message) -> &'static str {
    match Role::try_from(message.role) {
        Ok(Role::Agent) => "agent",
        _ => "user",
    }
}

fn parse_decision(text: &str) -> DecisionResult<Decision> {
    let stripped = strip_fences(text);
    serde_json::from_str(stripped)
        .map_err(|err| DecisionError::malformed(format!("{err} in `{stripped}`")))
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}
