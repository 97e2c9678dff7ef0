//! `RoutedModelClient`: dispatches chat completions to whichever provider
//! backs a TOML-declared model *group*.
//!
//! Grounded on `original_source/mxtoai/routed_litellm_model.py` for the
//! config shape (`[[model]]` entries keyed by `model_name` group,
//! `[router_config]`, the `LITELLM_CONFIG_PATH`/`LITELLM_DEFAULT_MODEL_GROUP`
//! env vars, the `thinking`-group stop-stripping, and the local-LLM
//! accommodation) and on a prior server's `mcp-agent-mail-tools/src/llm.rs`
//! for the HTTP/JSON mechanics (`HTTP_CLIENT` singleton, per-provider
//! endpoint resolution, the env-bridge alias table, tolerant JSON
//! extraction).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use handlemail_core::config::TIMEOUT_LLM_SECS;
use handlemail_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value as Json;

/// Canonical provider credential env keys and their accepted aliases.
/// `llm.rs::ENV_BRIDGE_MAPPINGS`.
const ENV_BRIDGE_MAPPINGS: &[(&str, &[&str])] = &[
    ("OPENAI_API_KEY", &["OPENAI_API_KEY"]),
    ("ANTHROPIC_API_KEY", &["ANTHROPIC_API_KEY"]),
    ("GROQ_API_KEY", &["GROQ_API_KEY"]),
    ("XAI_API_KEY", &["XAI_API_KEY", "GROK_API_KEY"]),
    ("GOOGLE_API_KEY", &["GOOGLE_API_KEY", "GEMINI_API_KEY"]),
    ("OPENROUTER_API_KEY", &["OPENROUTER_API_KEY"]),
    ("DEEPSEEK_API_KEY", &["DEEPSEEK_API_KEY"]),
];

/// Resolves a provider's API key, checking its canonical env var then each
/// alias in turn. The process's real environment is the only source
/// consulted — `.env` loading is the binary's job at startup (`dotenvy`),
/// not this lookup's.
fn provider_api_key(provider: &str) -> Option<String> {
    let canonical = match provider {
        "openai" => "OPENAI_API_KEY",
        "anthropic" => "ANTHROPIC_API_KEY",
        "groq" => "GROQ_API_KEY",
        "xai" => "XAI_API_KEY",
        "google" => "GOOGLE_API_KEY",
        "openrouter" => "OPENROUTER_API_KEY",
        "deepseek" => "DEEPSEEK_API_KEY",
        _ => return None,
    };
    let (_, aliases) = ENV_BRIDGE_MAPPINGS.iter().find(|(key, _)| *key == canonical)?;
    aliases.iter().find_map(|alias| std::env::var(alias).ok().filter(|v| !v.is_empty()))
}

#[derive(Debug, Clone, Deserialize)]
struct LiteLlmParams {
    model: String,
    #[serde(default)]
    api_base: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    api_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawModelEntry {
    model_name: String,
    litellm_params: LiteLlmParams,
    #[serde(default = "default_weight")]
    weight: u32,
}

const fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawRouterConfig {
    #[serde(default)]
    routing_strategy: Option<String>,
    #[serde(default)]
    fallbacks: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    model: Vec<RawModelEntry>,
    #[serde(default)]
    router_config: RawRouterConfig,
}

/// One model-group's weighted candidate endpoints, plus the group it falls
/// back to on failure.
#[derive(Debug, Clone)]
struct ModelGroup {
    entries: Vec<RawModelEntry>,
    total_weight: u32,
    fallback: Option<String>,
}

/// Token usage reported by (or defaulted for) a single `generate` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

/// A chat message in the wire shape every provider here accepts.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }

    #[must_use]
    pub fn tool(content: impl Into<String>) -> Self {
        Self { role: "tool".to_string(), content: content.into() }
    }
}

/// A tool exposed to the model in OpenAI-compatible function-calling shape.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Json,
}

/// A tool invocation the model asked for.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Json,
}

/// Outcome of one `generate` call.
#[derive(Debug, Clone)]
pub struct GenerateOutput {
    pub content: String,
    pub tool_call: Option<ToolCall>,
    pub usage: TokenUsage,
}

static HTTP_CLIENT: OnceLock<asupersync::http::h1::HttpClient> = OnceLock::new();

fn http_client() -> &'static asupersync::http::h1::HttpClient {
    HTTP_CLIENT.get_or_init(asupersync::http::h1::HttpClient::new)
}

/// Routes `generate` calls across model groups declared in a TOML file.
pub struct RoutedModelClient {
    groups: HashMap<String, ModelGroup>,
    default_group: String,
    round_robin: AtomicU64,
}

impl RoutedModelClient {
    /// Loads the TOML config named by `config_path` and validates
    /// `default_group` exists. Both failures are fatal at startup: an
    /// unreadable config is `ModelConfigMissing`, and the caller is expected
    /// to have already rejected a missing `default_group` env var as
    /// `DefaultModelGroupMissing` before this constructor runs.
    pub fn load(config_path: &str, default_group: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(config_path).map_err(|e| Error::ModelConfigMissing(format!("{config_path}: {e}")))?;
        let config: RawConfig = toml::from_str(&raw).map_err(|e| Error::ModelConfigMissing(format!("{config_path}: invalid TOML: {e}")))?;
        if config.model.is_empty() {
            return Err(Error::ModelConfigMissing(format!("{config_path}: no [[model]] entries")));
        }

        let mut groups: HashMap<String, ModelGroup> = HashMap::new();
        for entry in config.model {
            let group = groups.entry(entry.model_name.clone()).or_insert_with(|| ModelGroup {
                entries: Vec::new(),
                total_weight: 0,
                fallback: config.router_config.fallbacks.get(&entry.model_name).cloned(),
            });
            group.total_weight += entry.weight.max(1);
            group.entries.push(entry);
        }

        if default_group.is_empty() {
            return Err(Error::DefaultModelGroupMissing);
        }
        if !groups.contains_key(default_group) {
            return Err(Error::ModelConfigMissing(format!("default model group '{default_group}' has no [[model]] entries in {config_path}")));
        }

        Ok(Self { groups, default_group: default_group.to_string(), round_robin: AtomicU64::new(0) })
    }

    /// Picks the target group per the routing rule: the handle's
    /// `target_model_group` if non-empty, else the configured default.
    #[must_use]
    pub fn resolve_group<'a>(&'a self, target_model_group: &'a str) -> &'a str {
        if target_model_group.is_empty() {
            &self.default_group
        } else {
            target_model_group
        }
    }

    /// Selects one weighted entry from a group. `simple-shuffle`'s effect
    /// (distribute calls across weighted candidates without favoring one)
    /// is approximated here with a weighted round-robin counter rather than
    /// an RNG draw, since no randomness crate is otherwise part of this
    /// stack; see DESIGN.md.
    fn pick_entry<'a>(&self, group: &'a ModelGroup) -> &'a RawModelEntry {
        if group.entries.len() == 1 {
            return &group.entries[0];
        }
        let ticket = self.round_robin.fetch_add(1, Ordering::Relaxed) % u64::from(group.total_weight.max(1));
        let mut remaining = ticket;
        for entry in &group.entries {
            let weight = u64::from(entry.weight.max(1));
            if remaining < weight {
                return entry;
            }
            remaining -= weight;
        }
        group.entries.last().unwrap_or(&group.entries[0])
    }

    /// Dispatches a chat completion to `target_group` (or the default if
    /// empty), applying the `thinking`-group stop-stripping and local-LLM
    /// accommodation.
    pub async fn generate(
        &self,
        _cx: &asupersync::Cx,
        messages: &[ChatMessage],
        target_group: &str,
        stop: Option<&[String]>,
        tools: Option<&[ToolSpec]>,
    ) -> Result<GenerateOutput> {
        let group_name = self.resolve_group(target_group);
        let group = self.groups.get(group_name).ok_or_else(|| Error::ModelRouterError(format!("unknown model group '{group_name}'")))?;
        let entry = self.pick_entry(group);

        let is_local = group_name.starts_with("ollama")
            || entry.litellm_params.api_base.as_deref().is_some_and(|base| base.contains("localhost") || base.contains("127.0.0.1"));

        let effective_stop = if group_name == "thinking" { None } else { stop };
        // Local backends (ollama / localhost) don't get function-calling
        // tool specs — most don't implement the protocol reliably.
        let effective_tools = if is_local { None } else { tools };

        let (url, auth_header, api_model) = resolve_api_endpoint(&entry.litellm_params, entry.litellm_params.api_key.as_deref())?;
        let is_anthropic = url.contains("api.anthropic.com");

        let body = build_request_body(&api_model, &messages.iter().collect::<Vec<_>>(), effective_stop, effective_tools, is_anthropic);
        let body_bytes = serde_json::to_vec(&body)?;

        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if is_anthropic {
            headers.push(("x-api-key".to_string(), auth_header.replace("Bearer ", "")));
            headers.push(("anthropic-version".to_string(), "2023-06-01".to_string()));
        } else {
            headers.push(("Authorization".to_string(), auth_header));
        }

        let request = Box::pin(http_client().request(asupersync::http::h1::Method::Post, &url, headers, body_bytes));
        let response = match asupersync::time::timeout(asupersync::time::wall_now(), std::time::Duration::from_secs(TIMEOUT_LLM_SECS), request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(Error::ModelRouterError(format!("transport failure calling {url}: {e}"))),
            Err(_) => return Err(Error::ModelRouterError(format!("timed out after {TIMEOUT_LLM_SECS}s calling {url}"))),
        };

        if response.status != 200 {
            return Err(Error::ModelRouterError(format!("{url} returned status {}: {}", response.status, String::from_utf8_lossy(&response.body))));
        }

        let parsed: Json = parse_json_safely(&String::from_utf8_lossy(&response.body))
            .ok_or_else(|| Error::ModelRouterError("could not parse model response as JSON".to_string()))?;

        Ok(extract_output(&parsed, is_anthropic))
    }
}

fn resolve_api_endpoint(params: &LiteLlmParams, explicit_key: Option<&str>) -> Result<(String, String, String)> {
    let (provider, api_model) = match params.model.split_once('/') {
        Some((provider, rest)) => (provider, rest),
        None => ("openai", params.model.as_str()),
    };

    if let Some(base) = &params.api_base {
        let key = explicit_key.map(str::to_string).or_else(|| provider_api_key(provider)).unwrap_or_default();
        return Ok((base.clone(), format!("Bearer {key}"), api_model.to_string()));
    }

    let key = explicit_key.map(str::to_string).or_else(|| provider_api_key(provider));
    match provider {
        "openai" => Ok(("https://api.openai.com/v1/chat/completions".to_string(), format!("Bearer {}", require_key(key, &params.model)?), api_model.to_string())),
        "anthropic" => Ok(("https://api.anthropic.com/v1/messages".to_string(), format!("Bearer {}", require_key(key, &params.model)?), api_model.to_string())),
        "google" => Ok((
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions".to_string(),
            format!("Bearer {}", require_key(key, &params.model)?),
            api_model.to_string(),
        )),
        "groq" => Ok(("https://api.groq.com/openai/v1/chat/completions".to_string(), format!("Bearer {}", require_key(key, &params.model)?), api_model.to_string())),
        "deepseek" => Ok(("https://api.deepseek.com/v1/chat/completions".to_string(), format!("Bearer {}", require_key(key, &params.model)?), api_model.to_string())),
        "xai" => Ok(("https://api.x.ai/v1/chat/completions".to_string(), format!("Bearer {}", require_key(key, &params.model)?), api_model.to_string())),
        "openrouter" => Ok(("https://openrouter.ai/api/v1/chat/completions".to_string(), format!("Bearer {}", require_key(key, &params.model)?), api_model.to_string())),
        "ollama" => Ok(("http://localhost:11434/v1/chat/completions".to_string(), "Bearer ollama".to_string(), api_model.to_string())),
        "azure" => {
            let base = std::env::var("AZURE_OPENAI_ENDPOINT").map_err(|_| Error::ModelRouterError("azure model configured without api_base or AZURE_OPENAI_ENDPOINT".to_string()))?;
            Ok((base, format!("Bearer {}", require_key(key, &params.model)?), api_model.to_string()))
        }
        other => Err(Error::ModelRouterError(format!("unknown model provider '{other}' in litellm_params.model '{}'", params.model))),
    }
}

fn require_key(key: Option<String>, model: &str) -> Result<String> {
    key.ok_or_else(|| Error::ModelRouterError(format!("no API key configured for model '{model}'")))
}

fn build_request_body(model: &str, messages: &[&ChatMessage], stop: Option<&[String]>, tools: Option<&[ToolSpec]>, is_anthropic: bool) -> Json {
    if is_anthropic {
        let system = messages.iter().find(|m| m.role == "system").map_or(String::new(), |m| m.content.clone());
        let conversation: Vec<Json> = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| serde_json::json!({"role": if m.role == "assistant" { "assistant" } else { "user" }, "content": m.content}))
            .collect();
        let mut body = serde_json::json!({"model": model, "system": system, "messages": conversation, "max_tokens": 4096});
        if let Some(stop) = stop {
            body["stop_sequences"] = Json::from(stop.to_vec());
        }
        return body;
    }

    let conversation: Vec<Json> = messages.iter().map(|m| serde_json::json!({"role": m.role, "content": m.content})).collect();
    let mut body = serde_json::json!({"model": model, "messages": conversation});
    if let Some(stop) = stop {
        body["stop"] = Json::from(stop.to_vec());
    }
    if let Some(tools) = tools {
        body["tools"] = Json::from(
            tools
                .iter()
                .map(|t| serde_json::json!({"type": "function", "function": {"name": t.name, "description": t.description, "parameters": t.parameters}}))
                .collect::<Vec<_>>(),
        );
    }
    body
}

fn extract_output(parsed: &Json, is_anthropic: bool) -> GenerateOutput {
    if is_anthropic {
        let content = parsed.get("content").and_then(|c| c.get(0)).and_then(|c| c.get("text")).and_then(Json::as_str).unwrap_or("").to_string();
        let usage = TokenUsage {
            prompt: parsed.get("usage").and_then(|u| u.get("input_tokens")).and_then(Json::as_u64).unwrap_or(0),
            completion: parsed.get("usage").and_then(|u| u.get("output_tokens")).and_then(Json::as_u64).unwrap_or(0),
            total: 0,
        };
        let usage = TokenUsage { total: usage.prompt + usage.completion, ..usage };
        return GenerateOutput { content, tool_call: None, usage };
    }

    let message = parsed.get("choices").and_then(|c| c.get(0)).and_then(|c| c.get("message"));
    let content = message.and_then(|m| m.get("content")).and_then(Json::as_str).unwrap_or("").to_string();
    let tool_call = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(|tc| tc.get(0))
        .and_then(|tc| tc.get("function"))
        .and_then(|f| {
            let name = f.get("name").and_then(Json::as_str)?.to_string();
            let args_raw = f.get("arguments").and_then(Json::as_str).unwrap_or("{}");
            let arguments = parse_json_safely(args_raw).unwrap_or(Json::Object(serde_json::Map::new()));
            Some(ToolCall { name, arguments })
        });

    let usage = parsed.get("usage").map_or(TokenUsage::default(), |u| TokenUsage {
        prompt: u.get("prompt_tokens").and_then(Json::as_u64).unwrap_or(0),
        completion: u.get("completion_tokens").and_then(Json::as_u64).unwrap_or(0),
        total: u.get("total_tokens").and_then(Json::as_u64).unwrap_or(0),
    });

    GenerateOutput { content, tool_call, usage }
}

/// Tolerant JSON extraction for model output that may be wrapped in prose
/// or a fenced code block. `llm.rs::parse_json_safely`.
#[must_use]
pub fn parse_json_safely(text: &str) -> Option<Json> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }
    if let Some(v) = extract_fenced_json(trimmed) {
        return Some(v);
    }
    extract_brace_json(trimmed)
}

fn extract_fenced_json(text: &str) -> Option<Json> {
    for marker in ["```json\n", "```json\r\n", "```\n", "```\r\n"] {
        if let Some(start) = text.find(marker) {
            let content_start = start + marker.len();
            if let Some(end_rel) = text[content_start..].find("```") {
                let content = text[content_start..content_start + end_rel].trim();
                if let Ok(v) = serde_json::from_str(content) {
                    return Some(v);
                }
            }
        }
    }
    None
}

fn extract_brace_json(text: &str) -> Option<Json> {
    let open = text.find('{')?;
    let close = text.rfind('}')?;
    if close <= open {
        return None;
    }
    serde_json::from_str(&text[open..=close]).ok()
}
