//! The HTTP surface: `POST /process-email`, `POST /suggestions`,
//! `GET /user`, `GET /health`.
//!
//! Built directly on `asupersync::http::h1`, the same raw-HTTP-server idiom
//! used elsewhere in this codebase's corpus, rather than pulling in a
//! framework for four routes. No CORS layer: `original_source/mxgo/api.py`
//! never configures one for these endpoints either, so there's nothing to
//! port.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use asupersync::http::h1::listener::Http1Listener;
use asupersync::http::h1::types::{
    Method as Http1Method, Request as Http1Request, Response as Http1Response, default_reason,
};
use asupersync::runtime::RuntimeBuilder;
use asupersync::time::wall_now;
use asupersync::{Budget, Cx};
use bytes::Bytes;
use chrono::NaiveDateTime;
use handlemail_agent::model_client::parse_json_safely;
use handlemail_agent::{ChatMessage, HandleResolver, RoutedModelClient};
use handlemail_core::config::Config;
use handlemail_core::models::{EmailAttachment, EmailRequest};
use handlemail_core::{Error, Result};
use handlemail_db::{DbPool, DbPoolConfig, WhitelistStore, WorkQueueStore};
use handlemail_kv::{IdempotencyStore, KvClient, RateLimiter};
use handlemail_tools::{PlanOracle, UnconfiguredPlanOracle};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::delivery::{EmailDeliverer, LoggingDeliverer, WebhookDeliverer};
use crate::validators::{Validators, Verdict};

const MIN_SUGGESTIONS: usize = 3;
const MAX_SUGGESTIONS: usize = 7;

/// Everything a route handler needs, built once at startup and shared
/// behind an `Arc` across every connection `Http1Listener` hands in.
pub struct AppState {
    config: Config,
    rate_limiter: RateLimiter,
    whitelist: WhitelistStore,
    idempotency: IdempotencyStore,
    handles: HandleResolver,
    plan_oracle: Box<dyn PlanOracle>,
    deliverer: Box<dyn EmailDeliverer>,
    work_queue: WorkQueueStore,
    suggestions_model: RoutedModelClient,
    db_pool: DbPool,
}

impl AppState {
    /// Connects to the KV store (twice — `KvClient` isn't `Clone`, and the
    /// rate limiter and idempotency store each need their own connection)
    /// and the database pool, then loads the model config.
    pub async fn connect(cx: &Cx, config: Config) -> Result<Self> {
        let rate_limit_kv = KvClient::connect(cx, &config.kv_url()).await?;
        let idempotency_kv = KvClient::connect(cx, &config.kv_url()).await?;

        let db_pool = DbPool::new(&DbPoolConfig::from_database_url(config.database_url()))
            .map_err(|e| Error::Internal(format!("db pool init failed: {e}")))?;

        // No outbound-relay URL in `Config` yet; `webhook_deliverer` below is
        // wired in here once one exists. Every environment logs instead of
        // sending in the meantime.
        let deliverer: Box<dyn EmailDeliverer> = Box::new(LoggingDeliverer);

        let suggestions_model = RoutedModelClient::load(&config.model_config_path, &config.suggestions_model_group)?;

        Ok(Self {
            rate_limiter: RateLimiter::new(rate_limit_kv),
            whitelist: WhitelistStore::new(db_pool.clone()),
            idempotency: IdempotencyStore::new(idempotency_kv),
            handles: HandleResolver::with_defaults(),
            plan_oracle: Box::new(UnconfiguredPlanOracle),
            deliverer,
            work_queue: WorkQueueStore::new(db_pool.clone()),
            suggestions_model,
            db_pool,
            config,
        })
    }

    fn validators(&self) -> Validators<'_> {
        Validators {
            config: &self.config,
            rate_limiter: &self.rate_limiter,
            whitelist: &self.whitelist,
            idempotency: &self.idempotency,
            handles: &self.handles,
            plan_oracle: self.plan_oracle.as_ref(),
            deliverer: self.deliverer.as_ref(),
        }
    }
}

/// Allow callers to wire in a relay URL once one exists in `Config`,
/// without every call site needing to know the logging fallback exists.
#[allow(dead_code)]
fn webhook_deliverer(endpoint: String, api_key: Option<String>) -> Box<dyn EmailDeliverer> {
    Box::new(WebhookDeliverer::new(endpoint, api_key))
}

fn split_path_query(uri: &str) -> (String, Option<String>) {
    let mut parts = uri.splitn(2, '?');
    let path = parts.next().unwrap_or("/").to_string();
    let query = parts.next().map(std::string::ToString::to_string);
    (path, query)
}

fn header_value<'a>(req: &'a Http1Request, name: &str) -> Option<&'a str> {
    let name = name.to_lowercase();
    req.headers.iter().find(|(k, _)| k.to_lowercase() == name).map(|(_, v)| v.as_str())
}

fn parse_bearer_token(req: &Http1Request) -> std::result::Result<&str, ()> {
    crate::auth::parse_bearer(header_value(req, "authorization")).map_err(|_| ())
}

fn error_response(status: u16, message: &str) -> Http1Response {
    json_response(status, &json!({ "detail": message }))
}

fn json_response(status: u16, value: &serde_json::Value) -> Http1Response {
    raw_response(status, "application/json", serde_json::to_vec(value).unwrap_or_default())
}

fn raw_response(status: u16, content_type: &str, body: Vec<u8>) -> Http1Response {
    let mut resp = Http1Response::new(status, default_reason(status), body);
    resp.headers.push(("content-type".to_string(), content_type.to_string()));
    resp
}

/// Translate a pipeline/queue error into the stable `status` value and HTTP
/// status code `original_source/mxgo/api.py`'s `create_error_response` and
/// its callers settle on.
fn error_status(err: &Error) -> (u16, &'static str) {
    match err {
        Error::InvalidApiKey | Error::InvalidBearerToken => (401, "error"),
        Error::AttachmentTooLarge { .. } | Error::TooManyAttachments { .. } | Error::UnsupportedAttachment { .. } => {
            (400, "error")
        }
        Error::RateLimitExceeded { .. } => (429, "error"),
        Error::NotWhitelisted { .. } => (403, "error"),
        Error::UnsupportedHandle(_) => (400, "error"),
        Error::DuplicateQueued(_) => (409, "duplicate_queued"),
        Error::DuplicateProcessed(_) => (409, "duplicate_processed"),
        _ => (500, "error"),
    }
}

fn request_cx(timeout_secs: u64) -> Cx {
    let budget = if timeout_secs == 0 {
        Budget::INFINITE
    } else {
        Budget::new().with_deadline(wall_now() + Duration::from_secs(timeout_secs))
    };
    Cx::for_request_with_budget(budget)
}

// ---------------------------------------------------------------------------
// POST /process-email
// ---------------------------------------------------------------------------

/// Attachment filename ceilings. `original_source/mxgo/api.py`'s
/// `handle_file_attachments` truncates before appending the extension back
/// on, so the budget has to leave room for it.
const MAX_FILENAME_LENGTH: usize = 100;
const FILENAME_TRUNCATE_BUFFER: usize = 5;

fn sanitize_filename(name: &str) -> String {
    let base = std::path::Path::new(name).file_name().and_then(|s| s.to_str()).unwrap_or("attachment");
    if base.len() <= MAX_FILENAME_LENGTH {
        return base.to_string();
    }
    let (stem, ext) = base.rsplit_once('.').map_or((base, ""), |(s, e)| (s, e));
    let budget = MAX_FILENAME_LENGTH.saturating_sub(ext.len() + 1 + FILENAME_TRUNCATE_BUFFER);
    let truncated_stem: String = stem.chars().take(budget).collect();
    if ext.is_empty() { truncated_stem } else { format!("{truncated_stem}.{ext}") }
}

struct MultipartField {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

async fn parse_multipart(req: &Http1Request) -> Result<Vec<MultipartField>> {
    let content_type = header_value(req, "content-type").ok_or_else(|| Error::Internal("missing content-type".into()))?;
    let boundary = multer::parse_boundary(content_type).map_err(|e| Error::Internal(format!("bad multipart boundary: {e}")))?;
    let body = Bytes::from(req.body.clone());
    let stream = futures_util::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| Error::Internal(format!("multipart parse error: {e}")))? {
        let name = field.name().unwrap_or("").to_string();
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(|m| m.to_string());
        let bytes = field.bytes().await.map_err(|e| Error::Internal(format!("multipart field read error: {e}")))?.to_vec();
        fields.push(MultipartField { name, filename, content_type, bytes });
    }
    Ok(fields)
}

fn field_text<'a>(fields: &'a [MultipartField], name: &str) -> Option<&'a str> {
    fields.iter().find(|f| f.name == name).and_then(|f| std::str::from_utf8(&f.bytes).ok())
}

fn build_email_request(fields: &[MultipartField]) -> Result<EmailRequest> {
    let from_email = field_text(fields, "from_email").ok_or_else(|| Error::Internal("missing from_email".into()))?.to_string();
    let to_email = field_text(fields, "to").ok_or_else(|| Error::Internal("missing to".into()))?.to_string();
    let subject = field_text(fields, "subject").unwrap_or("").to_string();
    let text_body = field_text(fields, "textContent").unwrap_or("").to_string();
    let html_body = field_text(fields, "htmlContent").filter(|s| !s.is_empty()).map(str::to_string);
    let message_id = field_text(fields, "messageId").unwrap_or("").to_string();
    let date = field_text(fields, "date").and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok());

    let headers: BTreeMap<String, String> = field_text(fields, "rawHeaders")
        .and_then(|raw| match serde_json::from_str(raw) {
            Ok(map) => Some(map),
            Err(e) => {
                tracing::warn!(error = %e, "rawHeaders was not valid JSON; ignoring");
                None
            }
        })
        .unwrap_or_default();

    let scheduled_task_id = field_text(fields, "scheduled_task_id").and_then(|s| Uuid::parse_str(s).ok());

    let attachments = fields
        .iter()
        .filter(|f| f.name == "files[]" || f.name == "files")
        .map(|f| EmailAttachment {
            filename: f.filename.clone().unwrap_or_else(|| "attachment".to_string()),
            content_type: f.content_type.clone().unwrap_or_else(|| "application/octet-stream".to_string()),
            size_bytes: f.bytes.len() as u64,
            content: Some(f.bytes.clone()),
            stored_path: None,
        })
        .collect();

    Ok(EmailRequest {
        message_id,
        from_email,
        to_email,
        subject,
        text_body,
        html_body,
        date,
        in_reply_to: None,
        references: Vec::new(),
        cc: Vec::new(),
        bcc: None,
        headers,
        attachments,
        // Re-injected scheduled firings bypass this HTTP endpoint and call
        // `WorkQueueStore::enqueue` directly, stamping both fields together;
        // an HTTP-originated request never carries a parent linkage.
        scheduled_task_id,
        parent_message_id: None,
        distilled_instructions: None,
        distilled_alias: None,
    })
}

/// Persist accepted attachments under `{data_dir}/attachments/{message_id}/`
/// and clear their inline bytes before the request is serialized into the
/// work queue. Synchronous `std::fs` calls, matching the pattern the
/// storage layer elsewhere in this codebase uses for on-disk I/O inside
/// async call paths.
fn persist_attachments(data_dir: &str, req: &mut EmailRequest) -> Result<()> {
    if req.attachments.is_empty() {
        return Ok(());
    }
    let dir = std::path::Path::new(data_dir).join("attachments").join(&req.message_id);
    std::fs::create_dir_all(&dir)?;
    for attachment in &mut req.attachments {
        let Some(bytes) = attachment.content.take() else { continue };
        let safe_name = sanitize_filename(&attachment.filename);
        let path = dir.join(&safe_name);
        std::fs::write(&path, &bytes)?;
        attachment.stored_path = Some(path.to_string_lossy().into_owned());
    }
    Ok(())
}

async fn handle_process_email(state: &AppState, req: &Http1Request) -> Http1Response {
    let Some(api_key) = header_value(req, "x-api-key") else {
        return error_response(401, "missing x-api-key header");
    };

    let fields = match parse_multipart(req).await {
        Ok(f) => f,
        Err(e) => return error_response(400, &e.to_string()),
    };
    let mut email_request = match build_email_request(&fields) {
        Ok(r) => r,
        Err(e) => return error_response(400, &e.to_string()),
    };

    let cx = request_cx(handlemail_core::config::TIMEOUT_DB_SECS);
    let instructions = match state.validators().run(&cx, api_key, &mut email_request).await {
        Ok(Verdict::Skipped) => {
            return json_response(200, &json!({ "status": "skipped", "email_id": email_request.message_id }));
        }
        Ok(Verdict::Accepted(instructions)) => instructions,
        Err(e) => {
            let (status, kind) = error_status(&e);
            return json_response(
                status,
                &json!({ "status": kind, "email_id": email_request.message_id, "detail": e.to_string() }),
            );
        }
    };

    if instructions.process_attachments {
        if let Err(e) = persist_attachments(&state.config.data_dir, &mut email_request) {
            tracing::error!(error = %e, "failed to persist attachments");
            return error_response(500, "failed to store attachments");
        }
    } else {
        for attachment in &mut email_request.attachments {
            attachment.content = None;
        }
    }

    let job_id = Uuid::new_v4();
    if let Err(e) = state.work_queue.enqueue(&cx, job_id, &email_request).await {
        tracing::error!(error = %e, "failed to enqueue email");
        return error_response(500, "failed to enqueue email");
    }

    json_response(200, &json!({ "status": "processing", "email_id": email_request.message_id }))
}

// ---------------------------------------------------------------------------
// POST /suggestions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EmailSuggestionAttachmentSummary {
    filename: String,
    file_type: Option<String>,
    file_size: u64,
}

#[derive(Debug, Deserialize)]
struct EmailSuggestionRequest {
    email_identified: String,
    user_email_id: String,
    sender_email: String,
    #[serde(default)]
    cc_emails: Vec<String>,
    subject: String,
    email_content: String,
    #[serde(default)]
    attachments: Vec<EmailSuggestionAttachmentSummary>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct SuggestionDetail {
    suggestion_title: String,
    suggestion_id: String,
    suggestion_to_email: String,
    #[serde(default)]
    suggestion_cc_emails: Vec<String>,
    suggestion_email_instructions: String,
}

#[derive(Debug, Serialize)]
struct EmailSuggestionResponse {
    email_identified: String,
    user_email_id: String,
    overview: String,
    suggestions: Vec<SuggestionDetail>,
}

fn default_suggestion(domain: &str) -> SuggestionDetail {
    SuggestionDetail {
        suggestion_title: "Ask anything".to_string(),
        suggestion_id: Uuid::new_v4().to_string(),
        suggestion_to_email: format!("ask@{domain}"),
        suggestion_cc_emails: Vec::new(),
        suggestion_email_instructions: String::new(),
    }
}

/// Falls back to the `ask` handle's address when the model suggested a
/// local-part that isn't one of the canonical handles or their aliases.
fn validate_suggestion_to_email(handles: &HandleResolver, suggested: &str, domain: &str) -> String {
    let local = suggested.split('@').next().unwrap_or("");
    if handles.resolve(local).is_some() {
        suggested.to_string()
    } else {
        format!("ask@{domain}")
    }
}

fn suggestion_prompt(req: &EmailSuggestionRequest, known_handles: &[&str]) -> Vec<ChatMessage> {
    let attachments_desc = if req.attachments.is_empty() {
        "none".to_string()
    } else {
        req.attachments
            .iter()
            .map(|a| format!("{} ({}, {} bytes)", a.filename, a.file_type.as_deref().unwrap_or("unknown"), a.file_size))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let system = format!(
        "You suggest {min}-{max} quick-reply actions for an inbound email, each routed to one \
         of this system's handles: {handles}. Respond with a single valid JSON object only, \
         shaped as {{\"overview\": string, \"suggestions\": [{{\"suggestion_title\": string, \
         \"suggestion_to_email\": string, \"suggestion_cc_emails\": [string], \
         \"suggestion_email_instructions\": string}}]}}. Do not wrap the JSON in prose or \
         markdown fences.",
        min = MIN_SUGGESTIONS,
        max = MAX_SUGGESTIONS,
        handles = known_handles.join(", "),
    );
    let user = format!(
        "From: {sender}\nTo: {to}\nCc: {cc}\nSubject: {subject}\nAttachments: {attachments}\n\n{body}",
        sender = req.sender_email,
        to = req.user_email_id,
        cc = req.cc_emails.join(", "),
        subject = req.subject,
        attachments = attachments_desc,
        body = req.email_content,
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

async fn generate_suggestions(
    state: &AppState,
    cx: &Cx,
    req: &EmailSuggestionRequest,
) -> (String, Vec<SuggestionDetail>) {
    let domain = req.user_email_id.split('@').nth(1).unwrap_or("handlemail.example");
    let known_handles = HandleResolver::canonical_handles();
    let messages = suggestion_prompt(req, &known_handles);

    let generated = match state.suggestions_model.generate(cx, &messages, &state.config.suggestions_model_group, None, None).await {
        Ok(output) => parse_json_safely(&output.content),
        Err(e) => {
            tracing::warn!(error = %e, "suggestion generation failed; falling back to defaults");
            None
        }
    };

    let (overview, mut suggestions) = match generated {
        Some(value) => {
            let overview = value.get("overview").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let suggestions: Vec<SuggestionDetail> = value
                .get("suggestions")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|item| {
                            let to_email = item.get("suggestion_to_email")?.as_str()?;
                            Some(SuggestionDetail {
                                suggestion_title: item.get("suggestion_title")?.as_str()?.to_string(),
                                suggestion_id: Uuid::new_v4().to_string(),
                                suggestion_to_email: validate_suggestion_to_email(&state.handles, to_email, domain),
                                suggestion_cc_emails: item
                                    .get("suggestion_cc_emails")
                                    .and_then(|v| v.as_array())
                                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                                    .unwrap_or_default(),
                                suggestion_email_instructions: item
                                    .get("suggestion_email_instructions")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("")
                                    .to_string(),
                            })
                        })
                        .take(MAX_SUGGESTIONS)
                        .collect()
                })
                .unwrap_or_default();
            (overview, suggestions)
        }
        None => (String::new(), Vec::new()),
    };

    if suggestions.len() < MAX_SUGGESTIONS {
        suggestions.push(default_suggestion(domain));
    }
    while suggestions.len() < MIN_SUGGESTIONS {
        suggestions.push(default_suggestion(domain));
    }
    (overview, suggestions)
}

async fn handle_suggestions(state: &AppState, req: &Http1Request) -> Http1Response {
    let Ok(token) = parse_bearer_token(req) else {
        return error_response(401, "missing or malformed Authorization header");
    };
    if crate::auth::verify(&state.config.jwt_secret, token).is_err() {
        return error_response(401, "invalid or expired token");
    }

    let requests: Vec<EmailSuggestionRequest> = match serde_json::from_slice(&req.body) {
        Ok(r) => r,
        Err(e) => return error_response(400, &format!("invalid request body: {e}")),
    };

    let cx = request_cx(handlemail_core::config::TIMEOUT_LLM_SECS);
    let mut responses = Vec::with_capacity(requests.len());
    for item in &requests {
        let (overview, suggestions) = generate_suggestions(state, &cx, item).await;
        responses.push(EmailSuggestionResponse {
            email_identified: item.email_identified.clone(),
            user_email_id: item.user_email_id.clone(),
            overview,
            suggestions,
        });
    }

    json_response(200, &serde_json::to_value(responses).unwrap_or_default())
}

// ---------------------------------------------------------------------------
// GET /user
// ---------------------------------------------------------------------------

async fn handle_user(state: &AppState, req: &Http1Request) -> Http1Response {
    let Ok(token) = parse_bearer_token(req) else {
        return error_response(401, "missing or malformed Authorization header");
    };
    let claims = match crate::auth::verify(&state.config.jwt_secret, token) {
        Ok(c) => c,
        Err(_) => return error_response(401, "invalid or expired token"),
    };

    let cx = request_cx(handlemail_core::config::TIMEOUT_KV_SECS);
    let plan = state.plan_oracle.plan_for(&claims.email);
    let limits = plan.limits();
    let usage = state.rate_limiter.current_usage(&cx, &claims.email, plan).await;

    let period = |name: &str, max: u32, current: i64| {
        json!({ "period_name": name, "max_usage_allowed": max, "current_usage": current })
    };

    json_response(
        200,
        &json!({
            "subscription_info": {},
            "plan_name": plan.as_str(),
            "usage_info": {
                "hour": period("hour", limits.hour, usage.hour),
                "day": period("day", limits.day, usage.day),
                "month": period("month", limits.month, usage.month),
            },
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// This deployment has no separate broker process: `WorkQueueStore` rides
/// the same SQL pool as everything else, so the `rabbitmq` key the original
/// source reports is renamed to `queue` here and probed the same way as
/// `database` — by checking whether a connection can still be acquired.
async fn handle_health(state: &AppState, cx: &Cx) -> Http1Response {
    let db_ok = matches!(state.db_pool.acquire(cx).await, asupersync::Outcome::Ok(_));
    let queue_status = if db_ok { "connected" } else { "error" };
    let database_status = if db_ok { "connected" } else { "error" };
    let status = if db_ok { "healthy" } else { "unhealthy" };
    json_response(
        200,
        &json!({
            "status": status,
            "services": { "queue": queue_status, "database": database_status },
        }),
    )
}

// ---------------------------------------------------------------------------
// Dispatch & bootstrap
// ---------------------------------------------------------------------------

async fn handle(state: &Arc<AppState>, req: Http1Request) -> Http1Response {
    let (path, _query) = split_path_query(&req.uri);
    let is_post = matches!(req.method, Http1Method::Post);
    let is_get = matches!(req.method, Http1Method::Get);

    match path.as_str() {
        "/process-email" if is_post => handle_process_email(state, &req).await,
        "/suggestions" if is_post => handle_suggestions(state, &req).await,
        "/user" if is_get => handle_user(state, &req).await,
        "/health" | "/healthz" if is_get => {
            handle_health(state, &request_cx(handlemail_core::config::TIMEOUT_DB_SECS)).await
        }
        _ => error_response(404, "not found"),
    }
}

fn map_asupersync_err(err: &asupersync::Error) -> std::io::Error {
    std::io::Error::other(format!("asupersync error: {err}"))
}

/// Blocking entrypoint: connects every dependency, then serves the four
/// routes until the process is killed. Mirrors the teacher's minimal
/// `run_http` bootstrap — one runtime, one listener, no graceful-shutdown
/// machinery beyond what `Http1Listener::run` itself provides.
pub fn run_http(config: Config) -> std::io::Result<()> {
    let runtime = RuntimeBuilder::new().build().map_err(|e| map_asupersync_err(&e))?;
    let handle = runtime.handle();
    let addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse().map_err(std::io::Error::other)?;

    runtime.block_on(async move {
        let cx = Cx::for_request_with_budget(Budget::INFINITE);
        let state = Arc::new(
            AppState::connect(&cx, config)
                .await
                .map_err(|e| std::io::Error::other(format!("startup failed: {e}")))?,
        );

        let handler_state = Arc::clone(&state);
        let listener = Http1Listener::bind(addr, move |req| {
            let inner = Arc::clone(&handler_state);
            async move { handle(&inner, req).await }
        })
        .await?;

        listener.run(&handle).await?;
        Ok::<(), std::io::Error>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_filename_strips_directory_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
    }

    #[test]
    fn sanitize_filename_truncates_long_names_keeping_extension() {
        let long_name = format!("{}.pdf", "a".repeat(200));
        let sanitized = sanitize_filename(&long_name);
        assert!(sanitized.len() <= MAX_FILENAME_LENGTH);
        assert!(sanitized.ends_with(".pdf"));
    }

    #[test]
    fn error_status_maps_duplicate_variants_to_409() {
        assert_eq!(error_status(&Error::DuplicateQueued("a".into())), (409, "duplicate_queued"));
        assert_eq!(error_status(&Error::DuplicateProcessed("a".into())), (409, "duplicate_processed"));
    }

    #[test]
    fn error_status_maps_rate_limit_to_429() {
        let err = Error::RateLimitExceeded { period: "hour".into(), scope: "sender:a".into() };
        assert_eq!(error_status(&err), (429, "error"));
    }

    #[test]
    fn validate_suggestion_to_email_falls_back_for_unknown_handle() {
        let handles = HandleResolver::with_defaults();
        let result = validate_suggestion_to_email(&handles, "notareal@handlemail.example", "handlemail.example");
        assert_eq!(result, "ask@handlemail.example");
    }

    #[test]
    fn build_email_request_defaults_optional_fields() {
        let fields = vec![
            MultipartField { name: "from_email".into(), filename: None, content_type: None, bytes: b"a@example.com".to_vec() },
            MultipartField { name: "to".into(), filename: None, content_type: None, bytes: b"ask@handlemail.example".to_vec() },
        ];
        let req = build_email_request(&fields).unwrap();
        assert_eq!(req.subject, "");
        assert_eq!(req.text_body, "");
        assert!(req.html_body.is_none());
        assert!(req.attachments.is_empty());
    }
}
