//! Webhook ingress for forge push events.
//!
//! A verified push event is resolved to the Repositories tracking the pushed
//! repository, which are annotated with [`REFRESH_ANNOTATION`] so they are
//! reconciled without waiting for their refresh interval.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconcile_helpers::is_conflict;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use crds::{REFRESH_ANNOTATION, Repository};
use hmac::{Hmac, Mac};
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_PATH: &str = "/github/webhook";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
const MAX_ANNOTATE_ATTEMPTS: usize = 5;

/// Marks Repositories for an immediate refresh
#[async_trait]
pub trait RepositoryRefresher: Send + Sync {
    /// Annotates every Repository tracking `owner/name`; returns how many matched
    async fn refresh(&self, owner: &str, name: &str) -> Result<usize, ControllerError>;
}

/// Refresher writing to the Kubernetes API
#[derive(Clone)]
pub struct KubeRepositoryRefresher {
    client: Client,
    watch_namespace: Option<String>,
}

impl std::fmt::Debug for KubeRepositoryRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRepositoryRefresher")
            .field("watch_namespace", &self.watch_namespace)
            .finish_non_exhaustive()
    }
}

impl KubeRepositoryRefresher {
    pub fn new(client: Client, watch_namespace: Option<String>) -> Self {
        Self {
            client,
            watch_namespace,
        }
    }

    async fn annotate(&self, namespace: &str, name: &str, stamp: &str) -> Result<(), ControllerError> {
        let api: Api<Repository> = Api::namespaced(self.client.clone(), namespace);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut repo = api.get(name).await?;
            repo.annotations_mut()
                .insert(REFRESH_ANNOTATION.to_string(), stamp.to_string());
            match api.replace(name, &PostParams::default(), &repo).await {
                Ok(_) => return Ok(()),
                Err(e) if is_conflict(&e) && attempt < MAX_ANNOTATE_ATTEMPTS => {
                    debug!("Conflict annotating Repository {}/{}, retrying", namespace, name);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl RepositoryRefresher for KubeRepositoryRefresher {
    async fn refresh(&self, owner: &str, name: &str) -> Result<usize, ControllerError> {
        let api: Api<Repository> = match &self.watch_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let matches: Vec<Repository> = api
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter(|r| tracks(r, owner, name))
            .collect();

        let stamp = chrono::Utc::now().to_rfc3339();
        for repo in &matches {
            let namespace = repo.namespace().unwrap_or_default();
            self.annotate(&namespace, &repo.name_any(), &stamp).await?;
            info!("Requested refresh of Repository {}/{}", namespace, repo.name_any());
        }
        Ok(matches.len())
    }
}

/// Whether `repo` tracks the forge repository `owner/name` (case-insensitive)
pub fn tracks(repo: &Repository, owner: &str, name: &str) -> bool {
    repo.spec.github.as_ref().is_some_and(|g| {
        g.owner.eq_ignore_ascii_case(owner) && g.name.eq_ignore_ascii_case(name)
    })
}

/// Checks a `sha256=<hex>` signature of `body` in constant time
pub fn verify_signature(secret: &[u8], signature: Option<&str>, body: &[u8]) -> bool {
    let Some(expected) = signature
        .and_then(|s| s.strip_prefix("sha256="))
        .and_then(|hex_digest| hex::decode(hex_digest.trim()).ok())
    else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Deserialize)]
struct PushEvent {
    repository: PushRepository,
}

#[derive(Debug, Deserialize)]
struct PushRepository {
    name: String,
    owner: PushOwner,
}

#[derive(Debug, Deserialize)]
struct PushOwner {
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// `(owner, name)` of the repository a push event is about
fn pushed_repository(body: &[u8]) -> Option<(String, String)> {
    let event: PushEvent = serde_json::from_slice(body).ok()?;
    let owner = event
        .repository
        .owner
        .login
        .or(event.repository.owner.name)
        .filter(|o| !o.is_empty())?;
    if event.repository.name.is_empty() {
        return None;
    }
    Some((owner, event.repository.name))
}

/// Shared state of the webhook handler
#[derive(Clone)]
pub struct WebhookState {
    secret: Option<Arc<[u8]>>,
    refresher: Arc<dyn RepositoryRefresher>,
    metrics: Metrics,
}

impl std::fmt::Debug for WebhookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookState")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl WebhookState {
    pub fn new(secret: Option<&str>, refresher: Arc<dyn RepositoryRefresher>, metrics: Metrics) -> Self {
        Self {
            secret: secret.map(|s| Arc::from(s.as_bytes())),
            refresher,
            metrics,
        }
    }
}

/// Router serving [`WEBHOOK_PATH`]
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(handle_webhook))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let (status, result) = process(&state, &event, &headers, &body).await;
    let label = match event.as_str() {
        "ping" | "push" => event.as_str(),
        _ => "other",
    };
    state.metrics.webhook_event(label, result);
    (status, result)
}

async fn process(
    state: &WebhookState,
    event: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> (StatusCode, &'static str) {
    let Some(secret) = &state.secret else {
        warn!("Rejecting webhook delivery: no webhook secret configured");
        return (StatusCode::UNAUTHORIZED, "unauthorized");
    };
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if !verify_signature(secret, signature, body) {
        warn!("Rejecting {} webhook delivery with a missing or invalid signature", event);
        return (StatusCode::UNAUTHORIZED, "unauthorized");
    }

    match event {
        "ping" => (StatusCode::OK, "pong"),
        "push" => {
            let Some((owner, name)) = pushed_repository(body) else {
                warn!("Malformed push event");
                return (StatusCode::BAD_REQUEST, "malformed");
            };
            match state.refresher.refresh(&owner, &name).await {
                Ok(0) => {
                    debug!("No Repository tracks {}/{}", owner, name);
                    (StatusCode::OK, "ignored")
                }
                Ok(_) => (StatusCode::OK, "refreshed"),
                Err(e) => {
                    error!("Failed to refresh Repositories for {}/{}: {}", owner, name, e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "error")
                }
            }
        }
        other => {
            debug!("Ignoring {} event", other);
            (StatusCode::OK, "ignored")
        }
    }
}
