//! Main controller implementation.
//!
//! The `Controller` wires the Kubernetes client, the reconcilers and the
//! HTTP servers together and runs them until shutdown:
//! - Repository, Application, Environment and Deployment watchers
//! - the webhook ingress
//! - health and metrics endpoints

use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::server::{self, health_router, metrics_router, shutdown_signal};
use crate::watcher::Watcher;
use crate::webhook::{self, KubeRepositoryRefresher, WebhookState};
use github_client::DefaultGitHubClientFactory;
use kube::{Api, Client, Resource};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Namespaced API when a namespace is watched, cluster-wide otherwise
fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Devbot controller process.
pub struct Controller {
    config: Arc<Config>,
    client: Client,
    metrics: Metrics,
    watcher: Watcher,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Devbot Controller");

        let client = Client::try_default().await?;
        let metrics = Metrics::new()?;
        let config = Arc::new(config);
        let github = Arc::new(DefaultGitHubClientFactory::new(config.github_api_url.clone()));
        let reconciler = Arc::new(Reconciler::new(
            client.clone(),
            Arc::clone(&config),
            github,
            metrics.clone(),
        ));

        let ns = config.watch_namespace.as_deref();
        let watcher = Watcher::new(
            reconciler,
            scoped(&client, ns),
            scoped(&client, ns),
            scoped(&client, ns),
            scoped(&client, ns),
            scoped(&client, ns),
            scoped(&client, ns),
        );

        Ok(Self {
            config,
            client,
            metrics,
            watcher,
        })
    }

    /// Runs the watchers and servers until a termination signal arrives.
    ///
    /// The watchers stop on SIGTERM or Ctrl-C once in-flight reconciliations
    /// finish; the servers are drained after them.
    pub async fn run(self) -> Result<(), ControllerError> {
        let (stop_tx, stop_rx) = watch::channel(false);

        let refresher = Arc::new(KubeRepositoryRefresher::new(
            self.client.clone(),
            self.config.watch_namespace.clone(),
        ));
        let webhook_state = WebhookState::new(
            self.config.webhook_secret.as_deref(),
            refresher,
            self.metrics.clone(),
        );
        let mut servers = tokio::spawn({
            let config = Arc::clone(&self.config);
            let metrics = self.metrics.clone();
            async move {
                tokio::try_join!(
                    server::serve(
                        config.webhook_addr,
                        webhook::router(webhook_state),
                        "Webhook",
                        shutdown_signal(stop_rx.clone()),
                    ),
                    server::serve(
                        config.health_addr,
                        health_router(),
                        "Health",
                        shutdown_signal(stop_rx.clone()),
                    ),
                    server::serve(
                        config.metrics_addr,
                        metrics_router(metrics),
                        "Metrics",
                        shutdown_signal(stop_rx),
                    ),
                )
            }
        });

        let watchers = async {
            tokio::try_join!(
                self.watcher.watch_repositories(),
                self.watcher.watch_applications(),
                self.watcher.watch_environments(),
                self.watcher.watch_deployments(),
            )
        };

        info!("✅ Devbot Controller started");
        tokio::select! {
            result = watchers => {
                result?;
                info!("Watchers stopped, shutting down servers");
            }
            result = &mut servers => {
                let error = match result {
                    Ok(Ok(_)) => ControllerError::Server(std::io::Error::other("servers exited unexpectedly")),
                    Ok(Err(e)) => e,
                    Err(e) => ControllerError::Server(std::io::Error::other(e)),
                };
                error!("Server failure: {}", error);
                return Err(error);
            }
        }

        if stop_tx.send(true).is_err() {
            debug!("Servers already stopped");
        }
        match servers.await {
            Ok(result) => result.map(|_| ()),
            Err(e) => Err(ControllerError::Server(std::io::Error::other(e))),
        }
    }
}
