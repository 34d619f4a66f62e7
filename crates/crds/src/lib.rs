//! Devbot CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Devbot controller, the
//! references they use, and the condition algebra every status shares.

pub mod application;
pub mod conditions;
pub mod deployment;
pub mod environment;
pub mod references;
pub mod repository;

pub use application::*;
pub use conditions::*;
pub use deployment::*;
pub use environment::*;
pub use references::*;
pub use repository::*;

/// API group of all Devbot resources
pub const API_GROUP: &str = "devbot.com";

/// Finalizer installed on every reconciled resource
pub const FINALIZER: &str = "devbot.com/finalizer";

/// Annotation patched by the webhook ingress to force a Repository refresh
pub const REFRESH_ANNOTATION: &str = "refresh.devbot.com";

/// Label carrying the owning Application's name on Environments and Deployments
pub const APPLICATION_LABEL: &str = "devbot.com/application";

/// Label carrying the owning Environment's name on Deployments
pub const ENVIRONMENT_LABEL: &str = "devbot.com/environment";

/// Label carrying the pipeline phase on jobs
pub const PHASE_LABEL: &str = "devbot.com/phase";

/// Label carrying the owning Deployment's name on jobs and claims
pub const DEPLOYMENT_LABEL: &str = "devbot.com/deployment";

/// Annotation carrying the target branch on jobs
pub const BRANCH_ANNOTATION: &str = "devbot.com/branch";

/// Annotation carrying the target revision on jobs
pub const REVISION_ANNOTATION: &str = "devbot.com/revision";

/// Errors raised while rendering CRD manifests
#[derive(Debug, thiserror::Error)]
pub enum CrdError {
    /// YAML serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

/// Renders all Devbot CRDs as a multi-document YAML stream.
pub fn render_crds() -> Result<String, CrdError> {
    use kube::CustomResourceExt;

    let crds = [
        Repository::crd(),
        Application::crd(),
        Environment::crd(),
        Deployment::crd(),
    ];
    let mut out = String::new();
    for crd in crds {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd)?);
    }
    Ok(out)
}
