//! Unit tests for the Application reconciler

#[cfg(test)]
mod tests {
    use crate::reconcile_helpers::Lookup;
    use crate::reconciler::application::*;
    use crate::reconciler::{DEPENDENCY_RETRY, TRANSIENT_RETRY, require};
    use crate::test_utils::*;
    use crds::{APPLICATION_LABEL, Conditions, RepositoryStatus, StaleReason};

    fn status_with(branches: &[(&str, &str)]) -> RepositoryStatus {
        RepositoryStatus {
            revisions: branches
                .iter()
                .map(|(b, s)| (b.to_string(), s.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_union_branches() {
        let r1 = status_with(&[("main", "s1"), ("feature", "s2")]);
        let r2 = status_with(&[("main", "s3"), ("hotfix", "s4")]);
        let branches: Vec<String> = union_branches([&r1, &r2]).into_iter().collect();
        assert_eq!(branches, vec!["feature", "hotfix", "main"]);

        assert!(union_branches(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_invalid_reference() {
        let app = create_test_application("shop", "team-a", &["api", "web"]);
        assert_eq!(invalid_reference(&app), None);

        let app = create_test_application("shop", "team-a", &["api", " "]);
        assert_eq!(invalid_reference(&app), Some(1));
    }

    #[test]
    fn test_desired_environment() {
        let app = create_test_application("shop", "team-a", &["api"]);
        let env = desired_environment(&app, "feature/cart").unwrap();

        assert_eq!(env.metadata.name.as_deref(), Some("shop-feature-cart"));
        assert_eq!(env.metadata.namespace.as_deref(), Some("team-a"));
        assert_eq!(env.spec.branch, "feature/cart");
        assert_eq!(
            env.metadata.labels.unwrap().get(APPLICATION_LABEL).map(String::as_str),
            Some("shop")
        );
        let owner = &env.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "Application");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.uid, "uid-shop");
    }

    #[test]
    fn test_desired_environment_long_application_name() {
        let name = format!("{}-storefront", "shop".repeat(20));
        let app = create_test_application(&name, "team-a", &["api"]);
        let env = desired_environment(&app, "main").unwrap();

        let label = env.metadata.labels.unwrap()[APPLICATION_LABEL].clone();
        assert!(label.len() <= 63);
        assert!(name.starts_with(&label));
        assert!(env.metadata.name.unwrap().len() <= 63);
    }

    #[test]
    fn test_desired_environment_requires_uid() {
        let mut app = create_test_application("shop", "team-a", &["api"]);
        app.metadata.uid = None;
        assert!(desired_environment(&app, "main").is_err());
    }

    #[test]
    fn test_require_classifies_lookups() {
        let mut status = RepositoryStatus::default();

        let missing: Lookup<()> = Lookup::NotFound;
        let retry = require(
            missing,
            &mut status,
            Some(1),
            StaleReason::RepositoryNotFound,
            Some(StaleReason::RepositoryNotAccessible),
            "repository 'team-a/api'",
        );
        assert_eq!(retry, Err(DEPENDENCY_RETRY));
        assert!(status.has_reason(StaleReason::RepositoryNotFound));

        let forbidden: Lookup<()> = Lookup::Forbidden("rbac".into());
        let retry = require(
            forbidden,
            &mut status,
            Some(1),
            StaleReason::RepositoryNotFound,
            Some(StaleReason::RepositoryNotAccessible),
            "repository 'team-a/api'",
        );
        assert_eq!(retry, Err(DEPENDENCY_RETRY));
        assert!(status.has_reason(StaleReason::RepositoryNotAccessible));

        let found = require(
            Lookup::Found(7),
            &mut status,
            Some(1),
            StaleReason::RepositoryNotFound,
            Some(StaleReason::RepositoryNotAccessible),
            "repository 'team-a/api'",
        );
        assert_eq!(found, Ok(7));
        assert!(status.conditions.is_empty());
    }

    #[test]
    fn test_require_forbidden_without_reason_is_internal() {
        let mut status = RepositoryStatus::default();
        let forbidden: Lookup<()> = Lookup::Forbidden("rbac".into());
        let retry = require(
            forbidden,
            &mut status,
            Some(1),
            StaleReason::EnvironmentNotFound,
            None,
            "environment 'team-a/shop-main'",
        );
        assert_eq!(retry, Err(TRANSIENT_RETRY));
        assert!(status.has_reason(StaleReason::InternalError));
    }
}
