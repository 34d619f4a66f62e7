//! The clone, bake and apply pipeline as a pure function of the observed state.
//!
//! Every pass re-derives the next step from the deployment status, the target
//! branch and revision, and the latest job. Nothing is remembered between
//! passes, so dropped events and restarts need no recovery.

use crds::{
    BRANCH_ANNOTATION, ConditionStatus, DeploymentStatus, MissingBranchStrategy, PHASE_LABEL,
    REVISION_ANNOTATION, RepositoryStatus, StaleReason,
};
use k8s_openapi::api::batch::v1::Job;
use std::fmt;
use tracing::debug;

/// One stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Clone,
    Bake,
    Apply,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Clone => "clone",
            Phase::Bake => "bake",
            Phase::Apply => "apply",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "clone" => Some(Phase::Clone),
            "bake" => Some(Phase::Bake),
            "apply" => Some(Phase::Apply),
            _ => None,
        }
    }

    /// Reason recorded while a job of this phase is active
    pub fn active_reason(self) -> StaleReason {
        match self {
            Phase::Clone => StaleReason::Cloning,
            Phase::Bake => StaleReason::Baking,
            Phase::Apply => StaleReason::Applying,
        }
    }

    /// Reason recorded when a job of this phase failed
    pub fn failed_reason(self) -> StaleReason {
        match self {
            Phase::Clone => StaleReason::CloneFailed,
            Phase::Bake => StaleReason::BakingFailed,
            Phase::Apply => StaleReason::ApplyFailed,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Branch and revision a deployment should converge to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub branch: String,
    pub revision: String,
}

/// Picks the environment's branch if the repository has it, else the
/// repository's default branch.
pub fn select_target(
    preferred: &str,
    strategy: MissingBranchStrategy,
    repository: &RepositoryStatus,
) -> Option<Target> {
    let target = |branch: &str| {
        repository.revision(branch).map(|revision| Target {
            branch: branch.to_string(),
            revision: revision.to_string(),
        })
    };
    target(preferred).or_else(|| {
        if strategy == MissingBranchStrategy::Ignore {
            debug!(
                "Branch {} is missing and the Ignore strategy is reserved, using the default branch",
                preferred
            );
        }
        repository.default_branch.as_deref().and_then(target)
    })
}

/// Observed state of a pipeline job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
    Suspended(ConditionStatus),
    /// `Complete` is reported with status `Unknown`
    PossiblyCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobObservation {
    pub name: String,
    pub phase: Phase,
    pub branch: Option<String>,
    pub revision: Option<String>,
    pub state: JobState,
}

fn condition_status(value: &str) -> Option<ConditionStatus> {
    match value {
        "True" => Some(ConditionStatus::True),
        "False" => Some(ConditionStatus::False),
        "Unknown" => Some(ConditionStatus::Unknown),
        _ => None,
    }
}

/// Reads the pipeline view of a job; jobs without a known phase label are ignored.
pub fn observe_job(job: &Job) -> Option<JobObservation> {
    let labels = job.metadata.labels.as_ref()?;
    let phase = Phase::from_label(labels.get(PHASE_LABEL)?)?;
    let annotation = |key: &str| {
        job.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .cloned()
    };

    let conditions = job
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    let status_of = |type_: &str| {
        conditions
            .iter()
            .find(|c| c.type_ == type_)
            .and_then(|c| condition_status(&c.status))
    };

    let state = match (status_of("Complete"), status_of("Failed"), status_of("Suspended")) {
        (Some(ConditionStatus::True), _, _) => JobState::Succeeded,
        (_, Some(ConditionStatus::True), _) => JobState::Failed,
        (Some(ConditionStatus::Unknown), _, _) => JobState::PossiblyCompleted,
        (_, _, Some(s @ (ConditionStatus::True | ConditionStatus::Unknown))) => JobState::Suspended(s),
        _ => JobState::Running,
    };

    Some(JobObservation {
        name: job.metadata.name.clone().unwrap_or_default(),
        phase,
        branch: annotation(BRANCH_ANNOTATION),
        revision: annotation(REVISION_ANNOTATION),
        state,
    })
}

/// The most recently created pipeline job
pub fn latest_job(jobs: &[Job]) -> Option<JobObservation> {
    jobs.iter()
        .filter_map(|job| {
            let observed = observe_job(job)?;
            Some((job.metadata.creation_timestamp.as_ref(), observed))
        })
        .max_by(|(a_time, a), (b_time, b)| {
            a_time
                .cmp(b_time)
                .then(a.phase.cmp(&b.phase))
                .then(a.name.cmp(&b.name))
        })
        .map(|(_, observed)| observed)
}

/// What the reconciler should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The target revision is applied
    Idle,
    /// An active job has to finish first
    Wait {
        reason: StaleReason,
        status: ConditionStatus,
        message: String,
    },
    /// Launch a job for `phase`
    Launch {
        phase: Phase,
        /// Whether this starts a new pipeline run for the target
        restart: bool,
        reason: StaleReason,
        message: String,
    },
}

/// A step plus the revision to record as applied before taking it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub applied: Option<String>,
    pub step: Step,
}

impl Transition {
    fn step(step: Step) -> Self {
        Self { applied: None, step }
    }
}

/// Derives the next pipeline step.
///
/// An active job is never cancelled. Once the latest job is terminal, a
/// changed target restarts the pipeline with a fresh clone, as does a
/// terminal job that belongs to a run other than the recorded one.
pub fn next_step(target: &Target, status: &DeploymentStatus, job: Option<&JobObservation>) -> Transition {
    let drifted = status.branch.as_deref() != Some(target.branch.as_str())
        || status.last_attempted_revision.as_deref() != Some(target.revision.as_str());
    let restart = |message: String| Step::Launch {
        phase: Phase::Clone,
        restart: true,
        reason: StaleReason::Cloning,
        message,
    };

    let Some(job) = job else {
        let applied = status.branch.as_deref() == Some(target.branch.as_str())
            && status.last_applied_revision.as_deref() == Some(target.revision.as_str());
        return Transition::step(if applied {
            Step::Idle
        } else {
            restart(format!("cloning {} at {}", target.branch, target.revision))
        });
    };

    let wait = |status: ConditionStatus, message: String| {
        Transition::step(Step::Wait {
            reason: job.phase.active_reason(),
            status,
            message,
        })
    };
    match job.state {
        JobState::Running => {
            return wait(ConditionStatus::True, format!("{} job {} is running", job.phase, job.name));
        }
        JobState::Suspended(s) => {
            return wait(s, format!("{} job {} is suspended", job.phase, job.name));
        }
        JobState::PossiblyCompleted => {
            return wait(
                ConditionStatus::Unknown,
                format!("waiting for possibly completed {} job {}", job.phase, job.name),
            );
        }
        JobState::Succeeded | JobState::Failed => {}
    }

    // A job from an earlier run is left behind when the recorded run never got its job created.
    let current_run = job.branch.as_deref() == status.branch.as_deref()
        && job.revision.is_some()
        && job.revision.as_deref() == status.last_attempted_revision.as_deref();
    let applied = (current_run && job.phase == Phase::Apply && job.state == JobState::Succeeded)
        .then(|| job.revision.clone())
        .flatten();
    let step = if drifted || !current_run {
        restart(format!(
            "target moved to {} at {}, cloning",
            target.branch, target.revision
        ))
    } else {
        match (job.state, job.phase) {
            (JobState::Succeeded, Phase::Clone) => Step::Launch {
                phase: Phase::Bake,
                restart: false,
                reason: StaleReason::Baking,
                message: format!("baking {} at {}", target.branch, target.revision),
            },
            (JobState::Succeeded, Phase::Bake) => Step::Launch {
                phase: Phase::Apply,
                restart: false,
                reason: StaleReason::Applying,
                message: format!("applying {} at {}", target.branch, target.revision),
            },
            (JobState::Succeeded, Phase::Apply) => Step::Idle,
            (_, phase) => Step::Launch {
                phase,
                restart: false,
                reason: phase.failed_reason(),
                message: format!("{} job {} failed, retrying", phase, job.name),
            },
        }
    };
    Transition { applied, step }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repo(default_branch: &str, branches: &[(&str, &str)]) -> RepositoryStatus {
        RepositoryStatus {
            default_branch: Some(default_branch.to_string()),
            revisions: branches
                .iter()
                .map(|(b, s)| (b.to_string(), s.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn target(branch: &str, revision: &str) -> Target {
        Target {
            branch: branch.to_string(),
            revision: revision.to_string(),
        }
    }

    fn status(branch: &str, attempted: &str, applied: Option<&str>) -> DeploymentStatus {
        DeploymentStatus {
            branch: Some(branch.to_string()),
            last_attempted_revision: Some(attempted.to_string()),
            last_applied_revision: applied.map(str::to_string),
            ..Default::default()
        }
    }

    fn observed(phase: Phase, revision: &str, state: JobState) -> JobObservation {
        JobObservation {
            name: format!("dep-{phase}-abcde"),
            phase,
            branch: Some("main".to_string()),
            revision: Some(revision.to_string()),
            state,
        }
    }

    fn job(name: &str, phase: &str, created_secs: i64, conditions: &[(&str, &str)]) -> Job {
        let conditions: Vec<_> = conditions
            .iter()
            .map(|(t, s)| json!({"type": t, "status": s}))
            .collect();
        serde_json::from_value(json!({
            "metadata": {
                "name": name,
                "labels": {PHASE_LABEL: phase},
                "annotations": {BRANCH_ANNOTATION: "main", REVISION_ANNOTATION: "s1"},
                "creationTimestamp": format!("2024-05-01T12:{:02}:{:02}Z", created_secs / 60, created_secs % 60),
            },
            "status": {"conditions": conditions},
        }))
        .unwrap()
    }

    #[test]
    fn test_select_target_prefers_environment_branch() {
        let r = repo("main", &[("main", "s1"), ("feature", "s2")]);
        assert_eq!(
            select_target("feature", MissingBranchStrategy::UseDefault, &r),
            Some(target("feature", "s2"))
        );
    }

    #[test]
    fn test_select_target_falls_back_to_default_branch() {
        let r = repo("main", &[("main", "s1")]);
        assert_eq!(
            select_target("feature", MissingBranchStrategy::UseDefault, &r),
            Some(target("main", "s1"))
        );
        assert_eq!(
            select_target("feature", MissingBranchStrategy::Ignore, &r),
            Some(target("main", "s1"))
        );
    }

    #[test]
    fn test_select_target_without_default_revision() {
        let r = repo("main", &[("other", "s9")]);
        assert_eq!(select_target("feature", MissingBranchStrategy::UseDefault, &r), None);
        assert_eq!(
            select_target("feature", MissingBranchStrategy::UseDefault, &RepositoryStatus::default()),
            None
        );
    }

    #[test]
    fn test_observe_job_states() {
        let state = |conditions: &[(&str, &str)]| observe_job(&job("j", "bake", 0, conditions)).map(|o| o.state);
        assert_eq!(state(&[]), Some(JobState::Running));
        assert_eq!(state(&[("Complete", "True")]), Some(JobState::Succeeded));
        assert_eq!(state(&[("Failed", "True")]), Some(JobState::Failed));
        assert_eq!(state(&[("Complete", "Unknown")]), Some(JobState::PossiblyCompleted));
        assert_eq!(
            state(&[("Suspended", "Unknown")]),
            Some(JobState::Suspended(ConditionStatus::Unknown))
        );
        assert_eq!(state(&[("Suspended", "False")]), Some(JobState::Running));
    }

    #[test]
    fn test_observe_job_reads_annotations() {
        let o = observe_job(&job("dep-clone-x", "clone", 0, &[])).unwrap();
        assert_eq!(o.phase, Phase::Clone);
        assert_eq!(o.branch.as_deref(), Some("main"));
        assert_eq!(o.revision.as_deref(), Some("s1"));
        assert!(observe_job(&job("other", "lint", 0, &[])).is_none());
    }

    #[test]
    fn test_latest_job_by_creation_time() {
        let jobs = vec![
            job("dep-apply-a", "apply", 300, &[("Complete", "True")]),
            job("dep-clone-b", "clone", 1500, &[]),
            job("dep-bake-c", "bake", 600, &[("Complete", "True")]),
        ];
        assert_eq!(latest_job(&jobs).map(|o| o.name), Some("dep-clone-b".to_string()));
        assert_eq!(latest_job(&[]), None);
    }

    #[test]
    fn test_latest_job_same_second_prefers_later_phase() {
        let jobs = vec![job("dep-bake-z", "bake", 60, &[]), job("dep-clone-a", "clone", 60, &[])];
        assert_eq!(latest_job(&jobs).map(|o| o.phase), Some(Phase::Bake));
    }

    #[test]
    fn test_first_deployment_launches_clone() {
        let t = next_step(&target("main", "s1"), &DeploymentStatus::default(), None);
        assert!(matches!(
            t.step,
            Step::Launch {
                phase: Phase::Clone,
                restart: true,
                ..
            }
        ));
        assert_eq!(t.applied, None);
    }

    #[test]
    fn test_applied_target_is_idle() {
        let t = next_step(&target("main", "s1"), &status("main", "s1", Some("s1")), None);
        assert_eq!(t.step, Step::Idle);
    }

    #[test]
    fn test_new_revision_without_job_restarts() {
        let t = next_step(&target("main", "s2"), &status("main", "s1", Some("s1")), None);
        assert!(matches!(t.step, Step::Launch { phase: Phase::Clone, restart: true, .. }));
    }

    #[test]
    fn test_phases_advance_on_success() {
        let t = target("main", "s1");
        let s = status("main", "s1", None);

        let step = next_step(&t, &s, Some(&observed(Phase::Clone, "s1", JobState::Succeeded))).step;
        assert!(matches!(step, Step::Launch { phase: Phase::Bake, restart: false, reason: StaleReason::Baking, .. }));

        let step = next_step(&t, &s, Some(&observed(Phase::Bake, "s1", JobState::Succeeded))).step;
        assert!(matches!(step, Step::Launch { phase: Phase::Apply, reason: StaleReason::Applying, .. }));

        let done = next_step(&t, &s, Some(&observed(Phase::Apply, "s1", JobState::Succeeded)));
        assert_eq!(done.step, Step::Idle);
        assert_eq!(done.applied.as_deref(), Some("s1"));
    }

    #[test]
    fn test_failed_phase_is_relaunched() {
        let t = target("main", "s1");
        let s = status("main", "s1", None);
        let step = next_step(&t, &s, Some(&observed(Phase::Bake, "s1", JobState::Failed))).step;
        assert!(matches!(
            step,
            Step::Launch {
                phase: Phase::Bake,
                restart: false,
                reason: StaleReason::BakingFailed,
                ..
            }
        ));
    }

    #[test]
    fn test_running_job_is_not_cancelled_on_drift() {
        let t = target("main", "s2");
        let s = status("main", "s1", None);
        let step = next_step(&t, &s, Some(&observed(Phase::Bake, "s1", JobState::Running))).step;
        assert_eq!(
            step,
            Step::Wait {
                reason: StaleReason::Baking,
                status: ConditionStatus::True,
                message: "bake job dep-bake-abcde is running".to_string(),
            }
        );
    }

    #[test]
    fn test_drift_restarts_after_terminal_job() {
        let t = target("main", "s2");
        let s = status("main", "s1", Some("s0"));
        let step = next_step(&t, &s, Some(&observed(Phase::Bake, "s1", JobState::Succeeded))).step;
        assert!(matches!(step, Step::Launch { phase: Phase::Clone, restart: true, .. }));
    }

    #[test]
    fn test_apply_success_records_revision_even_when_drifted() {
        let t = target("main", "s2");
        let s = status("main", "s1", Some("s0"));
        let transition = next_step(&t, &s, Some(&observed(Phase::Apply, "s1", JobState::Succeeded)));
        assert_eq!(transition.applied.as_deref(), Some("s1"));
        assert!(matches!(transition.step, Step::Launch { phase: Phase::Clone, .. }));
    }

    #[test]
    fn test_branch_change_is_drift() {
        let t = target("feature", "s1");
        let s = status("main", "s1", Some("s1"));
        let step = next_step(&t, &s, Some(&observed(Phase::Apply, "s1", JobState::Succeeded))).step;
        assert!(matches!(step, Step::Launch { phase: Phase::Clone, restart: true, .. }));
    }

    #[test]
    fn test_unlaunched_run_ignores_earlier_apply() {
        let t = target("main", "s2");
        let s = status("main", "s2", Some("s1"));
        let transition = next_step(&t, &s, Some(&observed(Phase::Apply, "s1", JobState::Succeeded)));
        assert_eq!(transition.applied, None);
        assert!(matches!(
            transition.step,
            Step::Launch {
                phase: Phase::Clone,
                restart: true,
                reason: StaleReason::Cloning,
                ..
            }
        ));
    }

    #[test]
    fn test_unlaunched_run_does_not_bake_earlier_clone() {
        let t = target("main", "s2");
        let s = status("main", "s2", Some("s1"));
        let step = next_step(&t, &s, Some(&observed(Phase::Clone, "s1", JobState::Succeeded))).step;
        assert!(matches!(step, Step::Launch { phase: Phase::Clone, restart: true, .. }));

        let step = next_step(&t, &s, Some(&observed(Phase::Bake, "s1", JobState::Failed))).step;
        assert!(matches!(step, Step::Launch { phase: Phase::Clone, restart: true, .. }));
    }

    #[test]
    fn test_job_from_other_branch_restarts() {
        let t = target("feature", "s1");
        let s = status("feature", "s1", None);
        let step = next_step(&t, &s, Some(&observed(Phase::Apply, "s1", JobState::Succeeded))).step;
        assert!(matches!(step, Step::Launch { phase: Phase::Clone, restart: true, .. }));
    }

    #[test]
    fn test_unannotated_job_restarts() {
        let t = target("main", "s1");
        let s = status("main", "s1", None);
        let mut job = observed(Phase::Clone, "s1", JobState::Succeeded);
        job.revision = None;
        let transition = next_step(&t, &s, Some(&job));
        assert_eq!(transition.applied, None);
        assert!(matches!(transition.step, Step::Launch { phase: Phase::Clone, restart: true, .. }));
    }

    #[test]
    fn test_indeterminate_jobs_wait() {
        let t = target("main", "s1");
        let s = status("main", "s1", None);

        let step = next_step(&t, &s, Some(&observed(Phase::Apply, "s1", JobState::PossiblyCompleted))).step;
        assert_eq!(
            step,
            Step::Wait {
                reason: StaleReason::Applying,
                status: ConditionStatus::Unknown,
                message: "waiting for possibly completed apply job dep-apply-abcde".to_string(),
            }
        );

        let suspended = JobState::Suspended(ConditionStatus::True);
        let step = next_step(&t, &s, Some(&observed(Phase::Clone, "s1", suspended))).step;
        assert!(matches!(
            step,
            Step::Wait {
                reason: StaleReason::Cloning,
                status: ConditionStatus::True,
                ..
            }
        ));
    }
}
