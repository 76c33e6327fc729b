//! GitHub webhook handling (§6): signature verification plus core logic for
//! `installation`/`installation_repositories` and `workflow_run` events.
//! Pure request-body-in, outcome-out functions — no HTTP serving, that stays
//! the caller's (`buildriskd`'s) problem.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use buildrisk_domain::{CiConclusion, CiStatus, RawBuildRun};

use crate::error::Result;
use crate::orchestrator::Orchestrator;

const SHA256_BLOCK_SIZE: usize = 64;

/// Verifies a `X-Hub-Signature-256` header (`sha256=<hex>`) against `body`
/// using the webhook secret, per RFC 2104 HMAC over SHA-256.
pub fn verify_signature(secret: &[u8], body: &[u8], header: &str) -> bool {
    let Some(given_hex) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(given) = hex::decode(given_hex) else {
        return false;
    };
    let expected = hmac_sha256(secret, body);
    constant_time_eq(&expected, &given)
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut key_block = [0u8; SHA256_BLOCK_SIZE];
    if key.len() > SHA256_BLOCK_SIZE {
        let digest = Sha256::digest(key);
        key_block[..digest.len()].copy_from_slice(&digest);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut ipad = [0x36u8; SHA256_BLOCK_SIZE];
    let mut opad = [0x5cu8; SHA256_BLOCK_SIZE];
    for i in 0..SHA256_BLOCK_SIZE {
        ipad[i] ^= key_block[i];
        opad[i] ^= key_block[i];
    }

    let mut inner = Sha256::new();
    inner.update(ipad);
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(opad);
    outer.update(inner_digest);
    outer.finalize().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Deserialize)]
struct InstallationEvent {
    action: String,
    installation: InstallationPayload,
}

#[derive(Debug, Deserialize)]
struct InstallationPayload {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunEvent {
    action: String,
    repository: RepositoryPayload,
    workflow_run: WorkflowRunPayload,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunPayload {
    id: u64,
    run_number: u64,
    head_sha: String,
    head_branch: String,
    status: String,
    conclusion: Option<String>,
    run_started_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    actor: ActorPayload,
}

#[derive(Debug, Deserialize)]
struct ActorPayload {
    login: String,
}

/// Outcome of handling one webhook delivery, for the caller to log/respond
/// on (e.g. HTTP 200 vs 202 vs 204).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// `installation`/`installation_repositories`: cached installation
    /// tokens for this installation should be dropped. Since this build
    /// only ever mints `CloneAuth::Unauthenticated` (recorded in
    /// DESIGN.md), there is no token cache to invalidate yet — the
    /// acknowledgment still happens so a future token cache has a hook.
    InstallationAcknowledged { installation_id: u64 },
    /// `workflow_run` completed: the run was stored and ingestion dispatched
    /// for `configs_dispatched` matching `RepoConfig`s.
    WorkflowRunIngested { raw_build_run_id: String, configs_dispatched: usize },
    /// Recognized but not actionable here (e.g. a `workflow_run` event that
    /// isn't `action=completed`, or a repository with no `RawRepository` on
    /// file yet).
    Ignored,
}

impl Orchestrator {
    /// `installation` / `installation_repositories` events.
    #[instrument(skip(self, payload))]
    pub fn handle_installation_event(&self, event_name: &str, payload: &[u8]) -> Result<WebhookOutcome> {
        let event: InstallationEvent = serde_json::from_slice(payload)?;
        info!(event_name, action = %event.action, installation_id = event.installation.id, "installation event received");
        Ok(WebhookOutcome::InstallationAcknowledged { installation_id: event.installation.id })
    }

    /// `workflow_run` events. Only `action=completed` does anything; other
    /// actions (`requested`, `in_progress`) are acknowledged as `Ignored`
    /// since this system only cares about finished runs (§4.1).
    #[instrument(skip(self, payload))]
    pub async fn handle_workflow_run_event(&self, payload: &[u8]) -> Result<WebhookOutcome> {
        let event: WorkflowRunEvent = serde_json::from_slice(payload)?;
        if event.action != "completed" {
            return Ok(WebhookOutcome::Ignored);
        }

        let Some(repo) = self.state.get_repository_by_full_name(&event.repository.full_name).await? else {
            warn!(full_name = %event.repository.full_name, "workflow_run for an unregistered repository, ignoring");
            return Ok(WebhookOutcome::Ignored);
        };

        let run = &event.workflow_run;
        let is_bot = buildrisk_domain::build::is_bot_commit(&run.actor.login, buildrisk_domain::build::DEFAULT_BOT_SUBSTRINGS);

        let build_run = RawBuildRun {
            id: buildrisk_domain::ids::RawBuildRunId::new(),
            repo_id: repo.id.clone(),
            provider: repo.provider,
            provider_build_id: run.id.to_string(),
            build_number: run.run_number,
            commit_sha: run.head_sha.clone(),
            branch: run.head_branch.clone(),
            status: map_status(&run.status),
            conclusion: run.conclusion.as_deref().map(map_conclusion),
            started_at: run.run_started_at,
            finished_at: run.updated_at,
            author: run.actor.login.clone(),
            is_bot_commit: is_bot,
            raw_payload: serde_json::from_slice(payload).unwrap_or(serde_json::Value::Null),
        };
        let stored = self.state.upsert_build_run(build_run).await?;

        let configs = self.state.list_repo_configs_for_repository(&repo.id).await?;
        let mut dispatched = 0usize;
        for config in &configs {
            let ingestion = buildrisk_domain::IngestionBuild::new(
                config.id.clone(),
                stored.id.clone(),
                stored.provider_build_id.clone(),
                stored.commit_sha.clone(),
                vec![
                    buildrisk_domain::ResourceKind::BareRepo,
                    buildrisk_domain::ResourceKind::Worktree,
                    buildrisk_domain::ResourceKind::BuildLogs,
                ],
            );
            self.state.upsert_ingestion_build(ingestion).await?;
            if self.dispatch_ingestion(&config.id).await.is_ok() {
                dispatched += 1;
            }
        }

        Ok(WebhookOutcome::WorkflowRunIngested {
            raw_build_run_id: stored.id.to_string(),
            configs_dispatched: dispatched,
        })
    }
}

fn map_status(status: &str) -> CiStatus {
    match status {
        "queued" => CiStatus::Queued,
        "in_progress" => CiStatus::Running,
        "completed" => CiStatus::Completed,
        "pending" | "waiting" => CiStatus::Pending,
        _ => CiStatus::Unknown,
    }
}

fn map_conclusion(conclusion: &str) -> CiConclusion {
    match conclusion {
        "success" => CiConclusion::Success,
        "failure" | "startup_failure" => CiConclusion::Failure,
        "cancelled" => CiConclusion::Cancelled,
        "skipped" => CiConclusion::Skipped,
        "timed_out" => CiConclusion::TimedOut,
        "action_required" => CiConclusion::ActionRequired,
        _ => CiConclusion::Neutral,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::test_support::test_orchestrator;

    /// RFC 2104 test vector (key="key", data="The quick brown fox jumps over
    /// the lazy dog") with the known HMAC-SHA256 digest.
    #[test]
    fn verify_signature_matches_known_hmac_sha256_vector() {
        let body = b"The quick brown fox jumps over the lazy dog";
        let header = "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8";
        assert!(verify_signature(b"key", body, header));
    }

    #[test]
    fn verify_signature_rejects_wrong_secret() {
        let body = b"The quick brown fox jumps over the lazy dog";
        let header = "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8";
        assert!(!verify_signature(b"wrong-key", body, header));
    }

    #[test]
    fn verify_signature_rejects_malformed_header() {
        assert!(!verify_signature(b"key", b"body", "not-a-signature"));
        assert!(!verify_signature(b"key", b"body", "sha256=not-hex"));
    }

    #[test]
    fn map_status_covers_known_github_states() {
        assert_eq!(map_status("queued"), CiStatus::Queued);
        assert_eq!(map_status("in_progress"), CiStatus::Running);
        assert_eq!(map_status("completed"), CiStatus::Completed);
        assert_eq!(map_status("waiting"), CiStatus::Pending);
        assert_eq!(map_status("anything_else"), CiStatus::Unknown);
    }

    #[test]
    fn map_conclusion_covers_known_github_conclusions() {
        assert_eq!(map_conclusion("success"), CiConclusion::Success);
        assert_eq!(map_conclusion("startup_failure"), CiConclusion::Failure);
        assert_eq!(map_conclusion("timed_out"), CiConclusion::TimedOut);
        assert_eq!(map_conclusion("stale"), CiConclusion::Neutral);
    }

    #[test]
    fn handle_installation_event_acknowledges_without_touching_state() {
        let orch = test_orchestrator();
        let payload = br#"{"action":"created","installation":{"id":42}}"#;
        let outcome = orch.handle_installation_event("installation", payload).unwrap();
        assert_eq!(outcome, WebhookOutcome::InstallationAcknowledged { installation_id: 42 });
    }

    #[tokio::test]
    async fn workflow_run_for_unregistered_repo_is_ignored() {
        let orch = test_orchestrator();
        let payload = br#"{
            "action": "completed",
            "repository": {"full_name": "octocat/unknown"},
            "workflow_run": {
                "id": 1, "run_number": 1, "head_sha": "abc123", "head_branch": "main",
                "status": "completed", "conclusion": "success",
                "run_started_at": null, "updated_at": null,
                "actor": {"login": "octocat"}
            }
        }"#;
        let outcome = orch.handle_workflow_run_event(payload).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    #[tokio::test]
    async fn workflow_run_non_completed_action_is_ignored() {
        let orch = test_orchestrator();
        let payload = br#"{
            "action": "requested",
            "repository": {"full_name": "octocat/unknown"},
            "workflow_run": {
                "id": 1, "run_number": 1, "head_sha": "abc123", "head_branch": "main",
                "status": "queued", "conclusion": null,
                "run_started_at": null, "updated_at": null,
                "actor": {"login": "octocat"}
            }
        }"#;
        let outcome = orch.handle_workflow_run_event(payload).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }
}
