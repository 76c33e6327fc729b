//! In-memory fakes for the storage traits (testing only).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use buildrisk_domain::ids::{
    IngestionBuildId, RawBuildRunId, RawRepositoryId, RepoConfigId, TrainingBuildId,
};
use buildrisk_domain::{FeatureAuditLog, IngestionBuild, RawBuildRun, RawRepository, RepoConfig, TrainingBuild};

use crate::error::{Result, StateError};
use crate::storage_traits::{
    AuditLogStore, BuildRunCatalog, IngestionLedger, RepoConfigStore, RepositoryCatalog,
    TrainingStore,
};

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    repositories: Mutex<HashMap<String, RawRepository>>,
    build_runs: Mutex<HashMap<String, RawBuildRun>>,
    repo_configs: Mutex<HashMap<String, RepoConfig>>,
    ingestion_builds: Mutex<HashMap<String, IngestionBuild>>,
    /// business key -> ingestion build id, enforcing upsert idempotency.
    ingestion_business_index: Mutex<HashMap<(String, String), String>>,
    ingestion_sequence: AtomicI64,
    training_builds: Mutex<HashMap<String, TrainingBuild>>,
    audit_logs: Mutex<HashMap<String, FeatureAuditLog>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepositoryCatalog for MemoryStateStore {
    async fn upsert_repository(&self, repo: RawRepository) -> Result<RawRepository> {
        let mut repos = self.repositories.lock().unwrap();
        repos.insert(repo.id.to_string(), repo.clone());
        Ok(repo)
    }

    async fn get_repository(&self, id: &RawRepositoryId) -> Result<RawRepository> {
        let repos = self.repositories.lock().unwrap();
        repos
            .get(&id.to_string())
            .cloned()
            .ok_or_else(|| StateError::RepositoryNotFound { id: id.to_string() })
    }

    async fn get_repository_by_full_name(&self, full_name: &str) -> Result<Option<RawRepository>> {
        let repos = self.repositories.lock().unwrap();
        Ok(repos.values().find(|r| r.full_name == full_name).cloned())
    }
}

#[async_trait]
impl BuildRunCatalog for MemoryStateStore {
    async fn upsert_build_run(&self, build_run: RawBuildRun) -> Result<RawBuildRun> {
        let mut runs = self.build_runs.lock().unwrap();
        let existing = runs.values().find(|r| {
            r.repo_id == build_run.repo_id && r.provider_build_id == build_run.provider_build_id
        });
        let id = existing.map(|r| r.id.clone()).unwrap_or(build_run.id.clone());
        let mut stored = build_run;
        stored.id = id;
        runs.insert(stored.id.to_string(), stored.clone());
        Ok(stored)
    }

    async fn get_build_run(&self, id: &RawBuildRunId) -> Result<RawBuildRun> {
        let runs = self.build_runs.lock().unwrap();
        runs.get(&id.to_string())
            .cloned()
            .ok_or_else(|| StateError::Database(format!("build run not found: {id}")))
    }

    async fn shas_already_stored(
        &self,
        repo_id: &RawRepositoryId,
        shas: &[String],
    ) -> Result<HashSet<String>> {
        let runs = self.build_runs.lock().unwrap();
        let wanted: HashSet<&String> = shas.iter().collect();
        Ok(runs
            .values()
            .filter(|r| &r.repo_id == repo_id && wanted.contains(&r.commit_sha))
            .map(|r| r.commit_sha.clone())
            .collect())
    }

    async fn list_build_runs_for_repo(&self, repo_id: &RawRepositoryId) -> Result<Vec<RawBuildRun>> {
        let runs = self.build_runs.lock().unwrap();
        let mut matching: Vec<RawBuildRun> = runs
            .values()
            .filter(|r| &r.repo_id == repo_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.build_number);
        Ok(matching)
    }
}

#[async_trait]
impl RepoConfigStore for MemoryStateStore {
    async fn create_repo_config(&self, config: RepoConfig) -> Result<RepoConfig> {
        let mut configs = self.repo_configs.lock().unwrap();
        configs.insert(config.id.to_string(), config.clone());
        Ok(config)
    }

    async fn get_repo_config(&self, id: &RepoConfigId) -> Result<RepoConfig> {
        let configs = self.repo_configs.lock().unwrap();
        configs
            .get(&id.to_string())
            .cloned()
            .ok_or_else(|| StateError::RepoConfigNotFound { id: id.to_string() })
    }

    async fn save_repo_config(&self, config: RepoConfig) -> Result<RepoConfig> {
        let mut configs = self.repo_configs.lock().unwrap();
        configs.insert(config.id.to_string(), config.clone());
        Ok(config)
    }

    async fn increment_counters(
        &self,
        id: &RepoConfigId,
        fetched: u64,
        completed: u64,
        failed: u64,
    ) -> Result<()> {
        let mut configs = self.repo_configs.lock().unwrap();
        let config = configs
            .get_mut(&id.to_string())
            .ok_or_else(|| StateError::RepoConfigNotFound { id: id.to_string() })?;
        config.builds_fetched += fetched;
        config.builds_completed += completed;
        config.builds_failed += failed;
        Ok(())
    }

    async fn delete_repo_config_cascade(&self, id: &RepoConfigId) -> Result<()> {
        let key = id.to_string();
        self.repo_configs.lock().unwrap().remove(&key);

        let ingestion_ids: Vec<String> = {
            let ingestion = self.ingestion_builds.lock().unwrap();
            ingestion
                .values()
                .filter(|b| b.repo_config_id.to_string() == key)
                .map(|b| b.id.to_string())
                .collect()
        };
        {
            let mut ingestion = self.ingestion_builds.lock().unwrap();
            for iid in &ingestion_ids {
                ingestion.remove(iid);
            }
        }
        {
            let mut index = self.ingestion_business_index.lock().unwrap();
            index.retain(|(cfg, _), _| cfg != &key);
        }
        {
            let mut training = self.training_builds.lock().unwrap();
            training.retain(|_, b| b.repo_config_id.to_string() != key);
        }
        Ok(())
    }

    async fn list_repo_configs_for_repository(
        &self,
        repo_id: &RawRepositoryId,
    ) -> Result<Vec<RepoConfig>> {
        let key = repo_id.to_string();
        let configs = self.repo_configs.lock().unwrap();
        Ok(configs.values().filter(|c| c.repo_id.to_string() == key).cloned().collect())
    }

    async fn list_all_repo_configs(&self) -> Result<Vec<RepoConfig>> {
        let configs = self.repo_configs.lock().unwrap();
        Ok(configs.values().cloned().collect())
    }
}

#[async_trait]
impl IngestionLedger for MemoryStateStore {
    async fn upsert_ingestion_build(&self, build: IngestionBuild) -> Result<IngestionBuild> {
        let business_key = (
            build.repo_config_id.to_string(),
            build.raw_build_run_id.to_string(),
        );
        let mut index = self.ingestion_business_index.lock().unwrap();
        let mut ingestion = self.ingestion_builds.lock().unwrap();

        if let Some(existing_id) = index.get(&business_key) {
            return Ok(ingestion.get(existing_id).cloned().unwrap());
        }

        let mut build = build;
        build.sequence = self.ingestion_sequence.fetch_add(1, Ordering::SeqCst) + 1;

        index.insert(business_key, build.id.to_string());
        ingestion.insert(build.id.to_string(), build.clone());
        Ok(build)
    }

    async fn get_ingestion_build(&self, id: &IngestionBuildId) -> Result<IngestionBuild> {
        let ingestion = self.ingestion_builds.lock().unwrap();
        ingestion
            .get(&id.to_string())
            .cloned()
            .ok_or_else(|| StateError::IngestionBuildNotFound { id: id.to_string() })
    }

    async fn save_ingestion_build(&self, build: IngestionBuild) -> Result<IngestionBuild> {
        let mut ingestion = self.ingestion_builds.lock().unwrap();
        ingestion.insert(build.id.to_string(), build.clone());
        Ok(build)
    }

    async fn list_ingestion_builds_for_config(
        &self,
        config_id: &RepoConfigId,
    ) -> Result<Vec<IngestionBuild>> {
        let ingestion = self.ingestion_builds.lock().unwrap();
        Ok(ingestion
            .values()
            .filter(|b| &b.repo_config_id == config_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TrainingStore for MemoryStateStore {
    async fn upsert_training_build(&self, build: TrainingBuild) -> Result<TrainingBuild> {
        let mut training = self.training_builds.lock().unwrap();
        let existing_id = training
            .values()
            .find(|b| b.raw_build_run_id == build.raw_build_run_id)
            .map(|b| b.id.to_string());
        let mut stored = build;
        if let Some(id) = existing_id {
            stored.id = TrainingBuildId(uuid::Uuid::parse_str(&id).unwrap());
        }
        training.insert(stored.id.to_string(), stored.clone());
        Ok(stored)
    }

    async fn get_training_build(&self, id: &TrainingBuildId) -> Result<TrainingBuild> {
        let training = self.training_builds.lock().unwrap();
        training
            .get(&id.to_string())
            .cloned()
            .ok_or_else(|| StateError::TrainingBuildNotFound { id: id.to_string() })
    }

    async fn list_training_builds_for_config(
        &self,
        config_id: &RepoConfigId,
    ) -> Result<Vec<TrainingBuild>> {
        let training = self.training_builds.lock().unwrap();
        Ok(training
            .values()
            .filter(|b| &b.repo_config_id == config_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuditLogStore for MemoryStateStore {
    async fn append_audit_log(&self, log: FeatureAuditLog) -> Result<FeatureAuditLog> {
        let mut logs = self.audit_logs.lock().unwrap();
        logs.insert(log.id.to_string(), log.clone());
        Ok(log)
    }

    async fn get_audit_log_for_build(
        &self,
        raw_build_run_id: &RawBuildRunId,
    ) -> Result<Option<FeatureAuditLog>> {
        let logs = self.audit_logs.lock().unwrap();
        Ok(logs
            .values()
            .find(|l| &l.raw_build_run_id == raw_build_run_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildrisk_domain::ResourceKind;

    #[tokio::test]
    async fn ingestion_upsert_is_idempotent_on_business_key() {
        let store = MemoryStateStore::new();
        let config_id = RepoConfigId::new();
        let run_id = RawBuildRunId::new();

        let build = IngestionBuild::new(
            config_id.clone(),
            run_id.clone(),
            "run-1",
            "sha1",
            vec![ResourceKind::BareRepo],
        );
        let first = store.upsert_ingestion_build(build.clone()).await.unwrap();

        let duplicate = IngestionBuild::new(
            config_id.clone(),
            run_id.clone(),
            "run-1",
            "sha1",
            vec![ResourceKind::BareRepo],
        );
        let second = store.upsert_ingestion_build(duplicate).await.unwrap();

        assert_eq!(first.id, second.id);
        let all = store
            .list_ingestion_builds_for_config(&config_id)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn cascade_delete_removes_dependent_records() {
        let store = MemoryStateStore::new();
        let config = RepoConfig::new(RawRepositoryId::new(), buildrisk_domain::CiProvider::GitHub);
        let config = store.create_repo_config(config).await.unwrap();

        let build = IngestionBuild::new(
            config.id.clone(),
            RawBuildRunId::new(),
            "run-1",
            "sha1",
            vec![ResourceKind::BareRepo],
        );
        store.upsert_ingestion_build(build).await.unwrap();

        store.delete_repo_config_cascade(&config.id).await.unwrap();

        let remaining = store
            .list_ingestion_builds_for_config(&config.id)
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }
}
