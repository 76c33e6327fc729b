//! SurrealDB-backed implementation of the storage traits.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use surrealdb::engine::local::{Db, Mem};
use surrealdb::Surreal;
use tracing::instrument;

use buildrisk_domain::ids::{
    IngestionBuildId, RawBuildRunId, RawRepositoryId, RepoConfigId, TrainingBuildId,
};
use buildrisk_domain::{
    FeatureAuditLog, IngestionBuild, RawBuildRun, RawRepository, RepoConfig, TrainingBuild,
};

use crate::error::{Result, StateError};
use crate::storage_traits::{
    AuditLogStore, BuildRunCatalog, IngestionLedger, RepoConfigStore, RepositoryCatalog,
    TrainingStore,
};

const SCHEMA: &str = r#"
DEFINE TABLE raw_repository SCHEMAFULL;
DEFINE FIELD full_name ON raw_repository TYPE string;
DEFINE INDEX raw_repository_full_name ON raw_repository COLUMNS full_name UNIQUE;

DEFINE TABLE raw_build_run SCHEMAFULL;
DEFINE FIELD repo_id ON raw_build_run TYPE string;
DEFINE FIELD provider_build_id ON raw_build_run TYPE string;
DEFINE INDEX raw_build_run_business_key ON raw_build_run COLUMNS repo_id, provider_build_id UNIQUE;

DEFINE TABLE repo_config SCHEMAFULL;
DEFINE FIELD repo_id ON repo_config TYPE string;

DEFINE TABLE ingestion_build SCHEMAFULL;
DEFINE FIELD repo_config_id ON ingestion_build TYPE string;
DEFINE FIELD raw_build_run_id ON ingestion_build TYPE string;
DEFINE FIELD sequence ON ingestion_build TYPE int;
DEFINE INDEX ingestion_build_business_key ON ingestion_build COLUMNS repo_config_id, raw_build_run_id UNIQUE;

DEFINE TABLE sequence_counter SCHEMAFULL;
DEFINE FIELD value ON sequence_counter TYPE int;

DEFINE TABLE training_build SCHEMAFULL;
DEFINE FIELD raw_build_run_id ON training_build TYPE string;

DEFINE TABLE feature_audit_log SCHEMAFULL;
DEFINE FIELD raw_build_run_id ON feature_audit_log TYPE string;
"#;

/// Thin wrapper around a `Surreal<Db>` handle: one struct owning schema
/// setup plus every per-entity CRUD method.
pub struct SurrealStateStore {
    db: Arc<Surreal<Db>>,
}

impl SurrealStateStore {
    #[instrument]
    pub async fn setup_db() -> Result<Self> {
        let db = Surreal::new::<Mem>(()).await?;
        db.use_ns("buildrisk").use_db("buildrisk").await?;
        let store = Self { db: Arc::new(db) };
        store.init_schema().await?;
        Ok(store)
    }

    #[instrument(skip(self))]
    async fn init_schema(&self) -> Result<()> {
        self.db.query(SCHEMA).await?;
        Ok(())
    }

    /// Atomically bumps the `ingestion_build` insertion counter and returns
    /// the new value, giving every ingestion build a monotonic `sequence`
    /// independent of its random record id or `created_at`.
    async fn next_ingestion_sequence(&self) -> Result<i64> {
        #[derive(serde::Deserialize)]
        struct SequenceCounter {
            value: i64,
        }
        let mut response = self
            .db
            .query("UPSERT sequence_counter:ingestion_build SET value = (value ?? 0) + 1 RETURN value")
            .await?;
        let rows: Vec<SequenceCounter> = response.take(0)?;
        rows.into_iter()
            .next()
            .map(|r| r.value)
            .ok_or_else(|| StateError::Database("sequence_counter upsert returned no record".into()))
    }
}

#[async_trait]
impl RepositoryCatalog for SurrealStateStore {
    #[instrument(skip(self, repo))]
    async fn upsert_repository(&self, repo: RawRepository) -> Result<RawRepository> {
        let key = repo.id.to_string();
        let record: Option<RawRepository> = self
            .db
            .upsert(("raw_repository", key))
            .content(repo.clone())
            .await?;
        record.ok_or_else(|| StateError::Database("upsert_repository returned no record".into()))
    }

    #[instrument(skip(self))]
    async fn get_repository(&self, id: &RawRepositoryId) -> Result<RawRepository> {
        let record: Option<RawRepository> =
            self.db.select(("raw_repository", id.to_string())).await?;
        record.ok_or_else(|| StateError::RepositoryNotFound { id: id.to_string() })
    }

    #[instrument(skip(self))]
    async fn get_repository_by_full_name(&self, full_name: &str) -> Result<Option<RawRepository>> {
        let mut response = self
            .db
            .query("SELECT * FROM raw_repository WHERE full_name = $full_name LIMIT 1")
            .bind(("full_name", full_name.to_string()))
            .await?;
        let repos: Vec<RawRepository> = response.take(0)?;
        Ok(repos.into_iter().next())
    }
}

#[async_trait]
impl BuildRunCatalog for SurrealStateStore {
    #[instrument(skip(self, build_run))]
    async fn upsert_build_run(&self, build_run: RawBuildRun) -> Result<RawBuildRun> {
        let key = build_run.id.to_string();
        let record: Option<RawBuildRun> = self
            .db
            .upsert(("raw_build_run", key))
            .content(build_run.clone())
            .await?;
        record.ok_or_else(|| StateError::Database("upsert_build_run returned no record".into()))
    }

    #[instrument(skip(self))]
    async fn get_build_run(&self, id: &RawBuildRunId) -> Result<RawBuildRun> {
        let record: Option<RawBuildRun> =
            self.db.select(("raw_build_run", id.to_string())).await?;
        record.ok_or_else(|| StateError::Database(format!("build run not found: {id}")))
    }

    #[instrument(skip(self, shas))]
    async fn shas_already_stored(
        &self,
        repo_id: &RawRepositoryId,
        shas: &[String],
    ) -> Result<HashSet<String>> {
        let mut response = self
            .db
            .query("SELECT commit_sha FROM raw_build_run WHERE repo_id = $repo_id AND commit_sha IN $shas")
            .bind(("repo_id", repo_id.to_string()))
            .bind(("shas", shas.to_vec()))
            .await?;
        let rows: Vec<RawBuildRun> = response.take(0)?;
        Ok(rows.into_iter().map(|r| r.commit_sha).collect())
    }

    #[instrument(skip(self))]
    async fn list_build_runs_for_repo(&self, repo_id: &RawRepositoryId) -> Result<Vec<RawBuildRun>> {
        let mut response = self
            .db
            .query("SELECT * FROM raw_build_run WHERE repo_id = $repo_id ORDER BY build_number")
            .bind(("repo_id", repo_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }
}

#[async_trait]
impl RepoConfigStore for SurrealStateStore {
    #[instrument(skip(self, config))]
    async fn create_repo_config(&self, config: RepoConfig) -> Result<RepoConfig> {
        let key = config.id.to_string();
        let record: Option<RepoConfig> = self
            .db
            .create(("repo_config", key))
            .content(config.clone())
            .await?;
        record.ok_or_else(|| StateError::Database("create_repo_config returned no record".into()))
    }

    #[instrument(skip(self))]
    async fn get_repo_config(&self, id: &RepoConfigId) -> Result<RepoConfig> {
        let record: Option<RepoConfig> = self.db.select(("repo_config", id.to_string())).await?;
        record.ok_or_else(|| StateError::RepoConfigNotFound { id: id.to_string() })
    }

    #[instrument(skip(self, config))]
    async fn save_repo_config(&self, config: RepoConfig) -> Result<RepoConfig> {
        let key = config.id.to_string();
        let record: Option<RepoConfig> = self
            .db
            .update(("repo_config", key))
            .content(config.clone())
            .await?;
        record.ok_or_else(|| StateError::RepoConfigNotFound {
            id: config.id.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn increment_counters(
        &self,
        id: &RepoConfigId,
        fetched: u64,
        completed: u64,
        failed: u64,
    ) -> Result<()> {
        self.db
            .query(
                "UPDATE repo_config:$id SET builds_fetched += $fetched, \
                 builds_completed += $completed, builds_failed += $failed",
            )
            .bind(("id", id.to_string()))
            .bind(("fetched", fetched))
            .bind(("completed", completed))
            .bind(("failed", failed))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_repo_config_cascade(&self, id: &RepoConfigId) -> Result<()> {
        let key = id.to_string();
        self.db
            .query(
                "DELETE ingestion_build WHERE repo_config_id = $id; \
                 DELETE training_build WHERE repo_config_id = $id; \
                 DELETE repo_config:$id",
            )
            .bind(("id", key))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_repo_configs_for_repository(
        &self,
        repo_id: &RawRepositoryId,
    ) -> Result<Vec<RepoConfig>> {
        let mut response = self
            .db
            .query("SELECT * FROM repo_config WHERE repo_id = $repo_id")
            .bind(("repo_id", repo_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    #[instrument(skip(self))]
    async fn list_all_repo_configs(&self) -> Result<Vec<RepoConfig>> {
        let mut response = self.db.query("SELECT * FROM repo_config").await?;
        Ok(response.take(0)?)
    }
}

#[async_trait]
impl IngestionLedger for SurrealStateStore {
    #[instrument(skip(self, build))]
    async fn upsert_ingestion_build(&self, build: IngestionBuild) -> Result<IngestionBuild> {
        let mut response = self
            .db
            .query(
                "SELECT * FROM ingestion_build \
                 WHERE repo_config_id = $cfg AND raw_build_run_id = $run LIMIT 1",
            )
            .bind(("cfg", build.repo_config_id.to_string()))
            .bind(("run", build.raw_build_run_id.to_string()))
            .await?;
        let existing: Vec<IngestionBuild> = response.take(0)?;
        if let Some(found) = existing.into_iter().next() {
            return Ok(found);
        }

        let mut build = build;
        build.sequence = self.next_ingestion_sequence().await?;

        let key = build.id.to_string();
        let record: Option<IngestionBuild> = self
            .db
            .create(("ingestion_build", key))
            .content(build.clone())
            .await?;
        record.ok_or_else(|| StateError::Database("upsert_ingestion_build returned no record".into()))
    }

    #[instrument(skip(self))]
    async fn get_ingestion_build(&self, id: &IngestionBuildId) -> Result<IngestionBuild> {
        let record: Option<IngestionBuild> =
            self.db.select(("ingestion_build", id.to_string())).await?;
        record.ok_or_else(|| StateError::IngestionBuildNotFound { id: id.to_string() })
    }

    #[instrument(skip(self, build))]
    async fn save_ingestion_build(&self, build: IngestionBuild) -> Result<IngestionBuild> {
        let key = build.id.to_string();
        let record: Option<IngestionBuild> = self
            .db
            .update(("ingestion_build", key))
            .content(build.clone())
            .await?;
        record.ok_or_else(|| StateError::IngestionBuildNotFound {
            id: build.id.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn list_ingestion_builds_for_config(
        &self,
        config_id: &RepoConfigId,
    ) -> Result<Vec<IngestionBuild>> {
        let mut response = self
            .db
            .query("SELECT * FROM ingestion_build WHERE repo_config_id = $cfg")
            .bind(("cfg", config_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }
}

#[async_trait]
impl TrainingStore for SurrealStateStore {
    #[instrument(skip(self, build))]
    async fn upsert_training_build(&self, build: TrainingBuild) -> Result<TrainingBuild> {
        let mut response = self
            .db
            .query("SELECT * FROM training_build WHERE raw_build_run_id = $run LIMIT 1")
            .bind(("run", build.raw_build_run_id.to_string()))
            .await?;
        let existing: Vec<TrainingBuild> = response.take(0)?;
        let key = existing
            .into_iter()
            .next()
            .map(|b| b.id.to_string())
            .unwrap_or(build.id.to_string());

        let record: Option<TrainingBuild> = self
            .db
            .upsert(("training_build", key))
            .content(build.clone())
            .await?;
        record.ok_or_else(|| StateError::Database("upsert_training_build returned no record".into()))
    }

    #[instrument(skip(self))]
    async fn get_training_build(&self, id: &TrainingBuildId) -> Result<TrainingBuild> {
        let record: Option<TrainingBuild> =
            self.db.select(("training_build", id.to_string())).await?;
        record.ok_or_else(|| StateError::TrainingBuildNotFound { id: id.to_string() })
    }

    #[instrument(skip(self))]
    async fn list_training_builds_for_config(
        &self,
        config_id: &RepoConfigId,
    ) -> Result<Vec<TrainingBuild>> {
        let mut response = self
            .db
            .query("SELECT * FROM training_build WHERE repo_config_id = $cfg")
            .bind(("cfg", config_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }
}

#[async_trait]
impl AuditLogStore for SurrealStateStore {
    #[instrument(skip(self, log))]
    async fn append_audit_log(&self, log: FeatureAuditLog) -> Result<FeatureAuditLog> {
        let key = log.id.to_string();
        let record: Option<FeatureAuditLog> = self
            .db
            .create(("feature_audit_log", key))
            .content(log.clone())
            .await?;
        record.ok_or_else(|| StateError::Database("append_audit_log returned no record".into()))
    }

    #[instrument(skip(self))]
    async fn get_audit_log_for_build(
        &self,
        raw_build_run_id: &RawBuildRunId,
    ) -> Result<Option<FeatureAuditLog>> {
        let mut response = self
            .db
            .query("SELECT * FROM feature_audit_log WHERE raw_build_run_id = $run LIMIT 1")
            .bind(("run", raw_build_run_id.to_string()))
            .await?;
        let rows: Vec<FeatureAuditLog> = response.take(0)?;
        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildrisk_domain::CiProvider;

    #[tokio::test]
    async fn setup_db_applies_schema_and_roundtrips_a_repository() {
        let store = SurrealStateStore::setup_db().await.unwrap();
        let repo = RawRepository::new("octo/hello", "1", CiProvider::GitHub, "main");
        let saved = store.upsert_repository(repo.clone()).await.unwrap();
        let fetched = store.get_repository(&saved.id).await.unwrap();
        assert_eq!(fetched.full_name, "octo/hello");
    }
}
