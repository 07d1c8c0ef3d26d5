use super::types::VerificationResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(String),
    #[error("Store serialization failed: {0}")]
    Serialization(String),
}

/// Narrows a history query. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultFilter {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub min_score: Option<u8>,
    pub since: Option<DateTime<Utc>>,
}

impl ResultFilter {
    pub fn for_model(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            model: Some(model.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, result: &VerificationResult) -> bool {
        if let Some(provider) = &self.provider
            && !provider.eq_ignore_ascii_case(&result.provider)
        {
            return false;
        }
        if let Some(model) = &self.model
            && model != &result.model
        {
            return false;
        }
        if let Some(min_score) = self.min_score
            && result.score < min_score
        {
            return false;
        }
        if let Some(since) = self.since
            && result.verified_at < since
        {
            return false;
        }
        true
    }
}

/// Persistence collaborator for verification history
#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn save(&self, result: &VerificationResult) -> Result<(), StoreError>;

    /// Matching results, newest first
    async fn list(
        &self,
        filter: &ResultFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<VerificationResult>, StoreError>;
}

fn page(mut results: Vec<VerificationResult>, limit: usize, offset: usize) -> Vec<VerificationResult> {
    results.sort_by(|a, b| b.verified_at.cmp(&a.verified_at));
    results.into_iter().skip(offset).take(limit).collect()
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    results: RwLock<Vec<VerificationResult>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

#[async_trait]
impl VerificationStore for InMemoryStore {
    async fn save(&self, result: &VerificationResult) -> Result<(), StoreError> {
        self.results.write().await.push(result.clone());
        Ok(())
    }

    async fn list(
        &self,
        filter: &ResultFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        let matching = self
            .results
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(page(matching, limit, offset))
    }
}

/// One JSON document per result in a directory. Writes go through a temp
/// file and a rename so readers never see a partial document.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        async_fs::create_dir_all(&directory)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {e}", directory.display())))?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn result_path(&self, result: &VerificationResult) -> PathBuf {
        self.directory.join(format!("{}.json", result.id))
    }
}

#[async_trait]
impl VerificationStore for FileStore {
    async fn save(&self, result: &VerificationResult) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(result)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let target = self.result_path(result);
        let temp = target.with_extension("json.tmp");
        async_fs::write(&temp, &content)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {e}", temp.display())))?;
        async_fs::rename(&temp, &target)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {e}", target.display())))?;

        debug!("Saved verification {} to {}", result.id, target.display());
        Ok(())
    }

    async fn list(
        &self,
        filter: &ResultFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        let mut entries = async_fs::read_dir(&self.directory)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {e}", self.directory.display())))?;

        let mut matching = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let content = match async_fs::read(&path).await {
                Ok(content) => content,
                Err(err) => {
                    warn!("Skipping unreadable result {}: {}", path.display(), err);
                    continue;
                }
            };
            match serde_json::from_slice::<VerificationResult>(&content) {
                Ok(result) if filter.matches(&result) => matching.push(result),
                Ok(_) => {}
                Err(err) => warn!("Skipping corrupt result {}: {}", path.display(), err),
            }
        }

        Ok(page(matching, limit, offset))
    }
}
