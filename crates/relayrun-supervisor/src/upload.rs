//! Artifact upload collaborator.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use relayrun_core::FileItem;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::UploadError;

/// Storage that receives artifacts written during a run.
#[async_trait]
pub trait UploadService: Send + Sync {
    /// Store `content` under `name`, replacing any previous content.
    async fn upload_file(&self, content: &str, name: &str) -> Result<(), UploadError>;

    /// Every artifact the service knows about.
    async fn list_files(&self) -> Result<Vec<FileItem>, UploadError>;
}

/// Process-local upload service. Keeps creation times across re-uploads so
/// reconciliation can tell new artifacts from updated ones.
#[derive(Debug)]
pub struct InMemoryUploadService {
    base_url: String,
    files: RwLock<HashMap<String, (FileItem, String)>>,
}

impl InMemoryUploadService {
    /// `base_url` prefixes the download URL of every stored artifact.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Current content of an artifact.
    #[cfg(test)]
    pub(crate) async fn content(&self, name: &str) -> Option<String> {
        self.files
            .read()
            .await
            .get(name)
            .map(|(_, content)| content.clone())
    }
}

impl Default for InMemoryUploadService {
    fn default() -> Self {
        Self::new("memory://artifacts")
    }
}

#[async_trait]
impl UploadService for InMemoryUploadService {
    async fn upload_file(&self, content: &str, name: &str) -> Result<(), UploadError> {
        if name.is_empty() {
            return Err(UploadError::Upload {
                name: name.to_string(),
                reason: "empty artifact name".to_string(),
            });
        }

        let now = Utc::now();
        let mut files = self.files.write().await;
        let entry = files.entry(name.to_string()).or_insert_with(|| {
            let item = FileItem {
                file_name: name.to_string(),
                file_type: name
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_string())
                    .unwrap_or_default(),
                file_size: 0,
                file_uri: format!("{}/{}", self.base_url, name),
                file_url: format!("{}/{}", self.base_url, name),
                upload_type: "agent".to_string(),
                create_time: now,
                update_time: now,
            };
            (item, String::new())
        });
        entry.0.file_size = content.len() as u64;
        entry.0.update_time = now;
        entry.1 = content.to_string();

        debug!(name = %name, size = content.len(), "Stored artifact");
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<FileItem>, UploadError> {
        let mut items: Vec<FileItem> = self
            .files
            .read()
            .await
            .values()
            .map(|(item, _)| item.clone())
            .collect();
        items.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(items)
    }
}
