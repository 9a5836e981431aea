use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    #[serde(flatten)]
    session: Session,
    updated_at: DateTime<Utc>,
}

/// Persists the pair as a JSON file readable only by the owning user.
///
/// Writes go to a sibling temp file that is renamed over the target, so a crash never
/// leaves half a pair behind.
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Option<Session>, CredentialStoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CredentialStoreError::Io(e.to_string())),
        };
        let stored: StoredSession = serde_json::from_slice(&bytes)
            .map_err(|e| CredentialStoreError::Corrupt(e.to_string()))?;
        Ok(Some(stored.session))
    }

    async fn write_atomically(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await
    }
}

#[async_trait::async_trait]
impl CredentialStore for FileCredentialStore {
    async fn access_token(&self) -> Result<Option<AccessToken>, CredentialStoreError> {
        Ok(self.load().await?.map(|session| session.access_token))
    }

    async fn refresh_token(&self) -> Result<Option<RefreshToken>, CredentialStoreError> {
        Ok(self.load().await?.map(|session| session.refresh_token))
    }

    async fn set_tokens(&self, session: &Session) -> Result<(), CredentialStoreError> {
        let stored = StoredSession {
            session: session.clone(),
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&stored)
            .map_err(|e| CredentialStoreError::Io(e.to_string()))?;

        let _guard = self.write_lock.lock().await;
        self.write_atomically(&bytes)
            .await
            .map_err(|e| CredentialStoreError::Io(e.to_string()))?;
        debug!(path = %self.path.display(), "credentials written");
        Ok(())
    }

    async fn clear_tokens(&self) -> Result<(), CredentialStoreError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CredentialStoreError::Io(e.to_string())),
        }
    }
}
