//! A session persisted to a local file

use std::{io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};

use super::{SessionError, TokenSession, TokenSet};
use crate::{AccessToken, RefreshToken};

/// A session stored as JSON in a local file
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so concurrent readers see either the old pair or the new pair.
#[derive(Debug)]
pub struct FileSession {
    path: PathBuf,
}

impl FileSession {
    /// Constructs a file-backed session at `path`
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Reads the whole token set, if the file exists and is readable
    pub async fn load(&self) -> Option<TokenSet> {
        match self.read_tokens().await {
            Ok(tokens) => Some(tokens),
            Err(error) if error.kind() == io::ErrorKind::NotFound => None,
            Err(error) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = (&error as &dyn std::error::Error),
                    "unable to read session file"
                );
                None
            }
        }
    }

    async fn read_tokens(&self) -> Result<TokenSet, io::Error> {
        let data = fs::read(&self.path).await?;
        let tokens = serde_json::from_slice(&data)?;
        Ok(tokens)
    }

    async fn write_tokens(&self, tokens: &TokenSet) -> Result<(), SessionError> {
        use tokio::io::AsyncWriteExt;

        let temp_path = self.path.with_extension("tmp");
        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let data = serde_json::to_vec_pretty(tokens)?;
        let mut file = file_opts.open(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenSession for FileSession {
    async fn set_session(&self, tokens: TokenSet) -> Result<(), SessionError> {
        self.write_tokens(&tokens).await
    }

    async fn access_token(&self) -> Option<AccessToken> {
        self.load().await.map(|t| t.access_token)
    }

    async fn refresh_token(&self) -> Option<RefreshToken> {
        self.load().await.map(|t| t.refresh_token)
    }

    async fn clear_session(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use tessera_clock::UnixTime;

    use super::*;

    fn tokens() -> TokenSet {
        TokenSet {
            access_token: AccessToken::from_static("access"),
            refresh_token: RefreshToken::from_static("refresh"),
            expires_at: Some(UnixTime(1_700_000_900)),
        }
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let session = FileSession::new(dir.path().join("session.json"));

        assert_eq!(session.access_token().await, None);
        assert_eq!(session.refresh_token().await, None);
    }

    #[tokio::test]
    async fn round_trips_through_the_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        let session = FileSession::new(path.clone());

        session.set_session(tokens()).await?;

        let reopened = FileSession::new(path.clone());
        assert_eq!(reopened.load().await, Some(tokens()));
        assert!(!path.with_extension("tmp").exists());

        let raw = std::fs::read_to_string(&path)?;
        assert!(raw.contains("\"accessToken\""));
        assert!(raw.contains("\"refreshToken\""));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_readable_only_by_owner() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        FileSession::new(path.clone()).set_session(tokens()).await?;

        let mode = std::fs::metadata(&path)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }

    #[tokio::test]
    async fn clearing_twice_is_fine() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let session = FileSession::new(dir.path().join("session.json"));
        session.set_session(tokens()).await?;

        session.clear_session().await?;
        session.clear_session().await?;

        assert_eq!(session.load().await, None);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json")?;

        assert_eq!(FileSession::new(path).load().await, None);
        Ok(())
    }
}
