//! A token store mirrored to a JSON file

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{
    fs,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tollgate::{AccessToken, RefreshToken};

use super::InMemoryTokenStore;
use crate::{TokenPair, TokenStore};

/// An in-memory token store that can be loaded from and persisted to disk
///
/// Reads and writes through [`TokenStore`] only touch memory. Call
/// [`persist`][FileTokenStore::persist] to write the current pair out. On
/// unix platforms the file is created readable only by its owner.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    inner: InMemoryTokenStore,
}

impl FileTokenStore {
    /// Loads the pair stored at `path`
    ///
    /// A missing file produces an empty store.
    ///
    /// # Errors
    ///
    /// The file exists but could not be read or does not hold a token pair.
    #[tracing::instrument(err, skip(path), fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_owned();

        let inner = match fs::File::open(&path).await {
            Ok(mut file) => {
                let mut data = Vec::new();
                file.read_to_end(&mut data).await?;
                let tokens: TokenPair = serde_json::from_slice(&data)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                tracing::debug!("loaded tokens from file");
                InMemoryTokenStore::with_tokens(tokens)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("no token file found, starting empty");
                InMemoryTokenStore::new()
            }
            Err(e) => return Err(e),
        };

        Ok(Self { path, inner })
    }

    /// The file backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current pair to the file
    ///
    /// If the store does not hold a complete pair, the file is removed.
    ///
    /// # Errors
    ///
    /// The file could not be written or removed.
    #[tracing::instrument(err, skip(self), fields(path = %self.path.display()))]
    pub async fn persist(&self) -> io::Result<()> {
        let Some(tokens) = self.inner.tokens() else {
            return match fs::remove_file(&self.path).await {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            };
        };

        let data = serde_json::to_vec_pretty(&tokens)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file_opts = fs::OpenOptions::new();
        file_opts.write(true).create(true).truncate(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        tracing::debug!("persisted tokens to file");
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Option<Arc<AccessToken>> {
        self.inner.access_token()
    }

    fn refresh_token(&self) -> Option<Arc<RefreshToken>> {
        self.inner.refresh_token()
    }

    fn set_tokens(&self, tokens: TokenPair) {
        self.inner.set_tokens(tokens)
    }

    fn set_access_token(&self, token: AccessToken) {
        self.inner.set_access_token(token)
    }

    fn clear(&self) {
        self.inner.clear()
    }
}
