//! YAML files in the user's data directory (e.g. `~/.local/share/fractal`).
//!
//! The CLI keeps its login credentials here between invocations.

use crate::error::{AppError, Result};
use crate::models::Credentials;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const APP_DIR: &str = "fractal";

/// File holding the credentials written by `fractal auth login`.
pub const TOKEN_FILE: &str = "matrix.creds.yaml";

/// A directory of YAML documents, one per file name.
#[derive(Debug, Clone)]
pub struct UserDataStore {
    dir: PathBuf,
}

impl UserDataStore {
    /// Store rooted at `<data dir>/fractal`.
    pub fn default_location() -> Result<Self> {
        let base = dirs::data_dir().ok_or_else(|| {
            AppError::MissingConfig("could not determine the user data directory".to_string())
        })?;
        Ok(Self::at(base.join(APP_DIR)))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Serialises `data` as YAML into `filename`, creating the directory if needed.
    pub fn write_user_data<T: Serialize>(&self, data: &T, filename: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let yaml = serde_yaml::to_string(data)?;
        let path = self.path_for(filename);
        fs::write(&path, yaml)?;
        debug!("Wrote user data to {}", path.display());
        Ok(path)
    }

    /// Reads `filename` back, returning the data and the file's path.
    pub fn read_user_data<T: DeserializeOwned>(&self, filename: &str) -> Result<(T, PathBuf)> {
        let path = self.path_for(filename);
        let raw = fs::read_to_string(&path)?;
        let data = serde_yaml::from_str(&raw)?;
        Ok((data, path))
    }

    /// Saved login credentials, or `NotLoggedIn` when there are none.
    pub fn load_credentials(&self) -> Result<Credentials> {
        match self.read_user_data::<Credentials>(TOKEN_FILE) {
            Ok((creds, _)) => Ok(creds),
            Err(AppError::Io(e)) if e.kind() == ErrorKind::NotFound => Err(AppError::NotLoggedIn),
            Err(e) => Err(e),
        }
    }

    pub fn save_credentials(&self, credentials: &Credentials) -> Result<PathBuf> {
        let path = self.write_user_data(credentials, TOKEN_FILE)?;
        info!("Saved credentials for {}", credentials.matrix_id);
        Ok(path)
    }

    /// Removes the credentials file. Returns `false` if there was nothing to remove.
    pub fn clear_credentials(&self) -> Result<bool> {
        match fs::remove_file(self.path_for(TOKEN_FILE)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
