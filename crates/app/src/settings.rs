//! The small JSON file holding the API key, wallet address and display toggles.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_SETTINGS_FILE: &str = "api_key.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_true")]
    pub address_visible: bool,
    #[serde(default)]
    pub use_local_time: bool,
    /// Keys this program does not know about, written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            address: String::new(),
            address_visible: true,
            use_local_time: false,
            extra: Map::new(),
        }
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Io(io::Error),
    Parse { path: PathBuf, message: String },
    Encode(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(err) => write!(f, "{err}"),
            SettingsError::Parse { path, message } => {
                write!(f, "invalid settings file {}: {message}", path.display())
            }
            SettingsError::Encode(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<io::Error> for SettingsError {
    fn from(err: io::Error) -> Self {
        SettingsError::Io(err)
    }
}

#[derive(Clone, Debug)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file yields the defaults.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(err) => return Err(err.into()),
        };
        if contents.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_json::from_str(&contents).map_err(|err| SettingsError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    /// Replaces the whole file.
    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let json = serde_json::to_vec_pretty(settings)
            .map_err(|err| SettingsError::Encode(err.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        if fs::rename(&tmp, &self.path).is_err() {
            let _ = fs::remove_file(&self.path);
            fs::rename(&tmp, &self.path)?;
        }
        Ok(())
    }
}
