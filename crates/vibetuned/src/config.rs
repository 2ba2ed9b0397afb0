use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vibetune_core::catalog::{Credentials, DEFAULT_CONNECTION_TTL};
use vibetune_core::playlist::{DEFAULT_MARKET, DEFAULT_PLAYLIST_LIMIT};
use vibetune_core::text::DEFAULT_TEXT_MODEL_URL;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Optional settings file; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub model_dir: Option<PathBuf>,
    pub text_model_url: Option<String>,
    pub text_model_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub market: Option<String>,
    pub playlist_limit: Option<usize>,
    pub face_confidence: Option<f32>,
    pub silence_top_db: Option<f32>,
    pub catalog_ttl_secs: Option<u64>,
}

/// Daemon configuration: config file, then `VIBETUNE_*` environment overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Hosted text-emotion classifier endpoint.
    pub text_model_url: String,
    pub text_model_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Catalog market (2-letter region code).
    pub market: String,
    /// Tracks per playlist when the caller does not say.
    pub playlist_limit: usize,
    /// Minimum top-class probability for a face label.
    pub face_confidence: f32,
    /// Silence cutoff for voice clips, in dB below the loudest frame.
    pub silence_top_db: f32,
    /// How long a catalog connection (or a failed attempt) is reused.
    pub catalog_ttl: Duration,
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match config_path(|key| std::env::var(key).ok()) {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "loading config file");
                read_file(&path)?
            }
            _ => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    /// Merge file settings with variables from `env`; the environment wins.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = env("VIBETUNE_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(vibetune_core::default_model_dir);

        Self {
            model_dir,
            text_model_url: env("VIBETUNE_TEXT_MODEL_URL")
                .or(file.text_model_url)
                .unwrap_or_else(|| DEFAULT_TEXT_MODEL_URL.to_string()),
            text_model_token: env("VIBETUNE_TEXT_MODEL_TOKEN")
                .or_else(|| env("HF_TOKEN"))
                .or(file.text_model_token),
            client_id: env("SPOTIPY_CLIENT_ID")
                .or_else(|| env("VIBETUNE_CLIENT_ID"))
                .or(file.client_id),
            client_secret: env("SPOTIPY_CLIENT_SECRET")
                .or_else(|| env("VIBETUNE_CLIENT_SECRET"))
                .or(file.client_secret),
            market: env("VIBETUNE_MARKET")
                .or(file.market)
                .unwrap_or_else(|| DEFAULT_MARKET.to_string()),
            playlist_limit: parsed(&env, "VIBETUNE_PLAYLIST_LIMIT")
                .or(file.playlist_limit)
                .unwrap_or(DEFAULT_PLAYLIST_LIMIT),
            face_confidence: parsed(&env, "VIBETUNE_FACE_CONFIDENCE")
                .or(file.face_confidence)
                .unwrap_or(vibetune_core::face::DEFAULT_CONFIDENCE_THRESHOLD),
            silence_top_db: parsed(&env, "VIBETUNE_SILENCE_TOP_DB")
                .or(file.silence_top_db)
                .unwrap_or(vibetune_core::audio::DEFAULT_TOP_DB),
            catalog_ttl: parsed(&env, "VIBETUNE_CATALOG_TTL_SECS")
                .or(file.catalog_ttl_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CONNECTION_TTL),
        }
    }

    /// Catalog credentials, when both halves are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        let client_id = self.client_id.clone().filter(|s| !s.is_empty())?;
        let client_secret = self.client_secret.clone().filter(|s| !s.is_empty())?;
        Some(Credentials {
            client_id,
            client_secret,
        })
    }

    /// Path to the SCRFD face locator model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ResNet50 facial-expression classifier.
    pub fn face_model_path(&self) -> PathBuf {
        self.model_dir.join("face_emotion_resnet50.onnx")
    }

    /// Path to the wav2vec2 speech-emotion classifier.
    pub fn voice_model_path(&self) -> PathBuf {
        self.model_dir.join("voice_emotion_wav2vec2.onnx")
    }
}

fn config_path(env: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(explicit) = env("VIBETUNE_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    let base = env("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| env("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("vibetune").join("config.toml"))
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&src).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(FileConfig::default(), env_of(&[("HOME", "/home/u")]));
        assert_eq!(config.market, "US");
        assert_eq!(config.playlist_limit, 10);
        assert_eq!(config.face_confidence, 0.40);
        assert_eq!(config.silence_top_db, 25.0);
        assert_eq!(config.catalog_ttl, Duration::from_secs(3600));
        assert_eq!(config.text_model_url, DEFAULT_TEXT_MODEL_URL);
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            market = "GB"
            playlist_limit = 20
            client_id = "file-id"
            client_secret = "file-secret"
            model_dir = "/opt/models"
            "#,
        )
        .unwrap();
        let config = Config::resolve(
            file,
            env_of(&[("VIBETUNE_MARKET", "IN"), ("SPOTIPY_CLIENT_ID", "env-id")]),
        );
        assert_eq!(config.market, "IN");
        assert_eq!(config.playlist_limit, 20);
        let creds = config.credentials().unwrap();
        assert_eq!(creds.client_id, "env-id");
        assert_eq!(creds.client_secret, "file-secret");
        assert_eq!(config.voice_model_path(), PathBuf::from("/opt/models/voice_emotion_wav2vec2.onnx"));
    }

    #[test]
    fn test_vibetune_credential_aliases() {
        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[("VIBETUNE_CLIENT_ID", "a"), ("VIBETUNE_CLIENT_SECRET", "b")]),
        );
        assert!(config.credentials().is_some());
    }

    #[test]
    fn test_unparsable_env_falls_back() {
        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[("VIBETUNE_PLAYLIST_LIMIT", "lots"), ("VIBETUNE_FACE_CONFIDENCE", " 0.6 ")]),
        );
        assert_eq!(config.playlist_limit, 10);
        assert_eq!(config.face_confidence, 0.6);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("camera = \"/dev/video0\"").is_err());
    }

    #[test]
    fn test_config_path_resolution() {
        assert_eq!(
            config_path(env_of(&[("VIBETUNE_CONFIG", "/etc/vt.toml"), ("HOME", "/h")])),
            Some(PathBuf::from("/etc/vt.toml"))
        );
        assert_eq!(
            config_path(env_of(&[("XDG_CONFIG_HOME", "/x"), ("HOME", "/h")])),
            Some(PathBuf::from("/x/vibetune/config.toml"))
        );
        assert_eq!(
            config_path(env_of(&[("HOME", "/h")])),
            Some(PathBuf::from("/h/.config/vibetune/config.toml"))
        );
    }

    #[test]
    fn test_read_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "playlist_limit = \"ten\"").unwrap();
        assert!(matches!(read_file(&path), Err(ConfigError::Parse { .. })));
    }
}
