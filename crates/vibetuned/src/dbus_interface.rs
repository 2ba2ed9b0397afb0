use crate::engine::{EngineError, EngineHandle};
use serde::Serialize;
use std::path::Path;
use vibetune_core::audio::AudioClip;
use vibetune_core::SourceKind;
use zbus::interface;

/// D-Bus interface for the VibeTune daemon.
///
/// Bus name: org.vibetune.VibeTune1
/// Object path: /org/vibetune/VibeTune1
pub struct VibeTuneService {
    pub engine: EngineHandle,
}

fn engine_error(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::NotRecorded(_) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("serialization: {e}")))
}

async fn read_input(path: &str) -> zbus::fdo::Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => zbus::fdo::Error::FileNotFound(path.to_string()),
        _ => zbus::fdo::Error::IOError(format!("{path}: {e}")),
    })
}

#[interface(name = "org.vibetune.VibeTune1")]
impl VibeTuneService {
    /// Detect the emotion on the largest face in a JPEG/PNG image.
    async fn analyze_face(&self, path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(path, "analyze_face requested");
        let image = read_input(path).await?;
        let result = self.engine.analyze_face(image).await.map_err(engine_error)?;
        to_json(&result)
    }

    /// Detect the emotion expressed in free text.
    async fn analyze_text(&self, text: &str) -> zbus::fdo::Result<String> {
        tracing::info!(chars = text.chars().count(), "analyze_text requested");
        let result = self
            .engine
            .analyze_text(text.to_string())
            .await
            .map_err(engine_error)?;
        to_json(&result)
    }

    /// Detect the emotion in a recorded voice clip (WAV, MP3, M4A, FLAC, OGG).
    async fn analyze_voice(&self, path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(path, "analyze_voice requested");
        let data = read_input(path).await?;
        let extension = Path::new(path).extension().and_then(|e| e.to_str());
        let clip = AudioClip::new(data, extension);
        let result = self.engine.analyze_voice(clip).await.map_err(engine_error)?;
        to_json(&result)
    }

    /// Latest emotion per source, in first-detection order.
    async fn results(&self) -> zbus::fdo::Result<String> {
        let results = self.engine.results().await.map_err(engine_error)?;
        to_json(&results)
    }

    /// Build a playlist from the emotion recorded for `source`.
    /// A `limit` of 0 uses the daemon's configured default.
    async fn playlist(&self, source: &str, limit: u32) -> zbus::fdo::Result<String> {
        let source: SourceKind = source
            .parse()
            .map_err(|e: vibetune_core::types::UnknownSource| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        tracing::info!(%source, limit, "playlist requested");
        let outcome = self
            .engine
            .playlist(source, limit as usize)
            .await
            .map_err(engine_error)?;
        to_json(&outcome)
    }

    /// Forget every recorded emotion.
    async fn reset(&self) -> zbus::fdo::Result<()> {
        self.engine.reset().await.map_err(engine_error)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(engine_error)?;
        let mut value = serde_json::to_value(&status)
            .map_err(|e| zbus::fdo::Error::Failed(format!("serialization: {e}")))?;
        value["version"] = serde_json::json!(env!("CARGO_PKG_VERSION"));
        Ok(value.to_string())
    }
}
