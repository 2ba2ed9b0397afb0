//! vibetune-core — Emotion detection and emotion-driven playlists.
//!
//! Three detectors (face image, free text, voice clip) produce raw labels in
//! their models' own vocabularies; the normalizer maps them onto one shared
//! emotion taxonomy, the session keeps the latest emotion per source, and the
//! playlist generator turns an emotion into catalog tracks.

pub mod audio;
pub mod catalog;
pub mod detection;
pub mod face;
pub mod locator;
pub mod normalizer;
pub mod pipeline;
pub mod playlist;
pub mod session;
pub mod text;
pub mod types;
pub mod voice;

pub use detection::{Classification, DetectionResult, Detector, DetectorOutput, Diagnostic, ModelSlot};
pub use pipeline::{Pipeline, PipelineError};
pub use types::{Emotion, SourceKind, Track};

use std::path::PathBuf;

/// `$XDG_DATA_HOME/vibetune/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    let base = std::env::var_os("XDG_DATA_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("/usr/local/share"));
    base.join("vibetune").join("models")
}
