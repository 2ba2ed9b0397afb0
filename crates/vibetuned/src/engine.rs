use crate::config::Config;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use vibetune_core::audio::AudioClip;
use vibetune_core::catalog::{CatalogConnection, CatalogError, SpotifyCatalog};
use vibetune_core::face::FaceEmotionDetector;
use vibetune_core::playlist::{PlaylistGenerator, MAX_PLAYLIST_LIMIT};
use vibetune_core::text::{HostedTextClassifier, TextEmotionDetector};
use vibetune_core::voice::VoiceEmotionDetector;
use vibetune_core::{DetectionResult, Emotion, ModelSlot, Pipeline, PipelineError, SourceKind, Track};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no {0} emotion recorded yet; analyze a {0} input first")]
    NotRecorded(SourceKind),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

type EnginePipeline = Pipeline<
    ModelSlot<FaceEmotionDetector>,
    ModelSlot<TextEmotionDetector<HostedTextClassifier>>,
    ModelSlot<VoiceEmotionDetector>,
    CatalogConnection<SpotifyCatalog>,
>;

/// Playlist answer for one source. Catalog trouble is a warning, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistOutcome {
    pub source: SourceKind,
    pub emotion: Emotion,
    pub tracks: Vec<Track>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceEmotion {
    pub source: SourceKind,
    pub emotion: Emotion,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub models: Vec<ModelStatus>,
    pub catalog_connected: bool,
    pub market: String,
    pub results: Vec<SourceEmotion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub source: SourceKind,
    pub loaded: bool,
    /// Load failure, for a model that is not loaded.
    pub reason: Option<String>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    AnalyzeFace {
        image: Vec<u8>,
        reply: oneshot::Sender<DetectionResult>,
    },
    AnalyzeText {
        text: String,
        reply: oneshot::Sender<DetectionResult>,
    },
    AnalyzeVoice {
        clip: AudioClip,
        reply: oneshot::Sender<DetectionResult>,
    },
    Results {
        reply: oneshot::Sender<Vec<SourceEmotion>>,
    },
    Playlist {
        source: SourceKind,
        limit: usize,
        reply: oneshot::Sender<Result<PlaylistOutcome, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn analyze_face(&self, image: Vec<u8>) -> Result<DetectionResult, EngineError> {
        self.call(|reply| EngineRequest::AnalyzeFace { image, reply }).await
    }

    pub async fn analyze_text(&self, text: String) -> Result<DetectionResult, EngineError> {
        self.call(|reply| EngineRequest::AnalyzeText { text, reply }).await
    }

    pub async fn analyze_voice(&self, clip: AudioClip) -> Result<DetectionResult, EngineError> {
        self.call(|reply| EngineRequest::AnalyzeVoice { clip, reply }).await
    }

    pub async fn results(&self) -> Result<Vec<SourceEmotion>, EngineError> {
        self.call(|reply| EngineRequest::Results { reply }).await
    }

    /// Playlist from the emotion recorded for `source`.
    pub async fn playlist(&self, source: SourceKind, limit: usize) -> Result<PlaylistOutcome, EngineError> {
        self.call(|reply| EngineRequest::Playlist { source, limit, reply })
            .await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }

    pub async fn reset(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::Reset { reply }).await
    }
}

/// Load the detectors and wire up the lazily connected catalog.
///
/// A model that fails to load leaves its detector unavailable; the other
/// detectors keep working.
fn build_pipeline(config: &Config) -> EnginePipeline {
    let face = ModelSlot::from_load(
        SourceKind::Face,
        FaceEmotionDetector::load(&config.scrfd_model_path(), &config.face_model_path())
            .map(|d| d.with_confidence_threshold(config.face_confidence)),
    );
    let text = ModelSlot::from_load(
        SourceKind::Text,
        HostedTextClassifier::new(&config.text_model_url, config.text_model_token.clone())
            .map(TextEmotionDetector::new),
    );
    let voice = ModelSlot::from_load(
        SourceKind::Voice,
        VoiceEmotionDetector::load(&config.voice_model_path()).map(|d| d.with_top_db(config.silence_top_db)),
    );

    let credentials = config.credentials();
    let market = config.market.clone();
    let catalog = CatalogConnection::new(config.catalog_ttl, move || {
        let credentials = credentials.clone().ok_or(CatalogError::MissingCredentials)?;
        SpotifyCatalog::connect(credentials, &market)
    });

    Pipeline::new(face, text, voice, PlaylistGenerator::new(catalog, config.market.clone()))
}

fn source_emotions(pipeline: &EnginePipeline) -> Vec<SourceEmotion> {
    pipeline
        .results()
        .iter()
        .map(|&(source, emotion)| SourceEmotion { source, emotion })
        .collect()
}

fn run_playlist(pipeline: &mut EnginePipeline, source: SourceKind, limit: usize) -> Result<PlaylistOutcome, EngineError> {
    match pipeline.playlist(source, limit) {
        Ok((emotion, tracks)) => Ok(PlaylistOutcome {
            source,
            emotion,
            tracks,
            warning: None,
        }),
        Err(PipelineError::Session(_)) => Err(EngineError::NotRecorded(source)),
        Err(PipelineError::Playlist(e)) => {
            tracing::warn!(%source, error = %e, "playlist unavailable");
            let emotion = pipeline
                .session()
                .get(source)
                .ok_or(EngineError::NotRecorded(source))?;
            Ok(PlaylistOutcome {
                source,
                emotion,
                tracks: Vec::new(),
                warning: Some(format!("Could not fetch songs: {e}. Please try again.")),
            })
        }
    }
}

fn status(pipeline: &EnginePipeline, market: &str) -> EngineStatus {
    EngineStatus {
        models: pipeline
            .readiness()
            .into_iter()
            .map(|(source, reason)| ModelStatus {
                source,
                loaded: reason.is_none(),
                reason: reason.map(str::to_string),
            })
            .collect(),
        catalog_connected: pipeline.catalog().is_connected(),
        market: market.to_string(),
        results: source_emotions(pipeline),
    }
}

/// Requested playlist size: 0 means `default`, anything above the cap is clamped.
fn effective_limit(requested: usize, default: usize) -> usize {
    let limit = if requested == 0 { default } else { requested };
    if limit > MAX_PLAYLIST_LIMIT {
        tracing::warn!(requested = limit, max = MAX_PLAYLIST_LIMIT, "playlist limit clamped");
    }
    limit.min(MAX_PLAYLIST_LIMIT)
}

/// Resolves once the engine thread has stopped.
pub struct EngineExit(oneshot::Receiver<bool>);

impl EngineExit {
    /// Wait for the engine thread to stop; true if it panicked.
    pub async fn wait(self) -> bool {
        self.0.await.unwrap_or(true)
    }
}

/// Reports the engine thread's end, including unwinding from a panic.
struct ExitNotifier(Option<oneshot::Sender<bool>>);

impl Drop for ExitNotifier {
    fn drop(&mut self) {
        let panicked = std::thread::panicking();
        if panicked {
            tracing::error!("engine thread panicked");
        } else {
            tracing::info!("engine thread exiting");
        }
        if let Some(tx) = self.0.take() {
            let _ = tx.send(panicked);
        }
    }
}

fn exit_notifier() -> (ExitNotifier, EngineExit) {
    let (tx, rx) = oneshot::channel();
    (ExitNotifier(Some(tx)), EngineExit(rx))
}

/// Spawn the engine on a dedicated OS thread.
///
/// Models and HTTP clients are created on that thread; requests are served
/// strictly in arrival order. The returned [`EngineExit`] resolves when the
/// thread stops, after which every handle call fails with `ChannelClosed`.
pub fn spawn_engine(config: Config) -> Result<(EngineHandle, EngineExit), EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let (notifier, exit) = exit_notifier();

    std::thread::Builder::new()
        .name("vibetune-engine".into())
        .spawn(move || {
            let _notifier = notifier;
            tracing::info!(model_dir = %config.model_dir.display(), "engine thread started");
            let mut pipeline = build_pipeline(&config);
            let default_limit = config.playlist_limit;

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::AnalyzeFace { image, reply } => {
                        let _ = reply.send(pipeline.analyze_face(&image));
                    }
                    EngineRequest::AnalyzeText { text, reply } => {
                        let _ = reply.send(pipeline.analyze_text(&text));
                    }
                    EngineRequest::AnalyzeVoice { clip, reply } => {
                        let _ = reply.send(pipeline.analyze_voice(&clip));
                    }
                    EngineRequest::Results { reply } => {
                        let _ = reply.send(source_emotions(&pipeline));
                    }
                    EngineRequest::Playlist { source, limit, reply } => {
                        let limit = effective_limit(limit, default_limit);
                        let _ = reply.send(run_playlist(&mut pipeline, source, limit));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(status(&pipeline, &config.market));
                    }
                    EngineRequest::Reset { reply } => {
                        pipeline.reset();
                        tracing::info!("session reset");
                        let _ = reply.send(());
                    }
                }
            }
        })?;

    Ok((EngineHandle { tx }, exit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;

    fn offline_config() -> Config {
        Config::resolve(FileConfig::default(), |key| match key {
            "VIBETUNE_MODEL_DIR" => Some("/nonexistent/vibetune-models".into()),
            "VIBETUNE_TEXT_MODEL_URL" => Some("http://127.0.0.1:9/classify".into()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_missing_models_report_not_loaded() {
        let (engine, _exit) = spawn_engine(offline_config()).unwrap();

        let face = engine.analyze_face(vec![1, 2, 3]).await.unwrap();
        assert_eq!(face.message, "Face model not loaded.");
        let voice = engine
            .analyze_voice(AudioClip::new(vec![], Some("wav")))
            .await
            .unwrap();
        assert_eq!(voice.message, "Voice model not loaded.");

        let status = engine.status().await.unwrap();
        let loaded: Vec<_> = status.models.iter().map(|m| (m.source, m.loaded)).collect();
        assert_eq!(
            loaded,
            vec![(SourceKind::Face, false), (SourceKind::Text, true), (SourceKind::Voice, false)]
        );
        assert!(status.models[0].reason.is_some());
        assert_eq!(status.models[1].reason, None);
        assert!(!status.catalog_connected);
        assert!(engine.results().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_text_and_unrecorded_playlist() {
        let (engine, _exit) = spawn_engine(offline_config()).unwrap();

        let text = engine.analyze_text("   ".into()).await.unwrap();
        assert_eq!(text.message, "Uncertain");
        assert!(matches!(
            engine.playlist(SourceKind::Text, 10).await,
            Err(EngineError::NotRecorded(SourceKind::Text))
        ));
        engine.reset().await.unwrap();
    }

    #[test]
    fn test_effective_limit() {
        assert_eq!(effective_limit(0, 10), 10);
        assert_eq!(effective_limit(3, 10), 3);
        assert_eq!(effective_limit(u32::MAX as usize, 10), MAX_PLAYLIST_LIMIT);
        assert_eq!(effective_limit(0, 5_000), MAX_PLAYLIST_LIMIT);
    }

    #[tokio::test]
    async fn test_huge_playlist_limit_is_answered() {
        let (engine, _exit) = spawn_engine(offline_config()).unwrap();
        assert!(matches!(
            engine.playlist(SourceKind::Face, u32::MAX as usize).await,
            Err(EngineError::NotRecorded(SourceKind::Face))
        ));
        // Still serving after the oversized request.
        assert!(engine.results().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exit_reports_panic() {
        let (notifier, exit) = exit_notifier();
        let joined = std::thread::spawn(move || {
            let _notifier = notifier;
            panic!("engine failure");
        })
        .join();
        assert!(joined.is_err());
        assert!(exit.wait().await);
    }

    #[tokio::test]
    async fn test_exit_reports_clean_shutdown() {
        let (notifier, exit) = exit_notifier();
        std::thread::spawn(move || drop(notifier)).join().unwrap();
        assert!(!exit.wait().await);
    }
}
