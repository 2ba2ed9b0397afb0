//! One synchronous run per user action: detect, normalize, record, recommend.

use crate::audio::AudioClip;
use crate::catalog::Catalog;
use crate::detection::{DetectionResult, Detector, DetectorOutput, ModelSlot};
use crate::normalizer;
use crate::playlist::{PlaylistError, PlaylistGenerator};
use crate::session::{Session, SessionError};
use crate::types::{Emotion, SourceKind, Track};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Playlist(#[from] PlaylistError),
}

pub struct Pipeline<F, T, V, C> {
    face: F,
    text: T,
    voice: V,
    session: Session,
    playlists: PlaylistGenerator<C>,
}

impl<F, T, V, C> Pipeline<F, T, V, C>
where
    F: Detector<Input = [u8]>,
    T: Detector<Input = str>,
    V: Detector<Input = AudioClip>,
    C: Catalog,
{
    pub fn new(face: F, text: T, voice: V, playlists: PlaylistGenerator<C>) -> Self {
        Self {
            face,
            text,
            voice,
            session: Session::new(),
            playlists,
        }
    }

    pub fn analyze_face(&mut self, image: &[u8]) -> DetectionResult {
        let output = self.face.detect(image);
        self.finish(SourceKind::Face, output)
    }

    pub fn analyze_text(&mut self, text: &str) -> DetectionResult {
        let output = self.text.detect(text);
        self.finish(SourceKind::Text, output)
    }

    pub fn analyze_voice(&mut self, clip: &AudioClip) -> DetectionResult {
        let output = self.voice.detect(clip);
        self.finish(SourceKind::Voice, output)
    }

    fn finish(&mut self, source: SourceKind, output: DetectorOutput) -> DetectionResult {
        let classification = normalizer::normalize(source, &output);
        self.session.record(source, &classification);
        let result = DetectionResult::new(source, &output, &classification);
        tracing::info!(%source, message = %result.message, "detection complete");
        result
    }

    pub fn results(&self) -> &[(SourceKind, Emotion)] {
        self.session.results()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn catalog(&self) -> &C {
        self.playlists.catalog()
    }

    pub fn reset(&mut self) {
        self.session.reset();
    }

    /// Select `source` and build a playlist from its recorded emotion.
    pub fn playlist(&mut self, source: SourceKind, limit: usize) -> Result<(Emotion, Vec<Track>), PipelineError> {
        let emotion = self.session.select(source)?;
        let tracks = self.playlists.try_generate(emotion, limit)?;
        Ok((emotion, tracks))
    }

    /// Per source, why its detector cannot run; `None` when it is ready.
    pub fn readiness(&self) -> [(SourceKind, Option<&str>); 3]
    where
        F: Readiness,
        T: Readiness,
        V: Readiness,
    {
        [
            (SourceKind::Face, self.face.unavailable_reason()),
            (SourceKind::Text, self.text.unavailable_reason()),
            (SourceKind::Voice, self.voice.unavailable_reason()),
        ]
    }
}

/// Whether a detector can run at all.
pub trait Readiness {
    fn unavailable_reason(&self) -> Option<&str>;
}

impl<D: Detector> Readiness for ModelSlot<D> {
    fn unavailable_reason(&self) -> Option<&str> {
        ModelSlot::unavailable_reason(self)
    }
}
