//! Per-user session: the latest emotion from each detector and the source
//! chosen to drive playlist generation.

use crate::detection::Classification;
use crate::types::{Emotion, SourceKind};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("no {0} emotion recorded yet")]
    NotRecorded(SourceKind),
}

#[derive(Debug, Default, Clone)]
pub struct Session {
    /// At most one entry per source, in first-insertion order.
    results: Vec<(SourceKind, Emotion)>,
    selected: Option<SourceKind>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a classified emotion for `source`, replacing any earlier one.
    ///
    /// Non-classifiable results leave the session untouched and return false.
    pub fn record(&mut self, source: SourceKind, classification: &Classification) -> bool {
        let Some(emotion) = classification.emotion() else {
            tracing::debug!(%source, "not classifiable, session unchanged");
            return false;
        };

        match self.results.iter_mut().find(|(s, _)| *s == source) {
            Some(slot) => slot.1 = emotion,
            None => self.results.push((source, emotion)),
        }
        tracing::debug!(%source, %emotion, "session updated");
        true
    }

    pub fn results(&self) -> &[(SourceKind, Emotion)] {
        &self.results
    }

    pub fn get(&self, source: SourceKind) -> Option<Emotion> {
        self.results
            .iter()
            .find(|(s, _)| *s == source)
            .map(|(_, e)| *e)
    }

    /// Choose which source drives the playlist.
    pub fn select(&mut self, source: SourceKind) -> Result<Emotion, SessionError> {
        let emotion = self.get(source).ok_or(SessionError::NotRecorded(source))?;
        self.selected = Some(source);
        Ok(emotion)
    }

    pub fn selected(&self) -> Option<(SourceKind, Emotion)> {
        let source = self.selected?;
        self.get(source).map(|e| (source, e))
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn reset(&mut self) {
        self.results.clear();
        self.selected = None;
    }
}
