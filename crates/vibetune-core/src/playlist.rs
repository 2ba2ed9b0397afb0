//! Emotion-driven playlist generation over a [`Catalog`].

use crate::catalog::{Catalog, CatalogError, MAX_SEARCH_LIMIT};
use crate::types::{Emotion, Track};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use thiserror::Error;

pub const DEFAULT_MARKET: &str = "US";
pub const DEFAULT_PLAYLIST_LIMIT: usize = 10;
/// Largest playlist a caller may ask for; larger requests are clamped.
pub const MAX_PLAYLIST_LIMIT: usize = 100;

const FALLBACK_PHRASES: &[&str] = &["mood"];

const PHRASES: &[(Emotion, &[&str])] = &[
    (Emotion::Happy, &["upbeat", "feel good", "party", "happy vibes", "energetic"]),
    (Emotion::Sad, &["sad", "melancholy", "emotional", "heartbreak", "sad bollywood"]),
    (Emotion::Angry, &["aggressive", "rage", "hard beats", "angry rap", "workout"]),
    (
        Emotion::Calm,
        &["chill", "ambient", "instrumental calm", "lo-fi chillhop", "meditation"],
    ),
    (
        Emotion::Fearful,
        &["dark ambient", "eerie", "haunting", "mystery", "suspenseful"],
    ),
    (
        Emotion::Disgust,
        &["intense", "chaotic", "experimental hip hop", "noise rock"],
    ),
    (
        Emotion::Surprised,
        &["unexpected", "creative", "experimental pop", "synth surprise"],
    ),
    (
        Emotion::Neutral,
        &["chill study beats", "lo-fi", "background music", "easy listening"],
    ),
];

#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("playlist search for {phrase:?} failed: {source}")]
    Search {
        phrase: String,
        #[source]
        source: CatalogError,
    },
}

/// Catalog search phrases for an emotion.
pub fn search_phrases(emotion: Emotion) -> &'static [&'static str] {
    PHRASES
        .iter()
        .find(|(e, _)| *e == emotion)
        .map(|(_, phrases)| *phrases)
        .unwrap_or(FALLBACK_PHRASES)
}

pub struct PlaylistGenerator<C> {
    catalog: C,
    market: String,
    rng: StdRng,
}

impl<C: Catalog> PlaylistGenerator<C> {
    pub fn new(catalog: C, market: impl Into<String>) -> Self {
        Self {
            catalog,
            market: market.into(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic shuffling, for tests and reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Up to `limit` distinct tracks for `emotion`, or the first catalog failure.
    pub fn try_generate(&mut self, emotion: Emotion, limit: usize) -> Result<Vec<Track>, PlaylistError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut phrases = search_phrases(emotion).to_vec();
        phrases.shuffle(&mut self.rng);

        let mut tracks: Vec<Track> = Vec::with_capacity(limit.min(MAX_SEARCH_LIMIT));
        let mut seen = HashSet::new();

        'phrases: for phrase in phrases {
            let found = self
                .catalog
                .search_tracks(phrase, MAX_SEARCH_LIMIT, &self.market)
                .map_err(|source| PlaylistError::Search {
                    phrase: phrase.to_string(),
                    source,
                })?;
            tracing::debug!(phrase, found = found.len(), "catalog phrase searched");

            for track in found {
                if !seen.insert(track.dedup_key()) {
                    continue;
                }
                tracks.push(track);
                if tracks.len() >= limit {
                    break 'phrases;
                }
            }
        }

        tracks.shuffle(&mut self.rng);
        tracks.truncate(limit);
        tracing::info!(%emotion, count = tracks.len(), "playlist generated");
        Ok(tracks)
    }

    /// Like [`try_generate`](Self::try_generate), but a failure yields an empty playlist.
    pub fn generate(&mut self, emotion: Emotion, limit: usize) -> Vec<Track> {
        self.try_generate(emotion, limit).unwrap_or_else(|e| {
            tracing::warn!(%emotion, error = %e, "playlist generation failed");
            Vec::new()
        })
    }
}
