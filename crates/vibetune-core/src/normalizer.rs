//! Maps each detector's vocabulary onto the canonical [`Emotion`] set.

use crate::detection::{Classification, DetectorOutput};
use crate::types::{Emotion, SourceKind};

/// Face classifier output order (RAF-DB).
pub const FACE_LABELS: [&str; 7] = ["Surprise", "Fear", "Disgust", "Happy", "Sad", "Anger", "Neutral"];

/// Voice classifier output order (wav2vec2 speech emotion head).
pub const VOICE_LABELS: [&str; 8] = [
    "angry", "calm", "happy", "sad", "fearful", "disgust", "surprised", "neutral",
];

const FACE_MAP: [(&str, Emotion); 7] = [
    ("surprise", Emotion::Surprised),
    ("fear", Emotion::Fearful),
    ("disgust", Emotion::Disgust),
    ("happy", Emotion::Happy),
    ("sad", Emotion::Sad),
    ("anger", Emotion::Angry),
    ("neutral", Emotion::Neutral),
];

const TEXT_MAP: [(&str, Emotion); 7] = [
    ("joy", Emotion::Happy),
    ("sadness", Emotion::Sad),
    ("anger", Emotion::Angry),
    ("fear", Emotion::Fearful),
    ("surprise", Emotion::Surprised),
    ("disgust", Emotion::Disgust),
    ("neutral", Emotion::Neutral),
];

const VOICE_MAP: [(&str, Emotion); 8] = [
    ("angry", Emotion::Angry),
    ("calm", Emotion::Calm),
    ("happy", Emotion::Happy),
    ("sad", Emotion::Sad),
    ("fearful", Emotion::Fearful),
    ("disgust", Emotion::Disgust),
    ("surprised", Emotion::Surprised),
    ("neutral", Emotion::Neutral),
];

fn lookup(table: &[(&str, Emotion)], label: &str) -> Option<Emotion> {
    table
        .iter()
        .find(|(raw, _)| raw.eq_ignore_ascii_case(label))
        .map(|(_, e)| *e)
}

/// Map a raw label from `source`'s vocabulary to a canonical emotion.
///
/// Text labels outside the table fall back to `Neutral`; unknown face and
/// voice labels are not classifiable.
pub fn map_label(source: SourceKind, label: &str) -> Option<Emotion> {
    let label = label.trim();
    let table: &[(&str, Emotion)] = match source {
        SourceKind::Face => &FACE_MAP,
        SourceKind::Text => &TEXT_MAP,
        SourceKind::Voice => &VOICE_MAP,
    };

    lookup(table, label)
        .or_else(|| label.parse::<Emotion>().ok())
        .or(match source {
            SourceKind::Text => Some(Emotion::Neutral),
            SourceKind::Face | SourceKind::Voice => None,
        })
}

/// Normalize a detector output. Pure and deterministic.
pub fn normalize(source: SourceKind, output: &DetectorOutput) -> Classification {
    match output {
        DetectorOutput::Diagnostic(d) => Classification::NotClassifiable(d.to_string()),
        DetectorOutput::Label(label) => match map_label(source, label) {
            Some(emotion) => Classification::Emotion(emotion),
            None => {
                tracing::debug!(%source, label, "label outside detector vocabulary");
                Classification::NotClassifiable(format!("Unrecognized {source} label: {label}"))
            }
        },
    }
}
