use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical emotion shared by every detector and the playlist generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Calm,
    Fearful,
    Disgust,
    Surprised,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 8] = [
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Calm,
        Emotion::Fearful,
        Emotion::Disgust,
        Emotion::Surprised,
        Emotion::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Happy => "Happy",
            Emotion::Sad => "Sad",
            Emotion::Angry => "Angry",
            Emotion::Calm => "Calm",
            Emotion::Fearful => "Fearful",
            Emotion::Disgust => "Disgust",
            Emotion::Surprised => "Surprised",
            Emotion::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown emotion: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    /// Accepts canonical names, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// Which detector produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Face,
    Text,
    Voice,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Face, SourceKind::Text, SourceKind::Voice];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Face => "Face",
            SourceKind::Text => "Text",
            SourceKind::Voice => "Voice",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source: {0} (expected face, text or voice)")]
pub struct UnknownSource(pub String);

impl FromStr for SourceKind {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

/// A catalog track, fetched fresh per playlist request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub external_url: String,
    pub preview_url: Option<String>,
    /// Medium-resolution album artwork when the catalog offers several sizes.
    pub artwork_url: Option<String>,
}

impl Track {
    /// Identity used for de-duplication within one playlist.
    pub(crate) fn dedup_key(&self) -> (String, String) {
        (self.title.to_lowercase(), self.artist.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emotion_from_str_case_insensitive() {
        assert_eq!("happy".parse::<Emotion>().unwrap(), Emotion::Happy);
        assert_eq!(" SURPRISED ".parse::<Emotion>().unwrap(), Emotion::Surprised);
        assert!("joy".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_emotion_display_roundtrips() {
        for emotion in Emotion::ALL {
            assert_eq!(emotion.to_string().parse::<Emotion>().unwrap(), emotion);
        }
    }

    #[test]
    fn test_source_kind_parse() {
        assert_eq!("voice".parse::<SourceKind>().unwrap(), SourceKind::Voice);
        assert_eq!("Face".parse::<SourceKind>().unwrap(), SourceKind::Face);
        assert!("webcam".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_emotion_serializes_as_name() {
        let json = serde_json::to_string(&Emotion::Calm).unwrap();
        assert_eq!(json, "\"Calm\"");
    }

    #[test]
    fn test_dedup_key_ignores_case() {
        let a = Track {
            title: "Blue".into(),
            artist: "Joni".into(),
            external_url: "a".into(),
            preview_url: None,
            artwork_url: None,
        };
        let b = Track {
            title: "BLUE".into(),
            artist: "joni".into(),
            external_url: "b".into(),
            preview_url: None,
            artwork_url: None,
        };
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
