//! Human-readable rendering of the daemon's JSON replies.

use serde::Deserialize;
use std::fmt::Write;

#[derive(Debug, Deserialize)]
pub struct Detection {
    pub source: String,
    pub label: Option<String>,
    pub emotion: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SourceEmotion {
    pub source: String,
    pub emotion: String,
}

#[derive(Debug, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub external_url: String,
    pub preview_url: Option<String>,
    pub artwork_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Playlist {
    pub source: String,
    pub emotion: String,
    pub tracks: Vec<Track>,
    pub warning: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelStatus {
    pub source: String,
    pub loaded: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Status {
    pub version: Option<String>,
    pub models: Vec<ModelStatus>,
    pub catalog_connected: bool,
    pub market: String,
    pub results: Vec<SourceEmotion>,
}

pub fn detection(d: &Detection) -> String {
    let mut out = format!("{}: {}", d.source, d.message);
    if let (Some(label), Some(_)) = (&d.label, &d.emotion) {
        let _ = write!(out, " (model label: {label})");
    }
    out
}

pub fn results(results: &[SourceEmotion]) -> String {
    if results.is_empty() {
        return "No emotions detected yet.".to_string();
    }
    results
        .iter()
        .map(|r| format!("{:<6} {}", r.source, r.emotion))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn playlist(p: &Playlist) -> String {
    let mut out = format!("Playlist for {} ({} emotion)\n", p.emotion, p.source);
    if let Some(warning) = &p.warning {
        let _ = writeln!(out, "warning: {warning}");
    }
    if p.tracks.is_empty() {
        out.push_str("No songs found. Try again in a moment.");
        return out;
    }
    for (i, t) in p.tracks.iter().enumerate() {
        let _ = writeln!(out, "{:>2}. {} - {}", i + 1, t.title, t.artist);
        let _ = writeln!(out, "    {}", t.external_url);
        if let Some(preview) = &t.preview_url {
            let _ = writeln!(out, "    preview: {preview}");
        }
        if let Some(art) = &t.artwork_url {
            let _ = writeln!(out, "    artwork: {art}");
        }
    }
    out.trim_end().to_string()
}

pub fn status(s: &Status) -> String {
    let mut out = format!("vibetuned {}\n", s.version.as_deref().unwrap_or("(unknown version)"));
    for m in &s.models {
        match (m.loaded, &m.reason) {
            (true, _) => {
                let _ = writeln!(out, "  {:<6} model: loaded", m.source);
            }
            (false, Some(reason)) => {
                let _ = writeln!(out, "  {:<6} model: not loaded ({reason})", m.source);
            }
            (false, None) => {
                let _ = writeln!(out, "  {:<6} model: not loaded", m.source);
            }
        }
    }
    let catalog = if s.catalog_connected { "connected" } else { "not connected" };
    let _ = writeln!(out, "  catalog: {catalog} (market {})", s.market);
    let _ = write!(out, "  results: {}", s.results.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_with_emotion() {
        let d: Detection = serde_json::from_str(
            r#"{"source":"Text","label":"joy","diagnostic":null,"emotion":"Happy","message":"Emotion Detected: Happy"}"#,
        )
        .unwrap();
        assert_eq!(detection(&d), "Text: Emotion Detected: Happy (model label: joy)");
    }

    #[test]
    fn test_detection_with_diagnostic() {
        let d: Detection = serde_json::from_str(
            r#"{"source":"Face","label":null,"diagnostic":"No face detected","emotion":null,"message":"No face detected"}"#,
        )
        .unwrap();
        assert_eq!(detection(&d), "Face: No face detected");
    }

    #[test]
    fn test_empty_playlist_with_warning() {
        let p: Playlist = serde_json::from_str(
            r#"{"source":"Voice","emotion":"Calm","tracks":[],"warning":"Could not fetch songs"}"#,
        )
        .unwrap();
        let text = playlist(&p);
        assert!(text.contains("warning: Could not fetch songs"));
        assert!(text.ends_with("No songs found. Try again in a moment."));
    }

    #[test]
    fn test_playlist_lists_tracks() {
        let p: Playlist = serde_json::from_str(
            r#"{"source":"Text","emotion":"Happy","warning":null,"tracks":[
                {"title":"Song","artist":"Band","external_url":"https://open.spotify.com/track/x",
                 "preview_url":null,"artwork_url":"https://i.scdn.co/image/y"}
            ]}"#,
        )
        .unwrap();
        let text = playlist(&p);
        assert!(text.contains(" 1. Song - Band"));
        assert!(text.contains("artwork: https://i.scdn.co/image/y"));
        assert!(!text.contains("preview:"));
    }

    #[test]
    fn test_results_rendering() {
        assert_eq!(results(&[]), "No emotions detected yet.");
        let rows = vec![SourceEmotion {
            source: "Face".into(),
            emotion: "Sad".into(),
        }];
        assert_eq!(results(&rows), "Face   Sad");
    }

    #[test]
    fn test_status_shows_why_a_model_is_missing() {
        let s: Status = serde_json::from_str(
            r#"{"version":"0.1.0","catalog_connected":false,"market":"US","results":[],"models":[
                {"source":"Face","loaded":false,"reason":"model not found: /models/face.onnx"},
                {"source":"Text","loaded":true,"reason":null}
            ]}"#,
        )
        .unwrap();
        let text = status(&s);
        assert!(text.contains("Face   model: not loaded (model not found: /models/face.onnx)"));
        assert!(text.contains("Text   model: loaded"));
        assert!(text.contains("catalog: not connected (market US)"));
    }
}
