//! Text emotion detector backed by a hosted DistilRoBERTa emotion classifier.

use crate::detection::{Detector, DetectorOutput, Diagnostic};
use crate::types::SourceKind;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TEXT_MODEL_URL: &str =
    "https://router.huggingface.co/hf-inference/models/j-hartmann/emotion-english-distilroberta-base";

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("classifier returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("classifier returned no labels")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

/// Sequence classifier over free text.
pub trait TextClassifier {
    fn classify(&mut self, text: &str) -> Result<Vec<LabelScore>, ClassifierError>;
}

/// Classifier served over the Hugging Face inference HTTP API.
pub struct HostedTextClassifier {
    client: Client,
    url: String,
    token: Option<String>,
}

/// The endpoint answers with one list per input, or a flat list for a single input.
#[derive(Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Batched(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl InferenceResponse {
    fn into_scores(self) -> Vec<LabelScore> {
        match self {
            InferenceResponse::Batched(batches) => batches.into_iter().next().unwrap_or_default(),
            InferenceResponse::Flat(scores) => scores,
        }
    }
}

impl HostedTextClassifier {
    pub fn new(url: &str, token: Option<String>) -> Result<Self, ClassifierError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        tracing::info!(url, authenticated = token.is_some(), "text classifier endpoint configured");
        Ok(Self {
            client,
            url: url.to_string(),
            token,
        })
    }
}

impl TextClassifier for HostedTextClassifier {
    fn classify(&mut self, text: &str) -> Result<Vec<LabelScore>, ClassifierError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "inputs": text }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let scores = response.json::<InferenceResponse>()?.into_scores();
        if scores.is_empty() {
            return Err(ClassifierError::Empty);
        }
        Ok(scores)
    }
}

pub struct TextEmotionDetector<C> {
    classifier: C,
}

impl<C: TextClassifier> TextEmotionDetector<C> {
    pub fn new(classifier: C) -> Self {
        Self { classifier }
    }
}

fn top_label(scores: &[LabelScore]) -> Option<&LabelScore> {
    scores.iter().max_by(|a, b| a.score.total_cmp(&b.score))
}

impl<C: TextClassifier> Detector for TextEmotionDetector<C> {
    type Input = str;

    fn source(&self) -> SourceKind {
        SourceKind::Text
    }

    fn detect(&mut self, input: &str) -> DetectorOutput {
        let text = input.trim();
        if text.is_empty() {
            return Diagnostic::Uncertain.into();
        }

        match self.classifier.classify(text) {
            Ok(scores) => match top_label(&scores) {
                Some(top) => {
                    tracing::debug!(label = %top.label, score = top.score, "text classified");
                    DetectorOutput::label(top.label.clone())
                }
                None => Diagnostic::Error(ClassifierError::Empty.to_string()).into(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "text analysis failed");
                Diagnostic::Error(format!("Text analysis failed: {e}")).into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        calls: usize,
        answer: Vec<LabelScore>,
    }

    impl TextClassifier for Scripted {
        fn classify(&mut self, _text: &str) -> Result<Vec<LabelScore>, ClassifierError> {
            self.calls += 1;
            Ok(self.answer.clone())
        }
    }

    struct Failing;

    impl TextClassifier for Failing {
        fn classify(&mut self, _text: &str) -> Result<Vec<LabelScore>, ClassifierError> {
            Err(ClassifierError::Status {
                status: 503,
                body: "loading".into(),
            })
        }
    }

    fn score(label: &str, score: f32) -> LabelScore {
        LabelScore {
            label: label.into(),
            score,
        }
    }

    #[test]
    fn test_blank_text_is_uncertain_without_calling_model() {
        let mut detector = TextEmotionDetector::new(Scripted {
            calls: 0,
            answer: vec![score("joy", 0.9)],
        });
        for input in ["", "   ", "\n\t "] {
            assert_eq!(detector.detect(input), Diagnostic::Uncertain.into());
        }
        assert_eq!(detector.classifier.calls, 0);
    }

    #[test]
    fn test_top_scoring_label_wins() {
        let mut detector = TextEmotionDetector::new(Scripted {
            calls: 0,
            answer: vec![score("neutral", 0.1), score("joy", 0.8), score("surprise", 0.1)],
        });
        assert_eq!(detector.detect("I had a wonderful day"), DetectorOutput::label("joy"));
        assert_eq!(detector.classifier.calls, 1);
    }

    #[test]
    fn test_classifier_failure_is_error_diagnostic() {
        let mut detector = TextEmotionDetector::new(Failing);
        match detector.detect("hello") {
            DetectorOutput::Diagnostic(Diagnostic::Error(msg)) => assert!(msg.contains("503")),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn test_parse_batched_and_flat_responses() {
        let batched = r#"[[{"label":"joy","score":0.97},{"label":"neutral","score":0.02}]]"#;
        let parsed: InferenceResponse = serde_json::from_str(batched).unwrap();
        assert_eq!(parsed.into_scores()[0].label, "joy");

        let flat = r#"[{"label":"anger","score":0.6}]"#;
        let parsed: InferenceResponse = serde_json::from_str(flat).unwrap();
        assert_eq!(parsed.into_scores(), vec![score("anger", 0.6)]);
    }
}
