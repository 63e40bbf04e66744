//! Deepgram live transcription client
//!
//! Raw linear16 audio is written as binary WebSocket messages; JSON results
//! come back with `is_final` per segment and `speech_final` at end of turn.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use intake_config::SttProviderConfig;
use intake_core::{TranscriptResult, TranscriptStreamError};

use super::{SttEvent, SttProvider, SttStream};
use crate::PipelineError;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(8);

pub struct DeepgramStt {
    config: Arc<SttProviderConfig>,
    api_key: String,
}

impl DeepgramStt {
    pub fn new(config: &SttProviderConfig) -> Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| PipelineError::NotConfigured("providers.stt.api_key".to_string()))?;
        Ok(Self {
            config: Arc::new(config.clone()),
            api_key,
        })
    }

    fn endpoint(&self, sample_rate: u32) -> Result<url::Url, TranscriptStreamError> {
        let mut url = url::Url::parse(&self.config.url)
            .map_err(|e| TranscriptStreamError::Connect(format!("bad url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("model", &self.config.model)
            .append_pair("language", &self.config.language)
            .append_pair("encoding", "linear16")
            .append_pair("sample_rate", &sample_rate.to_string())
            .append_pair("channels", "1")
            .append_pair("interim_results", "true")
            .append_pair("punctuate", "true")
            .append_pair("smart_format", "true")
            .append_pair("endpointing", &self.config.endpointing_ms.to_string())
            .append_pair("utterance_end_ms", "1000");
        Ok(url)
    }
}

#[async_trait::async_trait]
impl SttProvider for DeepgramStt {
    async fn connect(&self, sample_rate: u32) -> Result<SttStream, TranscriptStreamError> {
        let url = self.endpoint(sample_rate)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TranscriptStreamError::Connect(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .map_err(|e| TranscriptStreamError::Connect(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TranscriptStreamError::Connect(e.to_string()))?;
        tracing::debug!(model = %self.config.model, sample_rate, "Deepgram session opened");

        let (mut sink, mut source) = ws.split();
        let (audio_tx, mut audio_rx) = mpsc::channel::<intake_core::AudioFrame>(256);
        let (event_tx, event_rx) = mpsc::channel(64);

        let writer_events = event_tx.clone();
        tokio::spawn(async move {
            let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
            keepalive.tick().await;
            loop {
                tokio::select! {
                    frame = audio_rx.recv() => {
                        let Some(frame) = frame else {
                            let _ = sink.send(Message::Text(r#"{"type":"CloseStream"}"#.into())).await;
                            let _ = sink.close().await;
                            break;
                        };
                        if let Err(e) = sink.send(Message::Binary(frame.to_le_bytes().into())).await {
                            let _ = writer_events
                                .send(SttEvent::Error(TranscriptStreamError::Disconnected(e.to_string())))
                                .await;
                            break;
                        }
                    }
                    _ = keepalive.tick() => {
                        if sink.send(Message::Text(r#"{"type":"KeepAlive"}"#.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => match parse_message(text.as_str()) {
                        Ok(Some(result)) => {
                            if event_tx.send(SttEvent::Transcript(result)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Deepgram: {}", e),
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by provider".to_string());
                        let _ = event_tx
                            .send(SttEvent::Error(TranscriptStreamError::Disconnected(reason)))
                            .await;
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx
                            .send(SttEvent::Error(TranscriptStreamError::Disconnected(e.to_string())))
                            .await;
                        return;
                    }
                }
            }
            let _ = event_tx
                .send(SttEvent::Error(TranscriptStreamError::Disconnected(
                    "stream ended".to_string(),
                )))
                .await;
        });

        Ok(SttStream {
            audio: audio_tx,
            events: event_rx,
        })
    }

    fn name(&self) -> &str {
        "deepgram"
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum DeepgramMessage {
    Results(DeepgramResults),
    UtteranceEnd {
        #[serde(default)]
        last_word_end: Option<f64>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct DeepgramResults {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    speech_final: bool,
    channel: DeepgramChannel,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// Parse one provider message. Metadata and other non-transcript messages
/// yield `None`.
fn parse_message(text: &str) -> Result<Option<TranscriptResult>, TranscriptStreamError> {
    let message: DeepgramMessage =
        serde_json::from_str(text).map_err(|e| TranscriptStreamError::Protocol(e.to_string()))?;

    match message {
        DeepgramMessage::Results(results) => {
            let Some(best) = results.channel.alternatives.into_iter().next() else {
                return Ok(None);
            };
            let start_ms = (results.start * 1000.0) as u64;
            let end_ms = ((results.start + results.duration) * 1000.0) as u64;
            let mut transcript = TranscriptResult::new(best.transcript, results.is_final, best.confidence)
                .with_time_range(start_ms, end_ms);
            if results.speech_final {
                transcript = transcript.with_speech_final();
            }
            Ok(Some(transcript))
        }
        DeepgramMessage::UtteranceEnd { last_word_end } => {
            let end_ms = last_word_end.map(|t| (t * 1000.0) as u64).unwrap_or(0);
            Ok(Some(
                TranscriptResult::default()
                    .with_time_range(end_ms, end_ms)
                    .with_speech_final(),
            ))
        }
        DeepgramMessage::Other => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interim_result() {
        let raw = r#"{"type":"Results","channel_index":[0,1],"duration":1.5,"start":2.0,"is_final":false,"speech_final":false,
            "channel":{"alternatives":[{"transcript":"my date of","confidence":0.82,"words":[]}]}}"#;
        let result = parse_message(raw).unwrap().unwrap();
        assert_eq!(result.text, "my date of");
        assert!(!result.is_final);
        assert_eq!(result.start_time_ms, 2000);
        assert_eq!(result.end_time_ms, 3500);
    }

    #[test]
    fn test_parse_speech_final() {
        let raw = r#"{"type":"Results","duration":0.5,"start":0.0,"is_final":true,"speech_final":true,
            "channel":{"alternatives":[{"transcript":"yes","confidence":0.99}]}}"#;
        let result = parse_message(raw).unwrap().unwrap();
        assert!(result.is_final && result.speech_final);
    }

    #[test]
    fn test_parse_utterance_end_and_metadata() {
        let result = parse_message(r#"{"type":"UtteranceEnd","channel":[0,1],"last_word_end":3.1}"#)
            .unwrap()
            .unwrap();
        assert!(result.is_empty() && result.speech_final);

        assert!(parse_message(r#"{"type":"Metadata","request_id":"abc"}"#).unwrap().is_none());
        assert!(parse_message("garbage").is_err());
    }

    #[test]
    fn test_requires_api_key() {
        assert!(DeepgramStt::new(&SttProviderConfig::default()).is_err());

        let config = SttProviderConfig {
            api_key: Some("key".to_string()),
            ..Default::default()
        };
        let stt = DeepgramStt::new(&config).unwrap();
        let url = stt.endpoint(16000).unwrap();
        assert!(url.as_str().contains("sample_rate=16000"));
        assert!(url.as_str().contains("encoding=linear16"));
    }
}
