//! Gemini Live API wire types
//!
//! Client and server messages for the `BidiGenerateContent` WebSocket, plus
//! the connection configuration. Only the fields this client sends or
//! inspects are modelled; unknown server fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";
pub const DEFAULT_VOICE: &str = "Puck";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You can see the user's screen and hear them. \
Answer questions about what is on screen briefly and out loud. When the user asks where \
to click or which option is correct, call click_answer with the position of that element \
as percentages of the screen width and height.";

const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Configuration for a live connection.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// API key; a start request without one fails with `CredentialMissing`.
    pub api_key: Option<String>,
    /// Endpoint; the key is appended as a query parameter.
    pub url: String,
    pub model: String,
    pub system_instruction: String,
    pub voice_name: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
    /// How long to wait for `setupComplete` before failing the connection.
    pub setup_timeout: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: LIVE_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            voice_name: DEFAULT_VOICE.to_string(),
            input_transcription: true,
            output_transcription: true,
            setup_timeout: Duration::from_secs(10),
        }
    }
}

impl LiveConfig {
    /// Build a config from `GEMINI_API_KEY` and the optional `LIVELENS_*`
    /// overrides.
    pub fn from_env() -> Self {
        let mut config = Self {
            api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            ..Default::default()
        };
        if let Ok(model) = std::env::var("LIVELENS_MODEL") {
            config.model = model;
        }
        if let Ok(voice) = std::env::var("LIVELENS_VOICE") {
            config.voice_name = voice;
        }
        if let Ok(prompt) = std::env::var("LIVELENS_SYSTEM_PROMPT") {
            config.system_instruction = prompt;
        }
        config
    }

    /// The credential, if present and non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Full WebSocket URL including the key.
    pub fn endpoint(&self, api_key: &str) -> String {
        format!("{}?key={}", self.url, api_key)
    }

    /// The `setup` message announcing modality, voice, tools and transcription.
    pub fn setup_message(&self, tools: Vec<Tool>) -> ClientMessage {
        ClientMessage::Setup(Setup {
            model: self.model.clone(),
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice_name.clone(),
                        },
                    },
                }),
            }),
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part {
                    text: Some(self.system_instruction.clone()),
                    inline_data: None,
                }],
            }),
            tools,
            input_audio_transcription: self.input_transcription.then(EmptyObject::default),
            output_audio_transcription: self.output_transcription.then(EmptyObject::default),
        })
    }
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmptyObject {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<EmptyObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<EmptyObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 payload with its MIME type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// Message sent from client to server. Serializes externally tagged, e.g.
/// `{"realtimeInput": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::RealtimeInput(_) => "realtimeInput",
            Self::ToolResponse(_) => "toolResponse",
        }
    }
}

/// Server -> client message. Exactly one top-level field is normally set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCall>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub generation_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setup_message_serialization() {
        let config = LiveConfig::default();
        let msg = config.setup_message(vec![Tool {
            function_declarations: vec![FunctionDeclaration {
                name: "noop".to_string(),
                description: "does nothing".to_string(),
                parameters: json!({"type": "OBJECT"}),
            }],
        }]);
        let parsed = serde_json::to_value(&msg).unwrap();

        let setup = &parsed["setup"];
        assert_eq!(setup["model"], DEFAULT_MODEL);
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            DEFAULT_VOICE
        );
        assert!(setup["systemInstruction"]["parts"][0]["text"].is_string());
        assert_eq!(setup["tools"][0]["functionDeclarations"][0]["name"], "noop");
        assert_eq!(setup["inputAudioTranscription"], json!({}));
        assert_eq!(setup["outputAudioTranscription"], json!({}));
    }

    #[test]
    fn transcription_flags_can_be_disabled() {
        let config = LiveConfig {
            input_transcription: false,
            output_transcription: false,
            ..Default::default()
        };
        let parsed = serde_json::to_value(config.setup_message(vec![])).unwrap();
        assert!(parsed["setup"].get("inputAudioTranscription").is_none());
        assert!(parsed["setup"].get("outputAudioTranscription").is_none());
        assert!(parsed["setup"].get("tools").is_none());
    }

    #[test]
    fn realtime_input_wire_shape() {
        let msg = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: "AAA=".to_string(),
            }],
        });
        let parsed = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            parsed,
            json!({"realtimeInput": {"mediaChunks": [
                {"mimeType": "audio/pcm;rate=16000", "data": "AAA="}
            ]}})
        );
    }

    #[test]
    fn server_content_deserialization() {
        let raw = json!({
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}}]},
                "outputTranscription": {"text": "hello"},
                "interrupted": true
            }
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        let content = msg.server_content.unwrap();
        assert!(content.interrupted);
        assert!(!content.turn_complete);
        assert_eq!(content.output_transcription.unwrap().text.as_deref(), Some("hello"));
        let part = &content.model_turn.unwrap().parts[0];
        assert_eq!(part.inline_data.as_ref().unwrap().data, "AAA=");
    }

    #[test]
    fn tool_call_deserialization() {
        let raw = json!({
            "toolCall": {"functionCalls": [
                {"id": "abc", "name": "click_answer", "args": {"x": 42, "y": 17, "label": "Submit"}}
            ]}
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        let calls = msg.tool_call.unwrap().function_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "abc");
        assert_eq!(calls[0].args["label"], "Submit");
    }

    #[test]
    fn setup_complete_and_unknown_fields() {
        let msg: ServerMessage =
            serde_json::from_value(json!({"setupComplete": {}, "usageMetadata": {"x": 1}})).unwrap();
        assert!(msg.setup_complete.is_some());
        assert!(msg.server_content.is_none());
    }

    #[test]
    fn blank_credential_is_missing() {
        let config = LiveConfig {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(config.credential().is_none());
        let config = LiveConfig {
            api_key: Some("k".to_string()),
            ..Default::default()
        };
        assert_eq!(config.credential(), Some("k"));
        assert!(config.endpoint("k").ends_with("?key=k"));
    }
}
