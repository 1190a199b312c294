//! Inbound message classification.
//!
//! A single server message can carry transcript text, audio, an interruption
//! flag and tool calls all at once; [`route`] extracts each independently and
//! the session applies them in a fixed order: transcript, audio,
//! interruption, tool calls.

use crate::gemini::{FunctionCall, ServerMessage, Transcription};
use crate::transcript::Sender;
use smallvec::SmallVec;
use tracing::debug;

/// Actions extracted from one server message.
#[derive(Debug, Default)]
pub struct Routed {
    pub transcript: Option<(Sender, String)>,
    /// Base64 PCM payloads in part order
    pub audio: SmallVec<[String; 1]>,
    pub interrupted: bool,
    pub tool_calls: SmallVec<[FunctionCall; 2]>,
}

pub fn route(msg: &ServerMessage) -> Routed {
    let mut routed = Routed::default();

    if let Some(content) = &msg.server_content {
        let text_of = |t: &Option<Transcription>| {
            t.as_ref()
                .and_then(|t| t.text.as_deref())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        // Output transcription wins when both are present.
        routed.transcript = text_of(&content.output_transcription)
            .map(|t| (Sender::Model, t))
            .or_else(|| text_of(&content.input_transcription).map(|t| (Sender::User, t)));

        if let Some(turn) = &content.model_turn {
            routed.audio = turn
                .parts
                .iter()
                .filter_map(|p| p.inline_data.as_ref())
                .filter(|blob| !blob.data.is_empty())
                .map(|blob| blob.data.clone())
                .collect();
        }

        routed.interrupted = content.interrupted;

        if content.turn_complete {
            debug!("Model turn complete");
        }
    }

    if let Some(call) = &msg.tool_call {
        routed.tool_calls = call.function_calls.iter().cloned().collect();
    }

    if let Some(cancel) = &msg.tool_call_cancellation {
        debug!("Tool calls cancelled by server: {:?}", cancel.ids);
    }

    routed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> ServerMessage {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn output_transcript_takes_precedence() {
        let routed = route(&parse(json!({"serverContent": {
            "outputTranscription": {"text": "model says"},
            "inputTranscription": {"text": "user says"}
        }})));
        assert_eq!(routed.transcript, Some((Sender::Model, "model says".to_string())));
    }

    #[test]
    fn input_transcript_when_no_output() {
        let routed = route(&parse(json!({"serverContent": {
            "inputTranscription": {"text": "what is this"}
        }})));
        assert_eq!(routed.transcript, Some((Sender::User, "what is this".to_string())));
    }

    #[test]
    fn empty_output_falls_back_to_input() {
        let routed = route(&parse(json!({"serverContent": {
            "outputTranscription": {"text": ""},
            "inputTranscription": {"text": "hi"}
        }})));
        assert_eq!(routed.transcript, Some((Sender::User, "hi".to_string())));
    }

    #[test]
    fn one_message_can_carry_several_actions() {
        let routed = route(&parse(json!({"serverContent": {
            "outputTranscription": {"text": "sure"},
            "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}}]},
            "interrupted": true
        }})));
        assert!(routed.transcript.is_some());
        assert_eq!(routed.audio.as_slice(), &["AAAA".to_string()]);
        assert!(routed.interrupted);
    }

    #[test]
    fn tool_calls_are_collected() {
        let routed = route(&parse(json!({"toolCall": {"functionCalls": [
            {"id": "1", "name": "click_answer", "args": {"x": 1, "y": 2, "label": "a"}},
            {"id": "2", "name": "click_answer", "args": {"x": 3, "y": 4, "label": "b"}}
        ]}})));
        assert_eq!(routed.tool_calls.len(), 2);
        assert_eq!(routed.tool_calls[1].id, "2");
        assert!(routed.transcript.is_none());
    }

    #[test]
    fn setup_complete_routes_nothing() {
        let routed = route(&parse(json!({"setupComplete": {}})));
        assert!(routed.transcript.is_none());
        assert!(routed.audio.is_empty());
        assert!(!routed.interrupted);
        assert!(routed.tool_calls.is_empty());
    }
}
