//! Tool contract offered to the agent and its dispatcher.

use crate::gemini::{FunctionCall, FunctionDeclaration, FunctionResponse, Tool};
use crate::overlay::{AnnotationMarker, AnnotationOverlay};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{info, warn};

pub const CLICK_ANSWER: &str = "click_answer";

/// Declarations sent in the setup message.
pub fn declarations() -> Vec<Tool> {
    vec![Tool {
        function_declarations: vec![FunctionDeclaration {
            name: CLICK_ANSWER.to_string(),
            description: "Point at an element on the user's screen. Coordinates are \
                          percentages of the screen width and height (0-100)."
                .to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "x": {"type": "NUMBER", "description": "Horizontal position, 0-100"},
                    "y": {"type": "NUMBER", "description": "Vertical position, 0-100"},
                    "label": {"type": "STRING", "description": "Short caption shown next to the marker"}
                },
                "required": ["x", "y", "label"]
            }),
        }],
    }]
}

#[derive(Debug, Deserialize)]
struct ClickAnswerArgs {
    x: f64,
    y: f64,
    #[serde(default)]
    label: String,
}

/// Result of handling one invocation: the response to send and the marker
/// that was placed, if any.
#[derive(Debug)]
pub struct Dispatched {
    pub response: FunctionResponse,
    pub marker: Option<AnnotationMarker>,
}

/// Execute one tool call. Every call yields exactly one response carrying
/// the call's id.
pub fn dispatch(call: &FunctionCall, overlay: &mut AnnotationOverlay, now: Instant) -> Dispatched {
    let respond = |response| FunctionResponse {
        id: call.id.clone(),
        name: call.name.clone(),
        response,
    };

    if call.name != CLICK_ANSWER {
        warn!("Agent called unknown tool {:?} (id {})", call.name, call.id);
        return Dispatched {
            response: respond(json!({"error": format!("unknown tool {}", call.name)})),
            marker: None,
        };
    }

    match serde_json::from_value::<ClickAnswerArgs>(call.args.clone()) {
        Ok(args) => {
            let marker = overlay.place(args.x, args.y, args.label, now);
            info!(
                "📍 Marker #{} at ({:.1}%, {:.1}%) {:?}",
                marker.id, marker.x, marker.y, marker.label
            );
            Dispatched {
                response: respond(json!({"result": "ok"})),
                marker: Some(marker),
            }
        }
        Err(e) => {
            warn!("Malformed {} arguments {}: {}", CLICK_ANSWER, call.args, e);
            Dispatched {
                response: respond(json!({"error": format!("invalid arguments: {}", e)})),
                marker: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, args: serde_json::Value) -> FunctionCall {
        FunctionCall {
            id: id.to_string(),
            name: name.to_string(),
            args,
        }
    }

    #[test]
    fn click_answer_round_trip() {
        let mut overlay = AnnotationOverlay::new();
        let out = dispatch(
            &call("abc", "click_answer", json!({"x": 42, "y": 17, "label": "Submit"})),
            &mut overlay,
            Instant::now(),
        );

        let marker = out.marker.unwrap();
        assert_eq!((marker.x, marker.y), (42.0, 17.0));
        assert_eq!(marker.label, "Submit");
        assert_eq!(overlay.len(), 1);

        assert_eq!(out.response.id, "abc");
        assert_eq!(out.response.name, "click_answer");
        assert_eq!(out.response.response, json!({"result": "ok"}));
    }

    #[test]
    fn unknown_tool_still_gets_one_response() {
        let mut overlay = AnnotationOverlay::new();
        let out = dispatch(&call("z", "open_door", json!({})), &mut overlay, Instant::now());
        assert!(out.marker.is_none());
        assert_eq!(out.response.id, "z");
        assert!(out.response.response.get("error").is_some());
        assert!(overlay.is_empty());
    }

    #[test]
    fn malformed_args_are_reported() {
        let mut overlay = AnnotationOverlay::new();
        let out = dispatch(
            &call("q", "click_answer", json!({"x": "left"})),
            &mut overlay,
            Instant::now(),
        );
        assert!(out.marker.is_none());
        assert!(out.response.response.get("error").is_some());
    }

    #[test]
    fn declaration_lists_click_answer() {
        let tools = declarations();
        let decl = &tools[0].function_declarations[0];
        assert_eq!(decl.name, CLICK_ANSWER);
        assert_eq!(decl.parameters["required"], json!(["x", "y", "label"]));
    }
}
