//! Adapter for function-as-a-service platforms that deliver requests as
//! API-gateway style events (`{"body": "<json string>"}`).

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::job::Converter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// JSON document serialised as a string.
    pub body: String,
}

impl EventResponse {
    fn new(status_code: u16, message: &str) -> Self {
        Self {
            status_code,
            body: json!({ "message": message }).to_string(),
        }
    }
}

/// Run one conversion described by `event`.
pub async fn handle_event(converter: &Converter, event: &Value) -> EventResponse {
    tracing::info!("handling serverless event");

    let body = match event.get("body") {
        None | Some(Value::Null) => Some(json!({})),
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw).ok(),
        Some(_) => None,
    };
    let Some(body) = body.filter(Value::is_object) else {
        tracing::warn!("event body is not a JSON object");
        return EventResponse::new(400, "Invalid JSON body format");
    };

    let field = |name: &str| {
        body.get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    };
    let (Some(video_url), Some(folder_url)) = (field("video_url"), field("folder_url")) else {
        tracing::warn!("event is missing video_url or folder_url");
        return EventResponse::new(400, "'video_url' and 'folder_url' are required in the body.");
    };

    match converter.process(video_url, folder_url).await {
        Ok(conversion) => EventResponse::new(200, &conversion.message),
        Err(e) => EventResponse::new(500, &e.to_string()),
    }
}
