use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ConversionRequest {
    pub video_url: String,
    pub folder_url: String,
}

fn detail(status: StatusCode, detail: Value) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

/// Collect a validation entry for every field that is not an http(s) URL.
fn invalid_urls(request: &ConversionRequest) -> Vec<Value> {
    [
        ("video_url", &request.video_url),
        ("folder_url", &request.folder_url),
    ]
    .into_iter()
    .filter(|(_, value)| {
        !reqwest::Url::parse(value).is_ok_and(|url| {
            matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
        })
    })
    .map(|(field, value)| {
        json!({
            "loc": ["body", field],
            "msg": "Input should be a valid URL",
            "input": value,
        })
    })
    .collect()
}

/// Health check.
pub async fn index() -> impl IntoResponse {
    Json(json!({ "message": "Converter API is running." }))
}

/// Download a Drive video, convert it to MP3 and upload it into a folder.
pub async fn convert(
    State(state): State<AppState>,
    payload: Result<Json<ConversionRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "rejected convert request");
            return detail(rejection.status(), Value::String(rejection.body_text()));
        }
    };

    let errors = invalid_urls(&request);
    if !errors.is_empty() {
        return detail(StatusCode::UNPROCESSABLE_ENTITY, Value::Array(errors));
    }

    tracing::info!(video_url = %request.video_url, "received conversion request");
    match state
        .converter
        .process(&request.video_url, &request.folder_url)
        .await
    {
        Ok(conversion) => Json(json!({
            "status": "success",
            "message": conversion.message,
            "file_id": conversion.file_id,
            "file_name": conversion.file_name,
            "file_url": conversion.file_url,
        }))
        .into_response(),
        Err(e) => detail(StatusCode::INTERNAL_SERVER_ERROR, Value::String(e.to_string())),
    }
}
