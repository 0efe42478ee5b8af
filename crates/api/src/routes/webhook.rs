use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::{error::ApiError, AppState};

pub fn webhook_router() -> Router<AppState> {
    Router::new().route("/webhook", post(post_webhook))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookCommand {
    Pause,
    Resume,
    Status,
    Summary,
    Reset,
}

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub command: WebhookCommand,
    /// Recorded in logs; defaults to `webhook`.
    #[serde(default)]
    pub operator: Option<String>,
}

async fn post_webhook(
    State(state): State<AppState>,
    body: Result<Json<WebhookRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let operator = match req.operator.as_deref() {
        Some(name) if !name.trim().is_empty() => format!("webhook:{}", name.trim()),
        _ => "webhook".to_string(),
    };
    info!(command = ?req.command, %operator, "Webhook command");

    let control = &state.control;
    let body = match req.command {
        WebhookCommand::Pause => {
            control.pause(&operator).await?;
            json!({ "ok": true, "paused": true })
        }
        WebhookCommand::Resume => {
            control.resume(&operator).await?;
            json!({ "ok": true, "paused": false })
        }
        WebhookCommand::Status => json!({ "ok": true, "status": control.status().await? }),
        WebhookCommand::Summary => json!({ "ok": true, "summary": control.summary().await? }),
        WebhookCommand::Reset => {
            let cleared = control.reset(&operator).await?;
            json!({ "ok": true, "cleared": cleared })
        }
    };
    Ok(Json(body))
}
