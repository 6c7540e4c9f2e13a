//! Speech endpoints: play, toggle, stop, status and WAV download.
//!
//! Play and toggle return `202 Accepted` right away. Synthesis can take several
//! seconds, so clients poll `/speech/status` for the outcome.

use crate::audio::wav;
use crate::handlers::document::attachment;
use crate::synthesis::Voice;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Body of `/speech/play` and `/speech/toggle`. Both fields are optional.
#[derive(Debug, Default, Deserialize)]
pub struct SpeakRequest {
    /// Falls back to the stored document text
    pub text: Option<String>,
    /// Falls back to `synthesis.default_voice`
    pub voice: Option<String>,
}

/// Resolve text and voice against the document and config.
fn resolve(state: &AppState, body: Option<web::Json<SpeakRequest>>) -> Result<(String, Voice), AppError> {
    let request = body.map(|b| b.into_inner()).unwrap_or_default();

    let voice = match request.voice.as_deref() {
        Some(name) => name.parse::<Voice>().map_err(AppError::BadRequest)?,
        None => state.get_config().default_voice()?,
    };
    let text = request.text.unwrap_or_else(|| state.document_text());
    Ok((text, voice))
}

fn ignored() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ignored",
        "message": "No text to synthesize",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

fn accepted(voice: Voice) -> HttpResponse {
    HttpResponse::Accepted().json(json!({
        "status": "accepted",
        "voice": voice,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn play(
    state: web::Data<AppState>,
    body: Option<web::Json<SpeakRequest>>,
) -> Result<HttpResponse, AppError> {
    let (text, voice) = resolve(&state, body)?;
    if text.trim().is_empty() {
        debug!("Play request without text");
        return Ok(ignored());
    }

    state.controller.play(text, voice.as_str())?;
    Ok(accepted(voice))
}

pub async fn toggle(
    state: web::Data<AppState>,
    body: Option<web::Json<SpeakRequest>>,
) -> Result<HttpResponse, AppError> {
    let (text, voice) = resolve(&state, body)?;
    state.controller.toggle(text, voice.as_str())?;
    Ok(accepted(voice))
}

pub async fn stop(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    state.controller.stop()?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "stopped",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn status(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let status = state.controller.status().await?;
    Ok(HttpResponse::Ok().json(status))
}

/// The last synthesized audio as a WAV attachment.
pub async fn download(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let audio = state
        .controller
        .last_audio()
        .await?
        .ok_or_else(|| AppError::NotFound("No synthesized audio available".to_string()))?;

    let container = wav::to_wav_container(&audio.raw, &audio.format);
    if let Ok(header) = wav::WavHeader::parse(&container) {
        debug!(
            data_size = header.data_size,
            sample_rate = header.sample_rate,
            channels = header.channel_count,
            "Serving WAV download"
        );
    }
    state.increment_audio_downloads();

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .insert_header(attachment("visionvoice", "wav"))
        .body(container))
}

pub async fn list_voices(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let default_voice = state.get_config().default_voice()?;
    Ok(HttpResponse::Ok().json(json!({
        "voices": Voice::ALL,
        "default": default_voice
    })))
}
