//! Handlers for the editable source text.
//!
//! Replacing or clearing the text invalidates any audio generated from the old
//! text, so every change forwards a "source cleared" event to the playback
//! controller. An upload clears everything before extraction starts.

use crate::extraction::UploadKind;
use crate::{error::AppError, state::AppState};
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct DocumentBody {
    pub text: String,
}

fn document_json(text: &str) -> serde_json::Value {
    json!({
        "text": text,
        "characters": text.chars().count(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })
}

/// Attachment header, e.g. `extracted-text-1700000000000.txt`.
pub(crate) fn attachment(prefix: &str, extension: &str) -> ContentDisposition {
    let filename = format!("{}-{}.{}", prefix, chrono::Utc::now().timestamp_millis(), extension);
    ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(filename)],
    }
}

pub async fn get_document(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(document_json(&state.document_text())))
}

pub async fn put_document(
    state: web::Data<AppState>,
    body: web::Json<DocumentBody>,
) -> Result<HttpResponse, AppError> {
    let text = body.into_inner().text;
    if state.replace_document(text.clone()) {
        info!(characters = text.chars().count(), "Source text replaced");
        state.controller.clear_source()?;
    }
    Ok(HttpResponse::Ok().json(document_json(&text)))
}

pub async fn clear_document(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    state.clear_document();
    state.controller.clear_source()?;
    Ok(HttpResponse::Ok().json(document_json("")))
}

pub async fn download_document(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let text = state.document_text();
    if text.trim().is_empty() {
        return Err(AppError::NotFound("No text to download".to_string()));
    }

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .insert_header(attachment("extracted-text", "txt"))
        .body(text))
}

/// Upload an image or PDF and replace the document with the text read from it.
///
/// ## Request:
/// Multipart form data with the file in a field named `file`. The part's
/// `Content-Type` must be `image/*` or `application/pdf`.
///
/// Before extraction starts the document is emptied and the controller drops
/// its audio; on failure the document stays empty.
pub async fn extract_document(
    state: web::Data<AppState>,
    mut payload: actix_multipart::Multipart,
) -> Result<HttpResponse, AppError> {
    use actix_multipart::Field;
    use futures_util::stream::StreamExt;

    let limit = state.get_config().extraction.max_upload_bytes;
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut filename: Option<String> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field = item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let is_file = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .map_or(false, |name| name == "file");
        if !is_file {
            continue;
        }

        filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(|s| s.to_string());
        let mime_type = field.content_type().map(|m| m.to_string()).unwrap_or_default();
        if UploadKind::from_mime(&mime_type).is_none() {
            return Err(AppError::BadRequest("Please upload a valid image or PDF file.".to_string()));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
            if bytes.len() + chunk.len() > limit {
                return Err(AppError::BadRequest(format!(
                    "File size exceeds {}MB limit.",
                    limit / (1024 * 1024)
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        upload = Some((mime_type, bytes));
    }

    let (mime_type, bytes) =
        upload.ok_or_else(|| AppError::ValidationError("No file provided".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::ValidationError("Uploaded file is empty".to_string()));
    }
    let kind = UploadKind::from_mime(&mime_type).map_or("unknown", |k| k.as_str());

    state.clear_document();
    state.controller.clear_source()?;
    info!(kind, bytes = bytes.len(), file = filename.as_deref().unwrap_or("unknown"), "Extracting text from upload");

    let text = state.extractor.extract(&bytes, &mime_type).await.map_err(|e| {
        warn!("Text extraction failed: {}", e);
        AppError::ServiceUnavailable(e.0)
    })?;

    if state.replace_document(text.clone()) {
        state.controller.clear_source()?;
    }
    info!(characters = text.chars().count(), "Source text extracted");

    Ok(HttpResponse::Ok().json(document_json(&text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractionError;
    use crate::state::testing::{state_with, state_with_extractor};
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_document_lifecycle() {
        let (state, _, _) = state_with(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/document", web::get().to(get_document))
                .route("/document", web::put().to(put_document))
                .route("/document", web::delete().to(clear_document))
                .route("/document/download", web::get().to(download_document)),
        )
        .await;

        let req = test::TestRequest::get().uri("/document/download").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::put()
            .uri("/document")
            .set_json(json!({"text": "Read me aloud"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["characters"], 13);

        let req = test::TestRequest::get().uri("/document/download").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let disposition = resp
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains("extracted-text-"));
        assert!(disposition.contains(".txt"));
        assert_eq!(test::read_body(resp).await, "Read me aloud");

        let req = test::TestRequest::delete().uri("/document").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(state.document_text(), "");
    }

    const BOUNDARY: &str = "visionvoice-test-boundary";

    /// One-field multipart body carrying `data` as `file` with the given type.
    fn multipart_request(content_type: &str, data: &[u8]) -> test::TestRequest {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"page\"\r\nContent-Type: {ct}\r\n\r\n",
            b = BOUNDARY,
            ct = content_type
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        test::TestRequest::post()
            .uri("/document/extract")
            .insert_header(("content-type", format!("multipart/form-data; boundary={}", BOUNDARY)))
            .set_payload(body)
    }

    fn upload_app_routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/document", web::get().to(get_document))
            .route("/document/extract", web::post().to(extract_document));
    }

    #[actix_web::test]
    async fn test_upload_replaces_document_and_drops_audio() {
        use crate::playback::controller::tests::pcm_base64;

        let (state, extractor, probe) = state_with_extractor(
            vec![Ok(pcm_base64(&[1, 2, 3, 4]))],
            vec![Ok("Recognised words".to_string())],
        );
        let app = test::init_service(
            App::new().app_data(web::Data::new(state.clone())).configure(upload_app_routes),
        )
        .await;

        state.replace_document("Old text".to_string());
        state.controller.play("Old text", "Kore").unwrap();
        let mut status = state.controller.status().await.unwrap();
        for _ in 0..100 {
            if status.state == "playing" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            status = state.controller.status().await.unwrap();
        }
        assert!(status.has_audio);
        assert_eq!(probe.active(), 1);

        let req = multipart_request("image/png", &[0x89, b'P', b'N', b'G']).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["text"], "Recognised words");
        assert_eq!(state.document_text(), "Recognised words");
        assert_eq!(extractor.mime_types.lock().unwrap().as_slice(), &["image/png".to_string()]);

        let status = state.controller.status().await.unwrap();
        assert_eq!(status.state, "idle");
        assert!(!status.has_audio);
        assert_eq!(probe.active(), 0);
    }

    #[actix_web::test]
    async fn test_upload_rejects_wrong_type_and_size() {
        let (state, extractor, _) = state_with_extractor(vec![], vec![]);
        state.config.write().unwrap().extraction.max_upload_bytes = 16;
        state.replace_document("Keep me".to_string());
        let app = test::init_service(
            App::new().app_data(web::Data::new(state.clone())).configure(upload_app_routes),
        )
        .await;

        let req = multipart_request("text/plain", b"plain words").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = multipart_request("application/pdf", &[0u8; 17]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert_eq!(extractor.calls(), 0);
        assert_eq!(state.document_text(), "Keep me");
    }

    #[actix_web::test]
    async fn test_failed_extraction_leaves_document_empty() {
        let (state, _, _) = state_with_extractor(vec![], vec![Err(ExtractionError::new(
            "Failed to extract text. Ensure the file is legible and under 20MB.",
        ))]);
        state.replace_document("Previous text".to_string());
        let app = test::init_service(
            App::new().app_data(web::Data::new(state.clone())).configure(upload_app_routes),
        )
        .await;

        let req = multipart_request("application/pdf", b"%PDF-1.7").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("legible"));
        assert_eq!(state.document_text(), "");
    }
}
