/// Drop upload, download and delete endpoints
use crate::{
    context::AppContext,
    drop_store::{DropId, DropRecord, DropUpload, TtlRequest},
    error::{DropError, DropResult},
    gate,
    metrics::DeleteReason,
};
use axum::{
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

const TTL_HEADER: &str = "x-drop-ttl";
const MAX_DOWNLOADS_HEADER: &str = "x-drop-max-downloads";
const FILENAME_HEADER: &str = "x-drop-filename";
const EXPIRES_HEADER: &str = "x-drop-expires-at";
const REMAINING_HEADER: &str = "x-drop-downloads-remaining";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const MAX_FILENAME_LEN: usize = 255;

/// Build drop routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/drop", post(upload_drop)).route(
        "/drop/:id",
        get(download_drop).head(describe_drop).delete(delete_drop),
    )
}

/// Upload options passed in the query string of a raw upload
#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub ttl: Option<String>,
    pub max_downloads: Option<String>,
    pub filename: Option<String>,
}

/// Response for a created drop
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateDropResponse {
    pub id: String,
    pub url: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<i64>,
}

/// Fields gathered from either upload form, not yet validated
#[derive(Debug, Default)]
struct UploadForm {
    password: Option<String>,
    ttl: Option<String>,
    max_downloads: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
    data: Option<Vec<u8>>,
    /// First thing found wrong with the body, raised after authorization
    problem: Option<DropError>,
}

/// Upload a drop
///
/// Accepts either a raw body (options in query string or `X-Drop-*`
/// headers) or `multipart/form-data` with a `file` or `text` field.
async fn upload_drop(
    State(ctx): State<AppContext>,
    Query(params): Query<UploadParams>,
    request: Request,
) -> DropResult<(StatusCode, Json<CreateDropResponse>)> {
    let header_password = gate::credentials_from_headers(request.headers());

    let form = if is_multipart(request.headers()) {
        // A header credential is checked before the body is read
        if header_password.is_some() {
            ctx.gate.authorize(header_password.as_deref())?;
        }
        let mut form = read_multipart(&ctx, request).await;
        ctx.gate
            .authorize(header_password.as_deref().or(form.password.as_deref()))?;
        if let Some(problem) = form.problem.take() {
            return Err(problem);
        }
        form
    } else {
        ctx.gate.authorize(header_password.as_deref())?;
        read_raw(&ctx, params, request).await?
    };

    let upload = validate_upload(&ctx, form)?;
    let record = with_deadline(&ctx, "create", ctx.drops.create(upload)).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateDropResponse {
            url: ctx.drop_path(record.id.as_str()),
            id: record.id.to_string(),
            size: record.size,
            created_at: record.created_at,
            expires_at: record.expires_at,
            max_downloads: record.max_downloads,
        }),
    ))
}

/// Download a drop. No credentials: the id is the capability.
async fn download_drop(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> DropResult<Response> {
    let id = DropId::parse(&id).ok_or(DropError::NotFound)?;
    let fetched = with_deadline(&ctx, "download", ctx.drops.fetch(&id)).await?;

    let headers = drop_headers(&fetched.record);
    Ok((StatusCode::OK, headers, fetched.data).into_response())
}

/// Headers of a live drop without counting a download
async fn describe_drop(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> DropResult<Response> {
    let id = DropId::parse(&id).ok_or(DropError::NotFound)?;
    let record = with_deadline(&ctx, "describe", ctx.drops.describe(&id)).await?;

    Ok((StatusCode::OK, drop_headers(&record)).into_response())
}

/// Delete a drop ahead of its expiry
async fn delete_drop(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> DropResult<StatusCode> {
    // Credentials first, so a bad password is reported whatever the id
    ctx.gate
        .authorize(gate::credentials_from_headers(&headers).as_deref())?;

    let id = DropId::parse(&id).ok_or(DropError::NotFound)?;
    with_deadline(
        &ctx,
        "delete",
        ctx.drops.delete(&id, DeleteReason::Explicit),
    )
    .await?;

    tracing::info!("Drop {} deleted on request", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Bound a storage quorum by the configured operation timeout
async fn with_deadline<T, F>(ctx: &AppContext, operation: &'static str, fut: F) -> DropResult<T>
where
    F: Future<Output = DropResult<T>>,
{
    tokio::time::timeout(ctx.config.service.operation_timeout, fut)
        .await
        .map_err(|_| DropError::Timeout(operation))?
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().starts_with("multipart/form-data"))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn read_raw(ctx: &AppContext, params: UploadParams, request: Request) -> DropResult<UploadForm> {
    let headers = request.headers().clone();
    let limit = ctx.config.service.max_upload_bytes;

    let data = axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|_| payload_too_large(limit))?;

    Ok(UploadForm {
        password: None,
        ttl: params.ttl.or_else(|| header_str(&headers, TTL_HEADER)),
        max_downloads: params
            .max_downloads
            .or_else(|| header_str(&headers, MAX_DOWNLOADS_HEADER)),
        filename: params
            .filename
            .or_else(|| header_str(&headers, FILENAME_HEADER)),
        content_type: header_str(&headers, header::CONTENT_TYPE.as_str()),
        data: Some(data.to_vec()),
        problem: None,
    })
}

/// Collect multipart fields without judging them.
///
/// Anything wrong with the body is kept in `problem` and only raised once
/// the caller is authorized, so a request without the password learns
/// nothing about its form.
async fn read_multipart(ctx: &AppContext, request: Request) -> UploadForm {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            payload_too_large(ctx.config.service.max_upload_bytes)
        } else {
            DropError::Validation(format!("Invalid multipart body: {}", e.body_text()))
        }
    };

    let mut form = UploadForm::default();
    let mut multipart = match Multipart::from_request(request, ctx).await {
        Ok(multipart) => multipart,
        Err(e) => {
            form.problem = Some(DropError::Validation(format!(
                "Invalid multipart body: {}",
                e.body_text()
            )));
            return form;
        }
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                form.problem.get_or_insert(invalid(e));
                break;
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);

        // The stream cannot be resumed after a failed read
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                form.problem.get_or_insert(invalid(e));
                break;
            }
        };

        match name.as_str() {
            "password" => form.password = Some(String::from_utf8_lossy(&bytes).into_owned()),
            "ttl" => form.ttl = Some(field_text(bytes, &mut form.problem)),
            "max_downloads" => form.max_downloads = Some(field_text(bytes, &mut form.problem)),
            "file" | "text" => {
                if form.data.is_some() {
                    form.problem.get_or_insert(DropError::Validation(
                        "Exactly one of `file` or `text` must be supplied".to_string(),
                    ));
                    continue;
                }
                if name == "file" {
                    form.filename = filename;
                    form.content_type = content_type;
                    form.data = Some(bytes);
                } else {
                    form.content_type = Some(TEXT_CONTENT_TYPE.to_string());
                    form.data = Some(field_text(bytes, &mut form.problem).into_bytes());
                }
            }
            // Unknown fields are skipped
            _ => {}
        }
    }

    form
}

/// UTF-8 text of a form field; invalid text is recorded as a problem
fn field_text(bytes: Vec<u8>, problem: &mut Option<DropError>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|_| {
        problem.get_or_insert(DropError::Validation(
            "Form field is not valid UTF-8".to_string(),
        ));
        String::new()
    })
}

fn validate_upload(ctx: &AppContext, form: UploadForm) -> DropResult<DropUpload> {
    let data = form
        .data
        .ok_or_else(|| DropError::Validation("Missing `file` or `text` field".to_string()))?;

    if data.is_empty() {
        return Err(DropError::Validation("Payload is empty".to_string()));
    }
    if data.len() > ctx.config.service.max_upload_bytes {
        return Err(payload_too_large(ctx.config.service.max_upload_bytes));
    }

    let ttl = TtlRequest::parse(form.ttl.as_deref())?
        .resolve(ctx.config.drops.default_ttl, ctx.config.drops.max_ttl)?;

    let max_downloads = match form.max_downloads.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<u32>() {
            Ok(n) if n > 0 => Some(n),
            _ => {
                return Err(DropError::Validation(format!(
                    "Invalid max_downloads: {:?}",
                    raw
                )))
            }
        },
    };

    let content_type = form
        .content_type
        .filter(|ct| HeaderValue::from_str(ct).is_ok() && !ct.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    Ok(DropUpload {
        data,
        content_type,
        filename: form.filename.as_deref().and_then(sanitize_filename),
        ttl,
        max_downloads,
    })
}

fn payload_too_large(limit: usize) -> DropError {
    DropError::Validation(format!("Payload exceeds limit of {} bytes", limit))
}

/// Reduce a client supplied filename to a safe header value
fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && *c != '"' && *c != ';')
        .take(MAX_FILENAME_LEN)
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn drop_headers(record: &DropRecord) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let content_type = HeaderValue::from_str(&record.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(record.size.max(0) as u64));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", record.checksum)) {
        headers.insert(header::ETAG, etag);
    }

    let disposition = match &record.filename {
        Some(name) => format!("attachment; filename=\"{}\"", name),
        None => "inline".to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    if let Some(expires_at) = record.expires_at {
        if let Ok(value) = HeaderValue::from_str(&expires_at.to_rfc3339()) {
            headers.insert(HeaderName::from_static(EXPIRES_HEADER), value);
        }
    }

    if let Some(max) = record.max_downloads {
        let remaining = (max - record.download_count).max(0) as u64;
        headers.insert(
            HeaderName::from_static(REMAINING_HEADER),
            HeaderValue::from(remaining),
        );
    }

    headers
}
