//! HTTP surface: `POST /extract_palette` and `GET /health`.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info};

use crate::{
    Adjustments, PaletteError, PaletteRequest, PaletteResponse, Preprocessing, ResponseFormat,
    analyze, config::Settings,
};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Missing form field `{0}`")]
    MissingField(&'static str),
    #[error("Invalid value for `{name}`: {reason}")]
    InvalidField { name: &'static str, reason: String },
    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Expected a multipart form: {0}")]
    Rejection(#[from] MultipartRejection),
    #[error(transparent)]
    Palette(#[from] PaletteError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingField(_) | Self::InvalidField { .. } => StatusCode::BAD_REQUEST,
            Self::Multipart(e) => e.status(),
            Self::Rejection(e) => e.status(),
            Self::Palette(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Palette(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, "request failed: {self}");
        } else {
            debug!(%status, "request rejected: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("Failed to bind to {1}: {0}")]
    Bind(std::io::Error, String),
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
}

/// Build the application router. CORS is open to any origin so a browser
/// client served elsewhere can call it.
pub fn router(settings: Settings) -> Router {
    let body_limit = settings.server.max_upload_bytes;
    let state = AppState {
        settings: Arc::new(settings),
    };
    Router::new()
        .route("/extract_palette", post(extract_palette))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(settings: Settings) -> Result<(), ServeError> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ServeError::Bind(e, addr.clone()))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(settings))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[tracing::instrument(skip_all)]
async fn extract_palette(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PaletteResponse>, ApiError> {
    let form = UploadForm::read(multipart?).await?;
    let (image, request) = form.into_request(&state.settings)?;
    let base = state.settings.clustering.clone();
    debug!(bytes = image.len(), n_colors = request.n_colors, format = ?request.format, "palette requested");

    let started = Instant::now();
    let response = tokio::task::spawn_blocking(move || analyze(&image, &request, &base))
        .await
        .map_err(|e| ApiError::Internal(format!("palette worker failed: {e}")))??;
    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "palette ready");

    Ok(Json(response))
}

// ------------------------------------------------------------
// Form parsing
// ------------------------------------------------------------

/// Raw text of the recognised multipart fields. Unknown fields are ignored.
#[derive(Debug, Default)]
struct UploadForm {
    image: Option<Bytes>,
    n_colors: Option<String>,
    brightness: Option<String>,
    contrast: Option<String>,
    grayscale: Option<String>,
    format: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            let slot = match name.as_str() {
                "image" => {
                    form.image = Some(field.bytes().await?);
                    continue;
                }
                "n_colors" => &mut form.n_colors,
                "brightness" => &mut form.brightness,
                "contrast" => &mut form.contrast,
                "grayscale" => &mut form.grayscale,
                "format" => &mut form.format,
                _ => continue,
            };
            let text = field.text().await?;
            // Blank inputs from HTML forms count as absent.
            *slot = Some(text.trim().to_owned()).filter(|t| !t.is_empty());
        }
        Ok(form)
    }

    /// Validate every field and pick the preprocessing mode: any explicit
    /// adjustment selects manual mode, otherwise the configured default.
    fn into_request(self, settings: &Settings) -> Result<(Bytes, PaletteRequest), ApiError> {
        let image = self.image.ok_or(ApiError::MissingField("image"))?;

        let n_colors = parse_field::<i64>("n_colors", self.n_colors.as_deref())?
            .unwrap_or(settings.clustering.n_colors as i64);
        let brightness = parse_field::<i32>("brightness", self.brightness.as_deref())?;
        let contrast = parse_field::<i32>("contrast", self.contrast.as_deref())?;
        let grayscale = self
            .grayscale
            .as_deref()
            .map(|v| parse_bool(v).ok_or_else(|| invalid("grayscale", format!("`{v}` is not a boolean"))))
            .transpose()?;

        let preprocessing = if brightness.is_some() || contrast.is_some() || grayscale.is_some() {
            Preprocessing::Manual(Adjustments::new(
                brightness.unwrap_or(0),
                contrast.unwrap_or(0),
                grayscale.unwrap_or(false),
            )?)
        } else {
            settings.preprocess.default_mode()
        };

        let format = match self.format.as_deref() {
            Some(v) => v.parse::<ResponseFormat>().map_err(|reason| invalid("format", reason))?,
            None => settings.response.default_format,
        };

        Ok((
            image,
            PaletteRequest {
                n_colors,
                preprocessing,
                format,
            },
        ))
    }
}

fn parse_field<T>(name: &'static str, value: Option<&str>) -> Result<Option<T>, ApiError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| v.parse::<T>().map_err(|e| invalid(name, format!("`{v}`: {e}"))))
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn invalid(name: &'static str, reason: String) -> ApiError {
    ApiError::InvalidField { name, reason }
}
