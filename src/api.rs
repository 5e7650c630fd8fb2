//! HTTP plumbing shared by the single- and multi-account facades

use crate::error::Error;
use crate::message::SendRequest;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Error returned from a handler, rendered as `{"detail": ...}`
#[derive(Debug)]
pub struct ApiError(pub Error);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::MissingParameter(_) | Error::Parse(_) => StatusCode::BAD_REQUEST,
            Error::AccountNotFound(_) => StatusCode::NOT_FOUND,
            Error::AccountCollision(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

/// Turn a JSON extraction result into a send request, with 400 on bad bodies
pub fn send_body(body: Result<Json<SendRequest>, JsonRejection>) -> ApiResult<SendRequest> {
    match body {
        Ok(Json(req)) => Ok(req),
        Err(rejection) => Err(Error::Parse(rejection.body_text()).into()),
    }
}

/// Bind `addr` and serve `app` until `shutdown` resolves
pub async fn serve<F>(app: Router, addr: &str, shutdown: F) -> crate::Result<SocketAddr>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!("Listening on http://{}", local);

    axum::serve(listener, app.layer(CorsLayer::permissive()))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server on {} stopped", local);
    Ok(local)
}
