// 只读 HTTP 接口：健康检查、摄像头状态、录像会话、快照与 MJPEG 实时流
use crate::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error};
use vigil_core::CameraStatus;
use vigil_video::{SessionMetadata, VideoError};

/// multipart 分隔符
pub const MJPEG_BOUNDARY: &str = "frame";

/// 注册表错误到 HTTP 状态码的映射
pub struct ApiError(VideoError);

impl From<VideoError> for ApiError {
    fn from(err: VideoError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VideoError::CameraNotFound(_) => StatusCode::NOT_FOUND,
            VideoError::NoFrame(_) => StatusCode::SERVICE_UNAVAILABLE,
            VideoError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "cameras": state.registry.len(),
        "connections": state.connections.connection_count().await,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn list_cameras(State(state): State<Arc<AppState>>) -> Json<Vec<CameraStatus>> {
    Json(state.registry.list())
}

pub async fn camera_status(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> Result<Json<CameraStatus>, ApiError> {
    Ok(Json(state.registry.status(&camera_id)?))
}

pub async fn sessions(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> Result<Json<Vec<SessionMetadata>>, ApiError> {
    Ok(Json(state.registry.list_sessions(&camera_id).await?))
}

/// 最近一帧的 JPEG；尚未产出帧时返回 503
pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> Result<Response, ApiError> {
    let jpeg = state
        .registry
        .snapshot(&camera_id)?
        .ok_or_else(|| VideoError::NoFrame(camera_id.clone()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        jpeg,
    )
        .into_response())
}

/// `multipart/x-mixed-replace` 实时流，从订阅之后的下一帧开始
pub async fn live(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> Result<Response, ApiError> {
    let frames = state.registry.live_sequence(&camera_id)?;
    debug!(camera_id = %camera_id, "Live stream opened");

    let parts = frames
        .take_until(state.signals.signalled())
        .map(|jpeg| Ok::<_, Infallible>(mjpeg_part(&jpeg)));
    let content_type = format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY);

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response())
}

/// 单个 multipart 分段
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(head.len() + jpeg.len() + 2);
    part.extend_from_slice(head.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mjpeg_part_layout() {
        let part = mjpeg_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let head = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n";
        assert!(part.starts_with(head));
        assert_eq!(&part[head.len()..head.len() + 4], &[0xFF, 0xD8, 0xFF, 0xD9]);
        assert!(part.ends_with(b"\r\n"));
    }
}
