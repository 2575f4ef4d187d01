use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{
    domain::{Viewer, ViewerRole},
    error::AppError,
};

pub const VIEWER_ID_HEADER: &str = "x-viewer-id";
pub const VIEWER_ROLE_HEADER: &str = "x-viewer-role";

/// Identity established by the session layer in front of this API.
#[derive(Clone)]
pub struct CurrentViewer {
    pub viewer: Viewer,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn viewer_from_headers(headers: &HeaderMap) -> Result<Viewer, AppError> {
    let id = header(headers, VIEWER_ID_HEADER)
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or(AppError::Unauthorized)?;

    let role = header(headers, VIEWER_ROLE_HEADER)
        .ok_or(AppError::Unauthorized)?
        .parse::<ViewerRole>()
        .map_err(|_| AppError::Unauthorized)?;

    Ok(Viewer { id, role })
}

pub async fn require_viewer(mut request: Request, next: Next) -> Result<Response, AppError> {
    let viewer = viewer_from_headers(request.headers())?;

    request.extensions_mut().insert(CurrentViewer { viewer });

    Ok(next.run(request).await)
}
