//! Request extractors with `AppError` rejections

use axum::extract::FromRequest;
use reef_common::errors::AppError;

/// `axum::Json` whose rejection renders as the standard error body
#[derive(Debug, Clone, Copy, Default, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);
