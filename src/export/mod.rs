//! Document renderers: CSV, PDF and QR SVG.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub mod csv;
pub mod pdf;
pub mod qr;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Csv(#[from] ::csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("PDF rendering failed: {0}")]
    Pdf(String),

    #[error("QR encoding failed: {0}")]
    Qr(String),

    #[error("Import rejected: {message}")]
    Import { message: String },
}

/// A rendered file ready to be returned from a handler.
pub struct Attachment {
    pub filename: String,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// `inline` for previews (QR SVG), `attachment` for downloads.
    pub inline: bool,
}

impl Attachment {
    pub fn csv(filename: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: "text/csv; charset=utf-8",
            body,
            inline: false,
        }
    }

    pub fn pdf(filename: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: "application/pdf",
            body,
            inline: false,
        }
    }

    pub fn svg(filename: impl Into<String>, body: String) -> Self {
        Self {
            filename: filename.into(),
            content_type: "image/svg+xml",
            body: body.into_bytes(),
            inline: true,
        }
    }
}

impl IntoResponse for Attachment {
    fn into_response(self) -> Response {
        let disposition = format!(
            "{}; filename=\"{}\"",
            if self.inline { "inline" } else { "attachment" },
            self.filename.replace('"', "")
        );
        let disposition = HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static(self.content_type)),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            self.body,
        )
            .into_response()
    }
}
