use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{Page, TimeRange};
use crate::utils::errors::{AppError, AppResult};
use crate::utils::validation::validate_datetime;

/// Ventana por defecto cuando la consulta no trae `from`
pub const DEFAULT_QUERY_SPAN_HOURS: i64 = 24;

// Response genérica
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: Some(data),
        }
    }
}

// Página con cursor para la siguiente llamada
#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub count: usize,
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> From<Page<T>> for PageResponse<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            count: page.items.len(),
            items: page.items,
            next_cursor: page.next_cursor,
        }
    }
}

/// Parsear un timestamp de query string; `field` nombra el parámetro en el error
pub fn parse_query_datetime(field: &'static str, raw: &str) -> AppResult<DateTime<Utc>> {
    validate_datetime(raw).map_err(|e| {
        let mut errors = validator::ValidationErrors::new();
        errors.add(field, e);
        AppError::Validation(errors)
    })
}

/// Rango `[from, to)`; sin `to` es ahora, sin `from` son las 24 h previas a `to`
pub fn resolve_range(from: Option<&str>, to: Option<&str>) -> AppResult<TimeRange> {
    let end = match to {
        Some(raw) => parse_query_datetime("to", raw)?,
        None => Utc::now(),
    };
    let start = match from {
        Some(raw) => parse_query_datetime("from", raw)?,
        None => end - Duration::hours(DEFAULT_QUERY_SPAN_HOURS),
    };
    TimeRange::new(start, end)
}
