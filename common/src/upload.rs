use std::fmt::Write as _;

use crate::{error::UploadError, MAX_UPLOAD_FIELDS};

/// Network side of an upload. Implementations perform one GET and hand back
/// the raw response body; the caller only logs it.
pub trait UploadSink {
    fn send(&mut self, url: &str) -> Result<String, UploadError>;
}

impl<F> UploadSink for F
where
    F: FnMut(&str) -> Result<String, UploadError>,
{
    fn send(&mut self, url: &str) -> Result<String, UploadError> {
        self(url)
    }
}

/// Builds `base?api_key=KEY&field1=..&fieldN=..` with fields in `values` order.
pub fn format_request(base_url: &str, api_key: &str, values: &[f32]) -> Result<String, UploadError> {
    if values.len() > MAX_UPLOAD_FIELDS {
        return Err(UploadError::TooManyFields {
            count: values.len(),
        });
    }

    let separator = if base_url.contains('?') { '&' } else { '?' };
    let mut url = format!("{base_url}{separator}api_key={api_key}");
    for (index, value) in values.iter().enumerate() {
        let _ = write!(&mut url, "&field{}={}", index + 1, format_value(*value));
    }
    Ok(url)
}

fn format_value(value: f32) -> String {
    let fixed = format!("{value:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Rate limiter for one channel group. The first check always passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadGate {
    interval_ms: u64,
    last_upload_ms: Option<u64>,
}

impl UploadGate {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_upload_ms: None,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn last_upload_ms(&self) -> Option<u64> {
        self.last_upload_ms
    }

    pub fn due(&self, now_ms: u64) -> bool {
        match self.last_upload_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        }
    }

    pub fn record(&mut self, now_ms: u64) {
        self.last_upload_ms = Some(now_ms);
    }

    pub fn reset(&mut self) {
        self.last_upload_ms = None;
    }
}
