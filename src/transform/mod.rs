use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::requester::{Params, RequestData};

/// Reshapes request data for JSON bodies and path-segment injection.
pub trait Converter: Send + Sync {
    /// With `url`, returns a new URL whose path is built from the data values.
    /// Without it, returns the data serialized as a JSON document.
    fn convert(&self, data: &RequestData, url: Option<&str>) -> String;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConverter;

impl Converter for DefaultConverter {
    fn convert(&self, data: &RequestData, url: Option<&str>) -> String {
        match url {
            Some(url) => data_to_path(data, url),
            None => data_to_json(data),
        }
    }
}

fn origin_of(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            match parsed.port() {
                Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
                None => format!("{}://{}", parsed.scheme(), host),
            }
        }
        Err(_) => url
            .split('/')
            .take(3)
            .collect::<Vec<_>>()
            .join("/"),
    }
}

fn data_to_path(data: &RequestData, url: &str) -> String {
    let mut out = origin_of(url);
    match data {
        RequestData::Params(params) => {
            for value in params.values() {
                out.push('/');
                out.push_str(value);
            }
        }
        RequestData::Raw(raw) => {
            let raw = raw.trim_start_matches('/');
            if !raw.is_empty() {
                out.push('/');
                out.push_str(raw);
            }
        }
    }
    out
}

fn data_to_json(data: &RequestData) -> String {
    match data {
        RequestData::Params(params) => params_to_json(params),
        RequestData::Raw(raw) => raw.clone(),
    }
}

pub fn params_to_json(params: &Params) -> String {
    serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string())
}

/// Payload encoding applied to marker and probe strings before sending.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, value: &str) -> String;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Base64Encoder;

impl Encoder for Base64Encoder {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn encode(&self, value: &str) -> String {
        STANDARD.encode(value.as_bytes())
    }
}

pub const ENCODER_NAMES: &[&str] = &["base64"];

pub fn encoder_by_name(name: &str) -> Option<Arc<dyn Encoder>> {
    match name.trim().to_lowercase().as_str() {
        "base64" | "b64" => Some(Arc::new(Base64Encoder)),
        _ => None,
    }
}

pub fn escape_path_slashes(payload: &str) -> String {
    payload.replace('/', "%2F")
}

/// One round of URL decoding; invalid sequences leave the input untouched.
pub fn decode_once(payload: &str) -> String {
    urlencoding::decode(payload)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| payload.to_string())
}
