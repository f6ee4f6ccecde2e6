use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use thiserror::Error;

use super::{Headers, Method, ResponseRecord};

/// A fully prepared request, ready for the wire.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub body: Option<String>,
    pub headers: Headers,
    pub timeout: Duration,
    pub verify_tls: bool,
    pub proxy: Option<String>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer cut the exchange short.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("request failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<ResponseRecord, TransportError>;
}

type ClientKey = (bool, Option<String>);

/// reqwest-backed transport. Clients are built lazily per TLS/proxy combination.
pub struct ReqwestTransport {
    follow_redirects: bool,
    clients: Mutex<HashMap<ClientKey, reqwest::Client>>,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ReqwestTransport {
    pub fn new(follow_redirects: bool) -> Self {
        Self {
            follow_redirects,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(
        &self,
        verify_tls: bool,
        proxy: Option<&str>,
    ) -> Result<reqwest::Client, TransportError> {
        let proxy = proxy
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let key = (verify_tls, proxy);
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(self.follow_redirects, key.0, key.1.as_deref())?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

fn build_client(
    follow_redirects: bool,
    verify_tls: bool,
    proxy: Option<&str>,
) -> Result<reqwest::Client, TransportError> {
    let redirect_policy = if follow_redirects {
        reqwest::redirect::Policy::limited(10)
    } else {
        reqwest::redirect::Policy::none()
    };

    let mut builder = reqwest::Client::builder()
        .redirect(redirect_policy)
        .danger_accept_invalid_hostnames(!verify_tls)
        .danger_accept_invalid_certs(!verify_tls);

    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| TransportError::Other(format!("invalid proxy '{proxy}': {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| TransportError::Other(format!("failed to build http client: {e}")))
}

fn header_map_to_hashmap(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = HashMap::new();
    for (k, v) in headers.iter() {
        if let Ok(v) = v.to_str() {
            out.entry(k.as_str().to_lowercase())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(v);
                })
                .or_insert_with(|| v.to_string());
        }
    }
    out
}

fn is_incomplete_message(err: &(dyn StdError + 'static)) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        let msg = inner.to_string().to_lowercase();
        if msg.contains("connection closed before message completed")
            || msg.contains("incomplete message")
            || msg.contains("unexpected end of file")
        {
            return true;
        }
        source = inner.source();
    }
    false
}

fn classify(err: reqwest::Error) -> TransportError {
    // a deadline hit mid-body still surfaces as a body error
    if err.is_timeout() {
        return TransportError::Other(err.to_string());
    }
    if err.is_body() || err.is_decode() || is_incomplete_message(&err) {
        TransportError::Protocol(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<ResponseRecord, TransportError> {
        let client = self.client_for(request.verify_tls, request.proxy.as_deref())?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = client.request(method, &request.url).timeout(request.timeout);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let headers = header_map_to_hashmap(resp.headers());
        let text = resp.text().await.map_err(classify)?;
        Ok(ResponseRecord {
            text,
            status: Some(status),
            headers,
        })
    }
}
