use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, warn};

use crate::transform::Converter;

mod agents;
mod transport;

pub use agents::{random_user_agent, USER_AGENTS};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportRequest};

/// Header value that asks the requester to pick a random browser agent.
pub const DISGUISE_SENTINEL: &str = "$";

pub const DEFAULT_BAN_BACKOFF: Duration = Duration::from_secs(600);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub type Headers = BTreeMap<String, String>;

/// Request parameters in insertion order.
///
/// Order matters for path mode, where each value becomes one path segment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the value in place when the key exists, appends otherwise.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.entries.clone()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn is_get(self) -> bool {
        matches!(self, Method::Get)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PostMode {
    #[default]
    Form,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestData {
    Params(Params),
    Raw(String),
}

impl RequestData {
    pub fn empty() -> Self {
        RequestData::Params(Params::new())
    }
}

/// Everything needed to issue one HTTP request.
///
/// Values are never mutated once built; the `with_*` helpers hand back a
/// modified copy.
#[derive(Clone, Debug)]
pub struct RequestSpec {
    pub url: String,
    pub data: RequestData,
    pub headers: Headers,
    pub method: Method,
    pub post_mode: PostMode,
    pub path_mode: bool,
    pub delay: Duration,
    pub timeout: Duration,
    pub verify_tls: bool,
    pub proxy: Option<String>,
}

impl RequestSpec {
    pub fn new(url: impl Into<String>, data: RequestData) -> Self {
        Self {
            url: url.into(),
            data,
            headers: Headers::new(),
            method: Method::Get,
            post_mode: PostMode::Form,
            path_mode: false,
            delay: Duration::ZERO,
            timeout: DEFAULT_TIMEOUT,
            verify_tls: false,
            proxy: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_data(mut self, data: RequestData) -> Self {
        self.data = data;
        self
    }

    pub fn with_params(self, params: Params) -> Self {
        self.with_data(RequestData::Params(params))
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_post_mode(mut self, post_mode: PostMode) -> Self {
        self.post_mode = post_mode;
        self
    }

    pub fn with_path_mode(mut self, path_mode: bool) -> Self {
        self.path_mode = path_mode;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseRecord {
    pub text: String,
    pub status: Option<u16>,
    /// Keys are lowercased.
    pub headers: HashMap<String, String>,
}

impl ResponseRecord {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

/// Outcome of one request attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Probe {
    Response(ResponseRecord),
    /// The connection was cut mid-exchange; the requester already waited out the ban.
    Transient,
    Failed(String),
}

impl Probe {
    pub fn is_response(&self) -> bool {
        matches!(self, Probe::Response(_))
    }

    pub fn response(&self) -> Option<&ResponseRecord> {
        match self {
            Probe::Response(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_record(self) -> ResponseRecord {
        match self {
            Probe::Response(r) => r,
            _ => ResponseRecord::empty(),
        }
    }
}

#[async_trait]
pub trait Requester: Send + Sync {
    async fn execute(&self, spec: &RequestSpec) -> Probe;
}

#[derive(Clone, Copy, Debug)]
pub struct ExecutorConfig {
    pub ban_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            ban_backoff: DEFAULT_BAN_BACKOFF,
        }
    }
}

/// Turns a [`RequestSpec`] into a wire request and sends it through a [`Transport`].
pub struct RequestExecutor<T> {
    transport: T,
    converter: Arc<dyn Converter>,
    config: ExecutorConfig,
}

impl<T: Transport> RequestExecutor<T> {
    pub fn new(transport: T, converter: Arc<dyn Converter>, config: ExecutorConfig) -> Self {
        Self {
            transport,
            converter,
            config,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn prepare(&self, spec: &RequestSpec) -> TransportRequest {
        let mut request = TransportRequest {
            method: spec.method,
            url: spec.url.clone(),
            query: Vec::new(),
            form: Vec::new(),
            body: None,
            headers: disguise_headers(&spec.headers),
            timeout: spec.timeout,
            verify_tls: spec.verify_tls,
            proxy: spec.proxy.clone(),
        };

        if spec.method == Method::Post && spec.post_mode == PostMode::Json {
            request.body = Some(self.converter.convert(&spec.data, None));
            if !has_header(&request.headers, "content-type") {
                request
                    .headers
                    .insert("Content-Type".to_string(), "application/json".to_string());
            }
            return request;
        }

        if spec.path_mode {
            request.url = self.converter.convert(&spec.data, Some(&spec.url));
            request.method = Method::Get;
            return request;
        }

        match (&spec.data, spec.method) {
            (RequestData::Params(params), Method::Get) => request.query = params.to_pairs(),
            (RequestData::Params(params), Method::Post) => request.form = params.to_pairs(),
            (RequestData::Raw(raw), Method::Get) => {
                if !raw.is_empty() {
                    let sep = if request.url.contains('?') { '&' } else { '?' };
                    request.url = format!("{}{}{}", request.url, sep, raw);
                }
            }
            (RequestData::Raw(raw), Method::Post) => {
                request.body = Some(raw.clone());
                if !has_header(&request.headers, "content-type") {
                    request.headers.insert(
                        "Content-Type".to_string(),
                        "application/x-www-form-urlencoded".to_string(),
                    );
                }
            }
        }
        request
    }
}

#[async_trait]
impl<T: Transport> Requester for RequestExecutor<T> {
    async fn execute(&self, spec: &RequestSpec) -> Probe {
        let request = self.prepare(spec);
        if !spec.delay.is_zero() {
            tokio::time::sleep(spec.delay).await;
        }
        debug!(url = %request.url, method = ?request.method, "Requester url");
        debug!(query = ?request.query, form = ?request.form, "Requester params");
        debug!(headers = ?request.headers, "Requester headers");

        match self.transport.send(request).await {
            Ok(response) => Probe::Response(response),
            Err(TransportError::Protocol(reason)) => {
                warn!("WAF is dropping suspicious requests.");
                warn!(
                    "Scanning will continue after {}.",
                    describe_wait(self.config.ban_backoff)
                );
                debug!(%reason, "protocol fault");
                tokio::time::sleep(self.config.ban_backoff).await;
                Probe::Transient
            }
            Err(TransportError::Other(reason)) => {
                warn!("Unable to connect to the target.");
                debug!(%reason, "transport failure");
                Probe::Failed(reason)
            }
        }
    }
}

fn describe_wait(wait: Duration) -> String {
    let secs = wait.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let mins = secs / 60;
        if mins == 1 {
            "1 minute".to_string()
        } else {
            format!("{mins} minutes")
        }
    } else {
        format!("{:.1} seconds", wait.as_secs_f64())
    }
}

fn has_header(headers: &Headers, name: &str) -> bool {
    headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

/// Swaps in a random browser User-Agent when none is set, it is blank, or it is `$`.
pub fn disguise_headers(headers: &Headers) -> Headers {
    let mut out = headers.clone();
    let existing = out
        .keys()
        .find(|k| k.eq_ignore_ascii_case("user-agent"))
        .cloned();
    match existing {
        Some(key) => {
            let replace = out
                .get(&key)
                .map(|v| v.trim().is_empty() || v == DISGUISE_SENTINEL)
                .unwrap_or(true);
            if replace {
                out.insert(key, random_user_agent().to_string());
            }
        }
        None => {
            out.insert("User-Agent".to_string(), random_user_agent().to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;
    use crate::transform::DefaultConverter;

    struct RecordingTransport {
        seen: Mutex<Vec<TransportRequest>>,
        reply: Mutex<Vec<Result<ResponseRecord, TransportError>>>,
    }

    impl RecordingTransport {
        fn replying(reply: Result<ResponseRecord, TransportError>) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                reply: Mutex::new(vec![reply]),
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, request: TransportRequest) -> Result<ResponseRecord, TransportError> {
            self.seen.lock().unwrap().push(request);
            self.reply
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(ResponseRecord::empty()))
        }
    }

    struct MarkingConverter;

    impl Converter for MarkingConverter {
        fn convert(&self, _data: &RequestData, url: Option<&str>) -> String {
            match url {
                Some(_) => "http://converted.test/path".to_string(),
                None => "converted-body".to_string(),
            }
        }
    }

    fn ok_response() -> Result<ResponseRecord, TransportError> {
        Ok(ResponseRecord {
            text: "ok".to_string(),
            status: Some(200),
            headers: HashMap::new(),
        })
    }

    fn executor(
        reply: Result<ResponseRecord, TransportError>,
        backoff: Duration,
    ) -> RequestExecutor<RecordingTransport> {
        RequestExecutor::new(
            RecordingTransport::replying(reply),
            Arc::new(MarkingConverter),
            ExecutorConfig {
                ban_backoff: backoff,
            },
        )
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn params_keep_insertion_order_and_replace_in_place() {
        let mut p = params(&[("b", "1"), ("a", "2")]);
        p.insert("b", "3");
        p.insert("c", "4");
        let keys: Vec<&str> = p.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(p.get("b"), Some("3"));
    }

    #[test]
    fn get_request_sends_params_as_query() {
        let ex = executor(ok_response(), Duration::ZERO);
        let spec = RequestSpec::new("http://t.test/", RequestData::Params(params(&[("q", "x")])));
        let req = ex.prepare(&spec);
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.query, vec![("q".to_string(), "x".to_string())]);
        assert!(req.form.is_empty());
        assert!(req.body.is_none());
    }

    #[test]
    fn post_form_request_sends_params_as_form() {
        let ex = executor(ok_response(), Duration::ZERO);
        let spec = RequestSpec::new("http://t.test/", RequestData::Params(params(&[("q", "x")])))
            .with_method(Method::Post);
        let req = ex.prepare(&spec);
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.form.len(), 1);
        assert!(req.query.is_empty());
    }

    #[test]
    fn json_mode_converts_body() {
        let ex = executor(ok_response(), Duration::ZERO);
        let spec = RequestSpec::new("http://t.test/", RequestData::Params(params(&[("q", "x")])))
            .with_method(Method::Post)
            .with_post_mode(PostMode::Json);
        let req = ex.prepare(&spec);
        assert_eq!(req.body.as_deref(), Some("converted-body"));
        assert_eq!(
            req.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn path_mode_rewrites_url_and_forces_get() {
        let ex = executor(ok_response(), Duration::ZERO);
        let spec = RequestSpec::new("http://t.test/a/b", RequestData::Params(params(&[("a", "a")])))
            .with_method(Method::Post)
            .with_path_mode(true);
        let req = ex.prepare(&spec);
        assert_eq!(req.url, "http://converted.test/path");
        assert_eq!(req.method, Method::Get);
        assert!(req.query.is_empty());
        assert!(req.form.is_empty());
    }

    #[test]
    fn path_mode_with_default_converter_appends_segments() {
        let ex = RequestExecutor::new(
            RecordingTransport::replying(ok_response()),
            Arc::new(DefaultConverter),
            ExecutorConfig::default(),
        );
        let spec = RequestSpec::new(
            "http://t.test/old/path",
            RequestData::Params(params(&[("old", "old"), ("path", "v3dm0s")])),
        )
        .with_path_mode(true);
        assert_eq!(ex.prepare(&spec).url, "http://t.test/old/v3dm0s");
    }

    #[test]
    fn sentinel_and_missing_agent_are_replaced() {
        for headers in [
            Headers::new(),
            [("User-Agent".to_string(), "$".to_string())].into_iter().collect(),
            [("user-agent".to_string(), "".to_string())].into_iter().collect(),
        ] {
            let out = disguise_headers(&headers);
            let agent = out
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
                .map(|(_, v)| v.clone())
                .unwrap();
            assert!(USER_AGENTS.contains(&agent.as_str()), "{agent}");
        }
    }

    #[test]
    fn explicit_agent_is_kept() {
        let headers: Headers = [("User-Agent".to_string(), "probe/1.0".to_string())]
            .into_iter()
            .collect();
        let out = disguise_headers(&headers);
        assert_eq!(out.get("User-Agent").map(String::as_str), Some("probe/1.0"));
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn successful_send_yields_response() {
        let ex = executor(ok_response(), Duration::ZERO);
        let spec = RequestSpec::new("http://t.test/", RequestData::empty());
        let probe = ex.execute(&spec).await;
        assert_eq!(probe.response().map(|r| r.text.as_str()), Some("ok"));
        assert_eq!(ex.transport().seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn protocol_fault_waits_out_the_ban_once() {
        let backoff = Duration::from_millis(40);
        let ex = executor(Err(TransportError::Protocol("reset".into())), backoff);
        let spec = RequestSpec::new("http://t.test/", RequestData::empty());
        let start = Instant::now();
        let probe = ex.execute(&spec).await;
        assert_eq!(probe, Probe::Transient);
        assert!(start.elapsed() >= backoff);
        assert_eq!(ex.transport().seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn other_failure_is_immediate() {
        let ex = executor(
            Err(TransportError::Other("refused".into())),
            Duration::from_secs(30),
        );
        let spec = RequestSpec::new("http://t.test/", RequestData::empty());
        let start = Instant::now();
        let probe = ex.execute(&spec).await;
        assert_eq!(probe, Probe::Failed("refused".to_string()));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn delay_is_applied_before_sending() {
        let ex = executor(ok_response(), Duration::ZERO);
        let spec = RequestSpec::new("http://t.test/", RequestData::empty())
            .with_delay(Duration::from_millis(30));
        let start = Instant::now();
        let _ = ex.execute(&spec).await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_description_uses_minutes_for_whole_minutes() {
        assert_eq!(describe_wait(Duration::from_secs(600)), "10 minutes");
        assert_eq!(describe_wait(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe_wait(Duration::from_millis(500)), "0.5 seconds");
    }
}
