use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use thiserror::Error;

use crate::analysis::{Collaborators, Operator};
use crate::fingerprint::{CatalogError, WafCatalog, WafDetector};
use crate::requester::{
    ExecutorConfig, Headers, Method, PostMode, RequestExecutor, Requester, ReqwestTransport,
};
use crate::scan::{ScanConfig, ScanError, ScanReport, Scanner};
use crate::transform::{self, DefaultConverter};
use crate::utils;

#[derive(Clone, Debug)]
pub struct Options {
    pub url: String,
    /// POST body; a GET scan is run when absent.
    pub data: Option<String>,
    pub headers: Headers,
    pub json: bool,
    pub path: bool,
    pub encode: Option<String>,
    pub delay_seconds: u64,
    pub timeout_seconds: u64,
    pub threads: usize,
    pub proxy: Option<String>,
    pub verify_tls: bool,
    pub follow_redirects: bool,
    pub skip: bool,
    pub skip_dom: bool,
    pub waf_signatures: Option<String>,
    pub ban_backoff_seconds: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            url: String::new(),
            data: None,
            headers: Headers::new(),
            json: false,
            path: false,
            encode: None,
            delay_seconds: 0,
            timeout_seconds: 10,
            threads: 10,
            proxy: None,
            verify_tls: false,
            follow_redirects: true,
            skip: false,
            skip_dom: false,
            waf_signatures: None,
            ban_backoff_seconds: 600,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("no target provided")]
    NoTarget,

    #[error("unknown encoder '{name}'")]
    UnknownEncoder { name: String },

    #[error("invalid threads {value}, expected positive integer")]
    InvalidThreads { value: usize },

    #[error("json mode requires POST data")]
    JsonWithoutData,

    #[error("failed to load WAF signatures: {source}")]
    Catalog {
        #[source]
        source: CatalogError,
    },

    #[error("scan failed: {source}")]
    Scan {
        #[source]
        source: ScanError,
    },
}

#[derive(Clone, Debug)]
pub struct Runner {
    options: Options,
}

impl Runner {
    pub fn new(options: Options) -> Result<Self, RunnerError> {
        if options.url.trim().is_empty() {
            return Err(RunnerError::NoTarget);
        }
        if options.threads == 0 {
            return Err(RunnerError::InvalidThreads {
                value: options.threads,
            });
        }
        if let Some(name) = options.encode.as_deref() {
            if transform::encoder_by_name(name).is_none() {
                return Err(RunnerError::UnknownEncoder {
                    name: name.to_string(),
                });
            }
        }
        if options.json && options.data.as_deref().unwrap_or_default().trim().is_empty() {
            return Err(RunnerError::JsonWithoutData);
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn scan_config(&self) -> ScanConfig {
        let o = &self.options;
        ScanConfig {
            method: if o.data.is_some() {
                Method::Post
            } else {
                Method::Get
            },
            post_mode: if o.json {
                PostMode::Json
            } else {
                PostMode::Form
            },
            path_mode: o.path,
            headers: o.headers.clone(),
            delay: Duration::from_secs(o.delay_seconds),
            timeout: Duration::from_secs(o.timeout_seconds.max(1)),
            verify_tls: o.verify_tls,
            proxy: o.proxy.clone().filter(|p| !p.trim().is_empty()),
            encoder: o.encode.as_deref().and_then(transform::encoder_by_name),
            skip_dom: o.skip_dom,
            skip_prompt: o.skip,
            threads: o.threads,
        }
    }

    pub fn catalog(&self) -> Result<WafCatalog, RunnerError> {
        let catalog = match self.options.waf_signatures.as_deref() {
            Some(path) => WafCatalog::from_path(Path::new(path)),
            None => WafCatalog::builtin(),
        };
        catalog.map_err(|source| RunnerError::Catalog { source })
    }

    pub fn requester(&self) -> Arc<dyn Requester> {
        Arc::new(RequestExecutor::new(
            ReqwestTransport::new(self.options.follow_redirects),
            Arc::new(DefaultConverter),
            ExecutorConfig {
                ban_backoff: Duration::from_secs(self.options.ban_backoff_seconds),
            },
        ))
    }

    /// Scans with the built-in collaborators over the reqwest transport.
    pub async fn run(
        &self,
        operator: Arc<dyn Operator>,
        bar: ProgressBar,
    ) -> Result<ScanReport, RunnerError> {
        let collab = Collaborators::builtin(self.requester(), operator);
        self.run_with(collab, bar).await
    }

    pub async fn run_with(
        &self,
        collab: Collaborators,
        bar: ProgressBar,
    ) -> Result<ScanReport, RunnerError> {
        let scanner = Scanner::new(self.scan_config(), collab, WafDetector::new(self.catalog()?))
            .with_progress_bar(bar);
        let target = self.options.url.trim();
        let data = self.options.data.as_deref();
        scanner
            .scan(target, data)
            .await
            .map_err(|source| RunnerError::Scan { source })
    }
}

/// Header string from CLI or config, parsed the same way as `--headers`.
pub fn parse_headers_option(raw: Option<&str>) -> Result<Headers, String> {
    match raw {
        Some(raw) => utils::parse_headers(raw),
        None => Ok(Headers::new()),
    }
}
