//! Probe-and-confirm orchestration for one target.

pub mod confirm;

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::analysis::{encoded_marker, Collaborators, ProbeContext};
use crate::fingerprint::{DetectError, WafDetector};
use crate::requester::{Headers, Method, Params, PostMode, Probe, RequestData, RequestSpec, DEFAULT_TIMEOUT};
use crate::transform::Encoder;
use crate::utils;

pub use confirm::{confirm, ConfirmRequest, Confirmation, ScanProgress};

pub const CONTINUE_PROMPT: &str = "Would you like to continue scanning? [y/N]";

/// Efficiency at which a payload counts as fully reflected.
pub const STRONG_EFFICIENCY: u8 = 100;
/// Efficiency accepted for payloads that open with a backslash escape.
pub const ESCAPE_EFFICIENCY: u8 = 95;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no parameters to test in '{target}'")]
    NoParameters { target: String },
    #[error("WAF detection failed: {source}")]
    Detector {
        #[from]
        source: DetectError,
    },
}

/// Per-scan request shape and behaviour switches.
#[derive(Clone)]
pub struct ScanConfig {
    pub method: Method,
    pub post_mode: PostMode,
    pub path_mode: bool,
    pub headers: Headers,
    pub delay: Duration,
    pub timeout: Duration,
    pub verify_tls: bool,
    pub proxy: Option<String>,
    pub encoder: Option<Arc<dyn Encoder>>,
    pub skip_dom: bool,
    /// Never ask the operator; keep scanning after a strong hit.
    pub skip_prompt: bool,
    pub threads: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            method: Method::Get,
            post_mode: PostMode::Form,
            path_mode: false,
            headers: Headers::new(),
            delay: Duration::ZERO,
            timeout: DEFAULT_TIMEOUT,
            verify_tls: false,
            proxy: None,
            encoder: None,
            skip_dom: false,
            skip_prompt: false,
            threads: 10,
        }
    }
}

impl ScanConfig {
    pub fn request(&self, url: &str, params: &Params) -> RequestSpec {
        RequestSpec::new(url, RequestData::Params(params.clone()))
            .with_headers(self.headers.clone())
            .with_method(self.method)
            .with_post_mode(self.post_mode)
            .with_path_mode(self.path_mode)
            .with_delay(self.delay)
            .with_timeout(self.timeout)
            .with_verify_tls(self.verify_tls)
            .with_proxy(self.proxy.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub parameter: String,
    pub payload: String,
    pub efficiency: u8,
    pub confidence: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanVerdict {
    pub target: String,
    pub payload: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub target: String,
    pub waf: Option<String>,
    pub dom_findings: Vec<String>,
    pub findings: Vec<Finding>,
    pub verdict: Option<ScanVerdict>,
}

enum Decision {
    Keep,
    Strong,
    Escaped,
}

fn decide(found: &Confirmation) -> Decision {
    if found.best_efficiency >= STRONG_EFFICIENCY {
        Decision::Strong
    } else if found.best_efficiency >= ESCAPE_EFFICIENCY && found.logged_payload.starts_with('\\') {
        Decision::Escaped
    } else {
        Decision::Keep
    }
}

pub struct Scanner {
    config: ScanConfig,
    collab: Collaborators,
    waf: WafDetector,
    bar: ProgressBar,
}

impl Scanner {
    pub fn new(config: ScanConfig, collab: Collaborators, waf: WafDetector) -> Self {
        Self {
            config,
            collab,
            waf,
            bar: ProgressBar::hidden(),
        }
    }

    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.bar = bar;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    async fn resolve_scheme(&self, target: &str) -> String {
        if utils::has_scheme(target) {
            return target.to_string();
        }
        let https = format!("https://{target}");
        let spec = self
            .config
            .request(&https, &Params::new())
            .with_method(Method::Get)
            .with_path_mode(false);
        match self.collab.requester.execute(&spec).await {
            Probe::Response(_) => https,
            _ => {
                debug!(target, "https probe failed, falling back to http");
                format!("http://{target}")
            }
        }
    }

    /// Scans every parameter of `target` until a payload is confirmed or all are exhausted.
    pub async fn scan(&self, target: &str, param_data: Option<&str>) -> Result<ScanReport, ScanError> {
        let target = self.resolve_scheme(target).await;
        let url = utils::get_url(&target, self.config.method.is_get());
        debug!(%url, "Scan target");

        let params = utils::get_params(
            &target,
            param_data,
            self.config.method,
            self.config.path_mode,
        );
        if params.is_empty() {
            error!("No parameters to test.");
            return Err(ScanError::NoParameters { target });
        }
        debug!(params = ?params, "Scan params");

        let mut report = ScanReport {
            target: target.clone(),
            ..Default::default()
        };

        if !self.config.skip_dom {
            info!("Checking for DOM vulnerabilities");
            match self.collab.requester.execute(&self.config.request(&url, &params)).await {
                Probe::Response(page) => {
                    report.dom_findings = self.collab.dom.analyze(&page.text);
                    if !report.dom_findings.is_empty() {
                        warn!(lines = report.dom_findings.len(), "Potentially vulnerable objects found");
                    }
                }
                _ => debug!("initial page fetch failed, DOM check skipped"),
            }
        }

        let base = self.config.request(&url, &Params::new());
        let mut waf_params = params.clone();
        match self
            .waf
            .detect(self.collab.requester.as_ref(), &base, &mut waf_params)
            .await?
        {
            Some(name) => {
                warn!(waf = %name, "WAF detected");
                report.waf = Some(name);
            }
            None => info!("WAF Status: Offline"),
        }

        let names: Vec<String> = params.keys().map(str::to_string).collect();
        for (index, name) in names.iter().enumerate() {
            if self
                .scan_param(&target, &url, &params, name, index, &mut report)
                .await
            {
                break;
            }
        }
        Ok(report)
    }

    /// Returns true when the scan should stop.
    async fn scan_param(
        &self,
        target: &str,
        url: &str,
        params: &Params,
        name: &str,
        index: usize,
        report: &mut ScanReport,
    ) -> bool {
        info!(param = name, "Testing parameter");
        let encoder = self.config.encoder.as_deref();
        let mut params_copy = params.clone();
        params_copy.insert(name, encoded_marker(encoder));

        let response = match self
            .collab
            .requester
            .execute(&self.config.request(url, &params_copy))
            .await
        {
            Probe::Response(r) => r,
            _ => {
                warn!(param = name, "Baseline request failed, skipping parameter");
                return false;
            }
        };

        let mut occurrences = self.collab.locator.locate(&response.text, encoder);
        if occurrences.is_empty() {
            error!(param = name, "No reflection found");
            return false;
        }
        info!(param = name, count = occurrences.len(), "Reflections found");

        let base = self.config.request(url, &Params::new());
        let probe = ProbeContext {
            base: &base,
            params: &params_copy,
            encoder,
        };
        info!("Analysing reflections");
        self.collab
            .filter_checker
            .annotate(probe, &mut occurrences)
            .await;

        info!("Generating payloads");
        let vectors = self.collab.generator.generate(&occurrences, &response.text);
        let total: usize = vectors.values().map(Vec::len).sum();
        if total == 0 {
            error!(param = name, "No vectors were crafted.");
            return false;
        }
        info!(count = total, "Payloads generated");

        let progress = ScanProgress::new(self.bar.clone(), total);
        let positions: Vec<usize> = occurrences.keys().copied().collect();
        let positions = positions.as_slice();
        let occurrences = &occurrences;
        let progress_ref = &progress;
        let checker = self.collab.checker.as_ref();

        let candidates = vectors
            .iter()
            .rev()
            .flat_map(|(score, list)| list.iter().map(move |v| (*score, v.as_str())));
        let mut confirmations = stream::iter(candidates)
            .map(move |(confidence, payload)| {
                confirm(
                    ConfirmRequest {
                        target,
                        probe,
                        payload,
                        positions,
                        occurrences,
                        confidence,
                        param_index: index,
                    },
                    checker,
                    progress_ref,
                )
            })
            .buffered(self.config.threads.max(1));

        let mut stop = false;
        while let Some(found) = confirmations.next().await {
            let decision = decide(&found);
            if matches!(decision, Decision::Keep) {
                continue;
            }
            info!(payload = %found.logged_payload, "Payload");
            info!(efficiency = found.best_efficiency, confidence = found.confidence, "Confirmed");
            report.findings.push(Finding {
                parameter: name.to_string(),
                payload: found.logged_payload.clone(),
                efficiency: found.best_efficiency,
                confidence: found.confidence,
            });
            let verdict = ScanVerdict {
                target: found.target.clone(),
                payload: found.logged_payload.clone(),
            };

            match decision {
                Decision::Escaped => {
                    report.verdict = Some(verdict);
                    stop = true;
                }
                Decision::Strong if self.config.skip_prompt => {
                    report.verdict.get_or_insert(verdict);
                }
                Decision::Strong => {
                    let answer = self.collab.operator.ask(CONTINUE_PROMPT).await;
                    if !answer.trim().eq_ignore_ascii_case("y") {
                        report.verdict = Some(verdict);
                        stop = true;
                    }
                }
                Decision::Keep => {}
            }
            if stop {
                break;
            }
        }
        drop(confirmations);
        progress.bar().finish_and_clear();
        stop
    }
}
