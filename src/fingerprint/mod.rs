use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::requester::{Probe, RequestSpec, Requester, ResponseRecord};

const BUILTIN_CATALOG: &str = include_str!("../../data/waf_signatures.json");

/// Parameter name used for the noise probe.
pub const NOISE_PARAM: &str = "xss";
/// Payload loud enough that any WAF in front of the target should react.
pub const NOISE_PAYLOAD: &str = r#"<script>alert("XSS")</script>"#;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read WAF signatures '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse WAF signatures: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {field} pattern for '{name}': {source}")]
    Pattern {
        name: String,
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("WAF probe against {url} failed: {reason}")]
    Failed { url: String, reason: String },
    #[error("WAF probe against {url} was dropped by the target")]
    Dropped { url: String },
}

#[derive(Debug, Deserialize)]
struct RawSignature {
    #[serde(default)]
    page: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    headers: String,
}

#[derive(Clone, Debug)]
pub struct WafSignature {
    pub name: String,
    page: Option<Regex>,
    code: Option<Regex>,
    headers: Option<Regex>,
}

fn compile(
    name: &str,
    field: &'static str,
    pattern: &str,
    case_insensitive: bool,
) -> Result<Option<Regex>, CatalogError> {
    if pattern.is_empty() {
        return Ok(None);
    }
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map(Some)
        .map_err(|source| CatalogError::Pattern {
            name: name.to_string(),
            field,
            source,
        })
}

impl WafSignature {
    /// Empty patterns never contribute to the score.
    pub fn new(name: &str, page: &str, code: &str, headers: &str) -> Result<Self, CatalogError> {
        Ok(Self {
            name: name.to_string(),
            page: compile(name, "page", page, true)?,
            code: compile(name, "code", code, false)?,
            headers: compile(name, "headers", headers, true)?,
        })
    }

    /// Number of fields (page, code, headers) that match the response.
    pub fn score(&self, response: &ResponseRecord, status: u16) -> usize {
        let mut score = 0;
        if let Some(page) = &self.page {
            if page.is_match(&response.text) {
                score += 1;
            }
        }
        if let Some(code) = &self.code {
            if code.is_match(&status.to_string()) {
                score += 1;
            }
        }
        if let Some(headers) = &self.headers {
            let hit = response
                .headers
                .iter()
                .any(|(k, v)| headers.is_match(&format!("{k}: {v}")));
            if hit {
                score += 1;
            }
        }
        score
    }
}

/// Ordered WAF signature catalog.
#[derive(Clone, Debug, Default)]
pub struct WafCatalog {
    signatures: Vec<WafSignature>,
}

impl WafCatalog {
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let parsed: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(raw).map_err(|source| CatalogError::Parse { source })?;
        let mut signatures = Vec::with_capacity(parsed.len());
        for (name, value) in parsed {
            let sig: RawSignature =
                serde_json::from_value(value).map_err(|source| CatalogError::Parse { source })?;
            signatures.push(WafSignature::new(&name, &sig.page, &sig.code, &sig.headers)?);
        }
        Ok(Self { signatures })
    }

    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_signatures(signatures: Vec<WafSignature>) -> Self {
        Self { signatures }
    }

    pub fn signatures(&self) -> &[WafSignature] {
        &self.signatures
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Highest scoring signature; on ties the earlier entry wins. `None` when
    /// nothing scores above zero.
    pub fn best_match(&self, response: &ResponseRecord) -> Option<&WafSignature> {
        let status = response.status.filter(|s| *s != 0)?;
        let mut best: Option<(usize, &WafSignature)> = None;
        for sig in &self.signatures {
            let score = sig.score(response, status);
            if score > best.map(|(s, _)| s).unwrap_or(0) {
                best = Some((score, sig));
            }
        }
        best.map(|(_, sig)| sig)
    }
}

pub struct WafDetector {
    catalog: WafCatalog,
}

impl WafDetector {
    pub fn new(catalog: WafCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &WafCatalog {
        &self.catalog
    }

    /// Sends one noisy request and names the WAF whose signature best fits the reply.
    ///
    /// The noise parameter is left in `params` afterwards.
    pub async fn detect(
        &self,
        requester: &dyn Requester,
        base: &RequestSpec,
        params: &mut crate::requester::Params,
    ) -> Result<Option<String>, DetectError> {
        params.insert(NOISE_PARAM, NOISE_PAYLOAD);
        let spec = base.clone().with_params(params.clone());
        let response = match requester.execute(&spec).await {
            Probe::Response(r) => r,
            Probe::Transient => {
                return Err(DetectError::Dropped {
                    url: base.url.clone(),
                })
            }
            Probe::Failed(reason) => {
                return Err(DetectError::Failed {
                    url: base.url.clone(),
                    reason,
                })
            }
        };
        debug!(status = ?response.status, "WAF probe response");
        match response.status {
            None | Some(0) => return Ok(None),
            Some(_) => {}
        }
        let found = self.catalog.best_match(&response).map(|sig| sig.name.clone());
        if let Some(name) = found.as_deref() {
            info!(waf = name, "WAF signature matched");
        }
        Ok(found)
    }
}
