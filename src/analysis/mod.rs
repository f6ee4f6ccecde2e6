//! Reflection analysis collaborators used by the scanner.
//!
//! Each stage sits behind a trait so a scan can run with the built-ins, or with
//! any mix of replacements supplied by the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::requester::{Params, RequestSpec, Requester};
use crate::transform::Encoder;

mod checker;
mod dom;
mod filters;
mod generator;
mod locator;
mod operator;

pub use checker::{similarity, FuzzyChecker, PROBE_END, PROBE_START};
pub use dom::SinkDomAnalyzer;
pub use filters::CharFilterChecker;
pub use generator::ContextGenerator;
pub use locator::MarkerLocator;
pub use operator::{ConsoleOperator, ScriptedOperator};

/// Value planted in the parameter under test so its reflections can be found.
pub const MARKER: &str = "v3dm0s";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Context {
    Html {
        tag: String,
    },
    Attribute {
        tag: String,
        name: String,
        quote: Option<char>,
    },
    Script {
        quote: Option<char>,
    },
    Comment,
}

impl Context {
    pub fn label(&self) -> &'static str {
        match self {
            Context::Html { .. } => "html",
            Context::Attribute { .. } => "attribute",
            Context::Script { .. } => "script",
            Context::Comment => "comment",
        }
    }
}

/// One reflection of the marker in a response body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Occurrence {
    pub position: usize,
    pub context: Context,
    /// Filter probe -> how intact it came back (0..=100).
    pub scores: BTreeMap<String, u8>,
}

impl Occurrence {
    pub fn new(position: usize, context: Context) -> Self {
        Self {
            position,
            context,
            scores: BTreeMap::new(),
        }
    }

    pub fn score(&self, probe: &str) -> u8 {
        self.scores.get(probe).copied().unwrap_or(0)
    }
}

/// Reflections keyed by byte position.
pub type OccurrenceMap = BTreeMap<usize, Occurrence>;

/// Candidate vectors keyed by pre-score; higher keys are tried first.
pub type VectorMap = BTreeMap<u8, Vec<String>>;

/// Request shape shared by every probe of one parameter.
#[derive(Clone, Copy)]
pub struct ProbeContext<'a> {
    pub base: &'a RequestSpec,
    /// Parameters with the marker in the slot under test.
    pub params: &'a Params,
    pub encoder: Option<&'a dyn Encoder>,
}

pub trait ReflectionLocator: Send + Sync {
    fn locate(&self, text: &str, encoder: Option<&dyn Encoder>) -> OccurrenceMap;
}

pub trait PayloadGenerator: Send + Sync {
    fn generate(&self, occurrences: &OccurrenceMap, text: &str) -> VectorMap;
}

#[async_trait]
pub trait Checker: Send + Sync {
    /// Sends `vector` in place of the marker; returns the non-zero efficiencies.
    async fn check(&self, ctx: ProbeContext<'_>, vector: &str, positions: &[usize]) -> Vec<u8>;

    /// Like [`Checker::check`] but with one slot per reflection, in position
    /// order, zeros included.
    async fn check_each(
        &self,
        ctx: ProbeContext<'_>,
        vector: &str,
        positions: &[usize],
    ) -> Vec<u8> {
        self.check(ctx, vector, positions).await
    }
}

#[async_trait]
pub trait FilterChecker: Send + Sync {
    async fn annotate(&self, ctx: ProbeContext<'_>, occurrences: &mut OccurrenceMap);
}

pub trait DomAnalyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Vec<String>;
}

#[async_trait]
pub trait Operator: Send + Sync {
    async fn ask(&self, question: &str) -> String;
}

/// The full set of scan collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub requester: Arc<dyn Requester>,
    pub locator: Arc<dyn ReflectionLocator>,
    pub generator: Arc<dyn PayloadGenerator>,
    pub checker: Arc<dyn Checker>,
    pub filter_checker: Arc<dyn FilterChecker>,
    pub dom: Arc<dyn DomAnalyzer>,
    pub operator: Arc<dyn Operator>,
}

impl Collaborators {
    pub fn builtin(requester: Arc<dyn Requester>, operator: Arc<dyn Operator>) -> Self {
        let checker: Arc<dyn Checker> = Arc::new(FuzzyChecker::new(requester.clone()));
        Self {
            locator: Arc::new(MarkerLocator),
            generator: Arc::new(ContextGenerator::default()),
            filter_checker: Arc::new(CharFilterChecker::new(checker.clone())),
            checker,
            dom: Arc::new(SinkDomAnalyzer::new()),
            operator,
            requester,
        }
    }
}

/// Copy of `params` with every value equal to `needle` swapped for `replacement`.
pub fn replace_value(params: &Params, needle: &str, replacement: &str) -> Params {
    params
        .iter()
        .map(|(k, v)| {
            if v == needle {
                (k, replacement)
            } else {
                (k, v)
            }
        })
        .collect()
}

pub(crate) fn encoded_marker(encoder: Option<&dyn Encoder>) -> String {
    match encoder {
        Some(enc) => enc.encode(MARKER),
        None => MARKER.to_string(),
    }
}
