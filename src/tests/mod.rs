use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::analysis::{
    Checker, Collaborators, Context, DomAnalyzer, FilterChecker, Occurrence, OccurrenceMap,
    PayloadGenerator, ProbeContext, ReflectionLocator, ScriptedOperator, VectorMap, MARKER,
};
use crate::fingerprint::{WafCatalog, WafDetector, NOISE_PARAM};
use crate::requester::{Method, Probe, RequestData, RequestSpec, Requester, ResponseRecord};
use crate::scan::{ScanConfig, ScanError, Scanner, CONTINUE_PROMPT};
use crate::transform::Encoder;

type Render = Box<dyn Fn(&RequestSpec) -> Probe + Send + Sync>;

struct FakeRequester {
    render: Render,
    seen: Mutex<Vec<RequestSpec>>,
}

impl FakeRequester {
    fn new(render: impl Fn(&RequestSpec) -> Probe + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            render: Box::new(render),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn urls(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|s| s.url.clone()).collect()
    }
}

#[async_trait]
impl Requester for FakeRequester {
    async fn execute(&self, spec: &RequestSpec) -> Probe {
        self.seen.lock().unwrap().push(spec.clone());
        (self.render)(spec)
    }
}

fn page(text: impl Into<String>) -> Probe {
    Probe::Response(ResponseRecord {
        text: text.into(),
        status: Some(200),
        headers: HashMap::new(),
    })
}

fn param<'a>(spec: &'a RequestSpec, name: &str) -> Option<&'a str> {
    match &spec.data {
        RequestData::Params(p) => p.get(name),
        RequestData::Raw(_) => None,
    }
}

/// Echoes every parameter value into the page.
fn echo(spec: &RequestSpec) -> Probe {
    let mut body = String::new();
    if let RequestData::Params(p) = &spec.data {
        for v in p.values() {
            body.push_str(&format!("<p>{v}</p>"));
        }
    }
    page(body)
}

struct StubLocator;

impl ReflectionLocator for StubLocator {
    fn locate(&self, text: &str, _encoder: Option<&dyn Encoder>) -> OccurrenceMap {
        text.find(MARKER)
            .map(|pos| {
                (
                    pos,
                    Occurrence::new(pos, Context::Html { tag: "p".into() }),
                )
            })
            .into_iter()
            .collect()
    }
}

struct StubGenerator(VectorMap);

impl PayloadGenerator for StubGenerator {
    fn generate(&self, _occurrences: &OccurrenceMap, _text: &str) -> VectorMap {
        self.0.clone()
    }
}

struct StubChecker {
    scores: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl StubChecker {
    fn new(scores: &[(&str, &[u8])]) -> Arc<Self> {
        Arc::new(Self {
            scores: scores
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Checker for StubChecker {
    async fn check(&self, _ctx: ProbeContext<'_>, vector: &str, _positions: &[usize]) -> Vec<u8> {
        self.calls.lock().unwrap().push(vector.to_string());
        self.scores.get(vector).cloned().unwrap_or_default()
    }
}

struct NoFilter;

#[async_trait]
impl FilterChecker for NoFilter {
    async fn annotate(&self, _ctx: ProbeContext<'_>, _occurrences: &mut OccurrenceMap) {}
}

#[derive(Default)]
struct CountingDom {
    pages: Mutex<usize>,
}

impl DomAnalyzer for CountingDom {
    fn analyze(&self, _text: &str) -> Vec<String> {
        *self.pages.lock().unwrap() += 1;
        vec!["1   [sink] document.write(x)".to_string()]
    }
}

struct Harness {
    requester: Arc<FakeRequester>,
    checker: Arc<StubChecker>,
    operator: Arc<ScriptedOperator>,
    dom: Arc<CountingDom>,
    config: ScanConfig,
    vectors: VectorMap,
}

impl Harness {
    fn new(
        requester: Arc<FakeRequester>,
        checker: Arc<StubChecker>,
        vectors: &[(u8, &[&str])],
        answers: &[&str],
    ) -> Self {
        Self {
            requester,
            checker,
            operator: Arc::new(ScriptedOperator::new(answers.iter().copied())),
            dom: Arc::new(CountingDom::default()),
            config: ScanConfig {
                threads: 1,
                ..Default::default()
            },
            vectors: vectors
                .iter()
                .map(|(k, v)| (*k, v.iter().map(|s| s.to_string()).collect()))
                .collect(),
        }
    }

    fn scanner(&self) -> Scanner {
        let collab = Collaborators {
            requester: self.requester.clone(),
            locator: Arc::new(StubLocator),
            generator: Arc::new(StubGenerator(self.vectors.clone())),
            checker: self.checker.clone(),
            filter_checker: Arc::new(NoFilter),
            dom: self.dom.clone(),
            operator: self.operator.clone(),
        };
        Scanner::new(
            self.config.clone(),
            collab,
            WafDetector::new(WafCatalog::builtin().unwrap()),
        )
    }
}

#[tokio::test]
async fn strong_payload_prompts_and_stops_on_no() {
    let checker = StubChecker::new(&[("<b>", &[40, 100])]);
    let h = Harness::new(
        FakeRequester::new(echo),
        checker.clone(),
        &[(10, &["<a>", "<b>"]), (5, &["<c>"])],
        &["n"],
    );
    let report = h.scanner().scan("https://t.test/?q=1", None).await.unwrap();

    let verdict = report.verdict.unwrap();
    assert_eq!(verdict.target, "https://t.test/?q=1");
    assert_eq!(verdict.payload, "<b>");
    assert_eq!(checker.calls(), vec!["<a>", "<b>"]);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].efficiency, 100);
    assert_eq!(report.findings[0].confidence, 10);
    assert_eq!(h.operator.questions(), vec![CONTINUE_PROMPT.to_string()]);
}

#[tokio::test]
async fn yes_keeps_scanning_until_exhausted() {
    let checker = StubChecker::new(&[("<b>", &[100])]);
    let h = Harness::new(
        FakeRequester::new(echo),
        checker.clone(),
        &[(10, &["<a>", "<b>"]), (5, &["<c>"])],
        &["Y"],
    );
    let report = h.scanner().scan("https://t.test/?q=1", None).await.unwrap();
    assert!(report.verdict.is_none());
    assert_eq!(report.findings.len(), 1);
    assert_eq!(checker.calls(), vec!["<a>", "<b>", "<c>"]);
}

#[tokio::test]
async fn escaped_payload_is_accepted_without_prompt() {
    let checker = StubChecker::new(&[("\\'-confirm()//", &[95])]);
    let h = Harness::new(
        FakeRequester::new(echo),
        checker,
        &[(7, &["\\'-confirm()//"])],
        &[],
    );
    let report = h.scanner().scan("https://t.test/?q=1", None).await.unwrap();
    assert_eq!(report.verdict.unwrap().payload, "\\'-confirm()//");
    assert!(h.operator.questions().is_empty());
}

#[tokio::test]
async fn high_but_unescaped_efficiency_is_not_confirmed() {
    let checker = StubChecker::new(&[("<x>", &[99])]);
    let h = Harness::new(FakeRequester::new(echo), checker, &[(9, &["<x>"])], &["n"]);
    let report = h.scanner().scan("https://t.test/?q=1", None).await.unwrap();
    assert!(report.verdict.is_none());
    assert!(report.findings.is_empty());
    assert!(h.operator.questions().is_empty());
}

#[tokio::test]
async fn skip_prompt_records_every_strong_payload() {
    let checker = StubChecker::new(&[("<a>", &[100]), ("<c>", &[100])]);
    let mut h = Harness::new(
        FakeRequester::new(echo),
        checker.clone(),
        &[(10, &["<a>", "<b>"]), (5, &["<c>"])],
        &[],
    );
    h.config.skip_prompt = true;
    let report = h.scanner().scan("https://t.test/?q=1&r=2", None).await.unwrap();
    assert!(h.operator.questions().is_empty());
    // two strong payloads for each of the two parameters
    assert_eq!(report.findings.len(), 4);
    assert_eq!(report.verdict.unwrap().payload, "<a>");
    assert_eq!(report.findings[2].parameter, "r");
}

#[tokio::test]
async fn higher_tiers_are_confirmed_first_with_concurrency() {
    let checker = StubChecker::new(&[]);
    let mut h = Harness::new(
        FakeRequester::new(echo),
        checker.clone(),
        &[(3, &["low"]), (10, &["top1", "top2"]), (6, &["mid"])],
        &[],
    );
    h.config.threads = 4;
    h.scanner().scan("https://t.test/?q=1", None).await.unwrap();
    assert_eq!(checker.calls(), vec!["top1", "top2", "mid", "low"]);
}

#[tokio::test]
async fn target_without_params_is_an_error() {
    let h = Harness::new(FakeRequester::new(echo), StubChecker::new(&[]), &[], &[]);
    let err = h.scanner().scan("https://t.test/plain", None).await.unwrap_err();
    assert!(matches!(err, ScanError::NoParameters { .. }));
}

#[tokio::test]
async fn https_failure_falls_back_to_http() {
    let requester = FakeRequester::new(|spec| {
        if spec.url.starts_with("https://") {
            Probe::Failed("tls".into())
        } else {
            echo(spec)
        }
    });
    let h = Harness::new(requester.clone(), StubChecker::new(&[]), &[], &[]);
    let report = h.scanner().scan("t.test/?q=1", None).await.unwrap();
    assert_eq!(report.target, "http://t.test/?q=1");
    let urls = requester.urls();
    assert_eq!(urls[0], "https://t.test/?q=1");
    assert!(urls[1..].iter().all(|u| u == "http://t.test/"));
}

#[tokio::test]
async fn https_success_keeps_https() {
    let requester = FakeRequester::new(echo);
    let h = Harness::new(requester, StubChecker::new(&[]), &[], &[]);
    let report = h.scanner().scan("t.test/?q=1", None).await.unwrap();
    assert_eq!(report.target, "https://t.test/?q=1");
}

#[tokio::test]
async fn detected_waf_is_recorded_and_scan_goes_on() {
    let requester = FakeRequester::new(|spec| {
        if param(spec, NOISE_PARAM).is_some() {
            Probe::Response(ResponseRecord {
                text: "This error was generated by Mod_Security".into(),
                status: Some(406),
                headers: HashMap::new(),
            })
        } else {
            echo(spec)
        }
    });
    let checker = StubChecker::new(&[]);
    let h = Harness::new(requester, checker.clone(), &[(10, &["<a>"])], &[]);
    let report = h.scanner().scan("https://t.test/?q=1", None).await.unwrap();
    assert!(report.waf.unwrap().contains("ModSecurity"));
    assert_eq!(checker.calls(), vec!["<a>"]);
}

#[tokio::test]
async fn waf_probe_failure_aborts_the_scan() {
    let requester = FakeRequester::new(|spec| {
        if param(spec, NOISE_PARAM).is_some() {
            Probe::Failed("reset".into())
        } else {
            echo(spec)
        }
    });
    let h = Harness::new(requester, StubChecker::new(&[]), &[], &[]);
    let err = h.scanner().scan("https://t.test/?q=1", None).await.unwrap_err();
    assert!(matches!(err, ScanError::Detector { .. }));
}

#[tokio::test]
async fn failed_baseline_skips_only_that_parameter() {
    let requester = FakeRequester::new(|spec| {
        if param(spec, "a") == Some(MARKER) {
            Probe::Failed("refused".into())
        } else {
            echo(spec)
        }
    });
    let checker = StubChecker::new(&[]);
    let h = Harness::new(requester, checker.clone(), &[(10, &["<a>"])], &[]);
    h.scanner().scan("https://t.test/?a=1&b=2", None).await.unwrap();
    assert_eq!(checker.calls().len(), 1);
}

#[tokio::test]
async fn missing_reflection_sends_no_payloads() {
    let requester = FakeRequester::new(|_| page("static page"));
    let checker = StubChecker::new(&[]);
    let h = Harness::new(requester, checker.clone(), &[(10, &["<a>"])], &[]);
    let report = h.scanner().scan("https://t.test/?q=1", None).await.unwrap();
    assert!(checker.calls().is_empty());
    assert!(report.verdict.is_none());
}

#[tokio::test]
async fn dom_check_runs_once_unless_skipped() {
    let h = Harness::new(FakeRequester::new(echo), StubChecker::new(&[]), &[], &[]);
    let report = h.scanner().scan("https://t.test/?q=1&r=2", None).await.unwrap();
    assert_eq!(*h.dom.pages.lock().unwrap(), 1);
    assert_eq!(report.dom_findings.len(), 1);

    let mut h = Harness::new(FakeRequester::new(echo), StubChecker::new(&[]), &[], &[]);
    h.config.skip_dom = true;
    let report = h.scanner().scan("https://t.test/?q=1", None).await.unwrap();
    assert_eq!(*h.dom.pages.lock().unwrap(), 0);
    assert!(report.dom_findings.is_empty());
}

#[tokio::test]
async fn post_scan_reads_params_from_data() {
    let requester = FakeRequester::new(echo);
    let checker = StubChecker::new(&[("<a>", &[100])]);
    let mut h = Harness::new(requester.clone(), checker, &[(10, &["<a>"])], &["n"]);
    h.config.method = Method::Post;
    let report = h
        .scanner()
        .scan("https://t.test/login?keep=1", Some("user=x&pass=y"))
        .await
        .unwrap();
    assert_eq!(report.findings[0].parameter, "user");
    let seen = requester.seen.lock().unwrap();
    assert!(seen[1..].iter().all(|s| s.url == "https://t.test/login?keep=1"));
    assert!(seen[1..].iter().all(|s| s.method == Method::Post));
}

#[tokio::test]
async fn builtin_pipeline_confirms_unfiltered_reflection() {
    let requester = FakeRequester::new(echo);
    let operator = Arc::new(ScriptedOperator::new(["n"]));
    let collab = Collaborators::builtin(requester, operator.clone());
    let scanner = Scanner::new(
        ScanConfig {
            threads: 2,
            ..Default::default()
        },
        collab,
        WafDetector::new(WafCatalog::builtin().unwrap()),
    );
    let report = scanner.scan("https://t.test/?q=1", None).await.unwrap();
    let verdict = report.verdict.unwrap();
    assert!(verdict.payload.starts_with('<'), "{}", verdict.payload);
    assert_eq!(report.findings[0].efficiency, 100);
    assert_eq!(operator.questions().len(), 1);
}

#[tokio::test]
async fn builtin_pipeline_finds_nothing_when_brackets_are_encoded() {
    let requester = FakeRequester::new(|spec| {
        let value = param(spec, "q").unwrap_or_default();
        page(format!(
            "<p>{}</p>",
            value.replace('<', "&lt;").replace('>', "&gt;")
        ))
    });
    let operator = Arc::new(ScriptedOperator::new(["n"]));
    let collab = Collaborators::builtin(requester, operator.clone());
    let scanner = Scanner::new(
        ScanConfig::default(),
        collab,
        WafDetector::new(WafCatalog::builtin().unwrap()),
    );
    let report = scanner.scan("https://t.test/?q=1", None).await.unwrap();
    assert!(report.verdict.is_none());
    assert!(report.findings.is_empty());
    assert!(operator.questions().is_empty());
}
