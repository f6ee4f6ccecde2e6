use serde::Serialize;

use crate::scan::{Finding, ScanReport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn infer_format_from_path(path: &str) -> Option<OutputFormat> {
    let lower = path.trim().to_lowercase();
    if lower.ends_with(".json") {
        return Some(OutputFormat::Json);
    }
    if lower.ends_with(".txt") {
        return Some(OutputFormat::Text);
    }
    None
}

#[derive(Clone, Debug, Serialize)]
pub struct ReportRecord {
    pub target: String,
    pub waf: Option<String>,
    pub vulnerable: bool,
    pub payload: Option<String>,
    pub findings: Vec<Finding>,
    pub dom: Vec<String>,
}

impl From<&ScanReport> for ReportRecord {
    fn from(report: &ScanReport) -> Self {
        Self {
            target: report
                .verdict
                .as_ref()
                .map(|v| v.target.clone())
                .unwrap_or_else(|| report.target.clone()),
            waf: report.waf.clone(),
            vulnerable: report.verdict.is_some() || !report.findings.is_empty(),
            payload: report.verdict.as_ref().map(|v| v.payload.clone()),
            findings: report.findings.clone(),
            dom: report.dom_findings.clone(),
        }
    }
}

pub fn render_text(record: &ReportRecord) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&format!("target: {}\n", record.target));
    out.push_str(&format!(
        "waf: {}\n",
        record.waf.as_deref().unwrap_or("none")
    ));
    for f in &record.findings {
        out.push_str(&format!(
            "{}\t{}\tefficiency={}\tconfidence={}\n",
            f.parameter, f.payload, f.efficiency, f.confidence
        ));
    }
    for line in &record.dom {
        out.push_str(&format!("dom: {line}\n"));
    }
    out.into_bytes()
}

pub fn render_json(record: &ReportRecord) -> Vec<u8> {
    serde_json::to_vec_pretty(record).unwrap_or_else(|_| b"{}\n".to_vec())
}

pub fn render(record: &ReportRecord, format: OutputFormat) -> Vec<u8> {
    match format {
        OutputFormat::Text => render_text(record),
        OutputFormat::Json => render_json(record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanVerdict;

    fn report() -> ScanReport {
        ScanReport {
            target: "https://t.test/?q=1".to_string(),
            waf: Some("ModSecurity".to_string()),
            dom_findings: vec![],
            findings: vec![Finding {
                parameter: "q".to_string(),
                payload: "<svg onload=confirm()>".to_string(),
                efficiency: 100,
                confidence: 10,
            }],
            verdict: Some(ScanVerdict {
                target: "https://t.test/?q=1".to_string(),
                payload: "<svg onload=confirm()>".to_string(),
            }),
        }
    }

    #[test]
    fn formats_parse_and_infer() {
        assert_eq!(OutputFormat::parse("TXT"), Some(OutputFormat::Text));
        assert_eq!(OutputFormat::parse("xml"), None);
        assert_eq!(infer_format_from_path("out.JSON"), Some(OutputFormat::Json));
        assert_eq!(infer_format_from_path("out.bin"), None);
    }

    #[test]
    fn json_report_carries_verdict() {
        let record = ReportRecord::from(&report());
        let value: serde_json::Value = serde_json::from_slice(&render_json(&record)).unwrap();
        assert_eq!(value["vulnerable"], true);
        assert_eq!(value["payload"], "<svg onload=confirm()>");
        assert_eq!(value["findings"][0]["parameter"], "q");
    }

    #[test]
    fn text_report_lists_findings() {
        let record = ReportRecord::from(&report());
        let text = String::from_utf8(render_text(&record)).unwrap();
        assert!(text.contains("waf: ModSecurity"));
        assert!(text.contains("q\t<svg onload=confirm()>\tefficiency=100"));
    }
}
