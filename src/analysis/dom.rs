use regex::Regex;

use super::DomAnalyzer;

const SOURCES: &str = r"\b(?:document\.(?:URL|documentURI|URLUnencoded|baseURI|cookie|referrer)|location\.(?:href|search|hash|pathname)|window\.name|history\.(?:pushState|replaceState)|(?:local|session)Storage)\b";
const SINKS: &str = r"\b(?:eval|evaluate|execCommand|assign|navigate|getResponseHeader|open|showModalDialog|Function|set(?:Timeout|Interval|Immediate)|execScript|crypto\.generateCRMFRequest|ScriptElement\.(?:src|text|textContent|innerText)|document\.(?:write|writeln)|innerHTML|outerHTML|insertAdjacentHTML|Range\.createContextualFragment|(?:document|window)\.location)\b";

/// Flags script lines that read a DOM source or write to a DOM sink.
///
/// Variables assigned from a source are tracked and treated as sources on
/// later lines of the same script.
pub struct SinkDomAnalyzer {
    scripts: Option<Regex>,
    sources: Option<Regex>,
    sinks: Option<Regex>,
    assignment: Option<Regex>,
}

impl Default for SinkDomAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkDomAnalyzer {
    pub fn new() -> Self {
        Self {
            scripts: Regex::new(r"(?is)<script[^>]*>(.*?)</script>").ok(),
            sources: Regex::new(SOURCES).ok(),
            sinks: Regex::new(SINKS).ok(),
            assignment: Regex::new(r"(?:var|let|const)?\s*([A-Za-z_$][\w$]*)\s*=[^=]").ok(),
        }
    }

    fn scan_script(&self, script: &str, line_no: &mut usize, out: &mut Vec<String>) {
        let (Some(sources), Some(sinks)) = (&self.sources, &self.sinks) else {
            return;
        };
        let mut tainted: Vec<String> = Vec::new();
        for line in script.lines() {
            *line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut source = sources.is_match(trimmed);
            if !source {
                source = tainted.iter().any(|v| contains_word(trimmed, v));
            }
            let sink = sinks.is_match(trimmed);
            if source {
                if let Some(caps) = self.assignment.as_ref().and_then(|re| re.captures(trimmed)) {
                    if let Some(name) = caps.get(1) {
                        if !tainted.iter().any(|t| t == name.as_str()) {
                            tainted.push(name.as_str().to_string());
                        }
                    }
                }
            }
            if source || sink {
                let kind = match (source, sink) {
                    (true, true) => "source+sink",
                    (true, false) => "source",
                    _ => "sink",
                };
                out.push(format!("{:<3} [{kind}] {trimmed}", *line_no));
            }
        }
    }
}

fn contains_word(line: &str, word: &str) -> bool {
    line.match_indices(word).any(|(idx, _)| {
        let before = line[..idx].chars().next_back();
        let after = line[idx + word.len()..].chars().next();
        let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
        !before.map(is_ident).unwrap_or(false) && !after.map(is_ident).unwrap_or(false)
    })
}

impl DomAnalyzer for SinkDomAnalyzer {
    fn analyze(&self, text: &str) -> Vec<String> {
        let Some(scripts) = &self.scripts else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut line_no = 0usize;
        for caps in scripts.captures_iter(text) {
            if let Some(body) = caps.get(1) {
                self.scan_script(body.as_str(), &mut line_no, &mut out);
            }
        }
        // a lone source is only interesting when something in the page can sink it
        if out.iter().all(|l| l.contains("[source]")) {
            out.clear();
        }
        out
    }
}
