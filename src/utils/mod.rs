use crate::requester::{Headers, Method, Params};

pub fn has_scheme(target: &str) -> bool {
    let lower = target.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Request URL for a target: the query string is stripped for GET scans.
pub fn get_url(target: &str, is_get: bool) -> String {
    if is_get {
        target.split('?').next().unwrap_or(target).to_string()
    } else {
        target.to_string()
    }
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .unwrap_or(spaced)
}

pub fn parse_query(raw: &str) -> Params {
    raw.trim_start_matches('?')
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(part), String::new()),
        })
        .collect()
}

fn path_segments(target: &str) -> Params {
    let path = match reqwest::Url::parse(target) {
        Ok(url) => url.path().to_string(),
        Err(_) => target
            .splitn(4, '/')
            .nth(3)
            .map(|p| format!("/{}", p.split('?').next().unwrap_or(p)))
            .unwrap_or_default(),
    };
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| (s, s))
        .collect()
}

fn json_params(raw: &str) -> Option<Params> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .or_else(|_| serde_json::from_str(&raw.replace('\'', "\"")))
        .ok()?;
    let object = value.as_object()?;
    Some(
        object
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k.clone(), s.clone()),
                other => (k.clone(), other.to_string()),
            })
            .collect(),
    )
}

/// Extracts the parameters to test.
///
/// Path mode treats each path segment as a parameter named after itself. A
/// query string on the target wins over `data`; `data` is read as a JSON
/// object when it parses as one and as `a=1&b=2` pairs otherwise.
pub fn get_params(target: &str, data: Option<&str>, method: Method, path_mode: bool) -> Params {
    if path_mode {
        return path_segments(target);
    }
    if let Some((_, query)) = target.split_once('?') {
        if method.is_get() || data.map(str::trim).unwrap_or_default().is_empty() {
            if query.contains('=') {
                return parse_query(query);
            }
        }
    }
    match data.map(str::trim).filter(|d| !d.is_empty()) {
        Some(raw) => json_params(raw).unwrap_or_else(|| parse_query(raw)),
        None => Params::new(),
    }
}

/// Parses `Name: value` lines; a literal `\n` also separates entries.
pub fn parse_headers(raw: &str) -> Result<Headers, String> {
    let mut out = Headers::new();
    for line in raw.replace("\\n", "\n").lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("invalid header '{line}', expected 'Name: value'"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("invalid header '{line}', missing name"));
        }
        out.insert(name.to_string(), value.trim().trim_end_matches(',').to_string());
    }
    Ok(out)
}
