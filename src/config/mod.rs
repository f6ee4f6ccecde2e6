use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConfigFile {
    pub url: Option<String>,
    pub data: Option<String>,
    #[serde(alias = "header")]
    pub headers: Option<String>,
    pub encode: Option<String>,
    pub json: Option<bool>,
    pub path: Option<bool>,
    pub delay: Option<u64>,
    pub timeout: Option<u64>,
    pub threads: Option<usize>,
    pub proxy: Option<String>,
    pub verify_tls: Option<bool>,
    pub follow_redirects: Option<bool>,
    pub skip: Option<bool>,
    pub skip_dom: Option<bool>,
    pub waf_signatures: Option<String>,
    pub ban_backoff: Option<u64>,
    pub console_log_level: Option<String>,
    pub file_log_level: Option<String>,
    pub log_file: Option<String>,
    pub output: Option<String>,
    pub output_format: Option<String>,
    pub no_color: Option<bool>,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
        .or_else(|| {
            let drive = env::var_os("HOMEDRIVE")?;
            let path = env::var_os("HOMEPATH")?;
            Some(PathBuf::from(drive).join(path))
        })
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(home_dir()?.join(".xsprobe").join("config.yml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn expand_tilde_string(path: &str) -> String {
    expand_tilde(path).to_string_lossy().to_string()
}

pub fn load_config(path: &PathBuf, allow_missing: bool) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(ConfigFile::default()),
        Ok(contents) => serde_yaml::from_str::<ConfigFile>(&contents)
            .map_err(|e| format!("failed to parse config '{}': {e}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Ok(ConfigFile::default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("config file not found '{}'", path.display()))
        }
        Err(e) => Err(format!("failed to read config '{}': {e}", path.display())),
    }
}

fn default_config_yaml() -> String {
    r#"# xsprobe config
#
# Location (default):
#   ~/.xsprobe/config.yml
#
# Command-line flags override every value set here.

# Target (optional, usually passed with -u)
# url: https://example.com/search?q=query
# data: "user=admin&comment=hi"

# Request shape
json: false
path: false
# encode: base64
# headers: "Cookie: session=abc\nX-Forwarded-For: 127.0.0.1"

# Performance
delay: 0
timeout: 10
threads: 10

# HTTP (optional)
# proxy: http://127.0.0.1:8080
verify_tls: false
follow_redirects: true

# Behaviour
skip: false
skip_dom: false
# waf_signatures: ./waf_signatures.json
# Seconds to wait after the target starts dropping connections.
ban_backoff: 600

# Logging
console_log_level: info
# file_log_level: debug
# log_file: ./xsprobe.log

# Output (optional)
# output: ./report.json
# output_format: json
no_color: false
"#
    .to_string()
}

pub fn ensure_default_config_file(path: &PathBuf) -> Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("invalid config path '{}'", path.display()))?;
    std::fs::create_dir_all(parent).map_err(|e| {
        format!(
            "failed to create config directory '{}': {e}",
            parent.display()
        )
    })?;
    let contents = default_config_yaml();
    std::fs::write(path, contents)
        .map_err(|e| format!("failed to write config file '{}': {e}", path.display()))?;
    Ok(())
}
