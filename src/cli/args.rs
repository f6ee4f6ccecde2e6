use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "xsprobe",
    version,
    about = "reflected XSS probe-and-confirm scanner",
    long_about = "xsprobe finds where a parameter is reflected, works out which characters survive the target's filtering, and confirms context-aware payloads against the live page.\n\nExamples:\n  xsprobe -u 'https://target.tld/search?q=query'\n  xsprobe -u https://target.tld/login --data 'user=a&pass=b'\n  xsprobe -u https://target.tld/api --data '{\"q\":\"x\"}' --json\n  xsprobe -u https://target.tld/blog/post --path\n\nTip: Use --config to persist scan settings and keep CLI invocations short."
)]
pub struct CliArgs {
    #[arg(
        short = 'u',
        long = "u",
        visible_alias = "url",
        value_name = "URL",
        help_heading = "Input",
        help = "Target URL; the scheme is probed when omitted."
    )]
    pub url: Option<String>,

    #[arg(
        long = "data",
        value_name = "DATA",
        help_heading = "Input",
        help = "POST body (form pairs or JSON). Switches the scan to POST."
    )]
    pub data: Option<String>,

    #[arg(
        short = 'C',
        long = "cfg",
        visible_alias = "config",
        value_name = "FILE",
        help_heading = "Input",
        help = "Path to config file (defaults to ~/.xsprobe/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        short = 'e',
        long = "enc",
        visible_alias = "encode",
        value_name = "NAME",
        help_heading = "Request",
        help = "Encode payloads before sending (base64)."
    )]
    pub encode: Option<String>,

    #[arg(
        long = "json",
        help_heading = "Request",
        help = "Send POST data as a JSON body."
    )]
    pub json: bool,

    #[arg(
        long = "path",
        help_heading = "Request",
        help = "Inject into URL path segments instead of parameters."
    )]
    pub path: bool,

    #[arg(
        long = "hd",
        visible_alias = "headers",
        value_name = "HEADERS",
        help_heading = "Request",
        help = "Extra headers, 'Name: value' separated by newlines or \\n. A User-Agent of '$' is randomized."
    )]
    pub headers: Option<String>,

    #[arg(
        long = "proxy",
        value_name = "URL",
        help_heading = "Request",
        help = "Route requests through a proxy."
    )]
    pub proxy: Option<String>,

    #[arg(
        long = "verify-tls",
        num_args = 0..=1,
        default_missing_value = "true",
        help_heading = "Request",
        help = "Verify TLS certificates and hostnames."
    )]
    pub verify_tls: Option<bool>,

    #[arg(
        long = "fr",
        visible_alias = "follow-redirects",
        num_args = 0..=1,
        default_missing_value = "true",
        help_heading = "Request",
        help = "Follow HTTP redirects."
    )]
    pub follow_redirects: Option<bool>,

    #[arg(
        short = 'd',
        long = "dl",
        visible_alias = "delay",
        value_name = "SECONDS",
        help_heading = "Performance",
        help = "Delay before every request."
    )]
    pub delay: Option<u64>,

    #[arg(
        long = "to",
        visible_alias = "timeout",
        value_name = "SECONDS",
        help_heading = "Performance",
        help = "Per-request timeout."
    )]
    pub timeout: Option<u64>,

    #[arg(
        short = 't',
        long = "th",
        visible_alias = "threads",
        value_name = "N",
        help_heading = "Performance",
        help = "Payloads confirmed concurrently."
    )]
    pub threads: Option<usize>,

    #[arg(
        long = "bb",
        visible_alias = "ban-backoff",
        value_name = "SECONDS",
        help_heading = "Performance",
        help = "Wait after the target starts dropping connections."
    )]
    pub ban_backoff: Option<u64>,

    #[arg(
        long = "skip",
        help_heading = "Scan",
        help = "Never prompt; keep scanning after a confirmed payload."
    )]
    pub skip: bool,

    #[arg(
        long = "skip-dom",
        help_heading = "Scan",
        help = "Skip the DOM source/sink check."
    )]
    pub skip_dom: bool,

    #[arg(
        long = "ws",
        visible_alias = "waf-signatures",
        value_name = "FILE",
        help_heading = "Scan",
        help = "Load WAF signatures from a JSON file instead of the built-in set."
    )]
    pub waf_signatures: Option<String>,

    #[arg(
        long = "cll",
        visible_alias = "console-log-level",
        value_name = "LEVEL",
        help_heading = "Output",
        help = "Console log level (trace, debug, info, warn, error)."
    )]
    pub console_log_level: Option<String>,

    #[arg(
        long = "fll",
        visible_alias = "file-log-level",
        value_name = "LEVEL",
        help_heading = "Output",
        help = "Log level for --log-file (defaults to debug)."
    )]
    pub file_log_level: Option<String>,

    #[arg(
        long = "lf",
        visible_alias = "log-file",
        value_name = "FILE",
        help_heading = "Output",
        help = "Also write logs to a file."
    )]
    pub log_file: Option<String>,

    #[arg(
        short = 'o',
        long = "out",
        visible_alias = "output",
        value_name = "FILE",
        help_heading = "Output",
        help = "Write the scan report to a file."
    )]
    pub output: Option<String>,

    #[arg(
        long = "of",
        visible_alias = "output-format",
        value_name = "FORMAT",
        help_heading = "Output",
        help = "Report format: text or json (inferred from --output when omitted)."
    )]
    pub output_format: Option<String>,

    #[arg(
        long = "nc",
        visible_alias = "no-color",
        action = ArgAction::SetTrue,
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,
}
