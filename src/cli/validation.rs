use crate::cli::args::CliArgs;

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if let Some(raw) = args.encode.as_deref() {
        if crate::transform::encoder_by_name(raw).is_none() {
            return Err(format!(
                "invalid --encode '{raw}', expected one of: {}",
                crate::transform::ENCODER_NAMES.join(", ")
            ));
        }
    }
    if let Some(raw) = args.headers.as_deref() {
        crate::utils::parse_headers(raw).map_err(|e| format!("invalid --headers: {e}"))?;
    }
    if let Some(threads) = args.threads {
        if threads == 0 {
            return Err("invalid threads, expected positive integer".to_string());
        }
    }
    if let Some(timeout) = args.timeout {
        if timeout == 0 {
            return Err("invalid timeout, expected positive integer".to_string());
        }
    }
    if args.json && args.data.is_none() {
        return Err("--json requires --data".to_string());
    }
    if args.json && args.path {
        return Err("--json and --path cannot be combined".to_string());
    }
    for (flag, level) in [
        ("--console-log-level", args.console_log_level.as_deref()),
        ("--file-log-level", args.file_log_level.as_deref()),
    ] {
        if let Some(raw) = level {
            crate::logging::parse_level(raw).map_err(|e| format!("invalid {flag} '{raw}': {e}"))?;
        }
    }
    if let Some(raw) = args.output_format.as_deref() {
        if crate::output::OutputFormat::parse(raw).is_none() {
            return Err(format!("invalid --output-format '{raw}', expected text or json"));
        }
    }
    Ok(())
}
