use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clap::{error::ErrorKind, CommandFactory, Parser};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::analysis::ConsoleOperator;
use crate::cli::args::CliArgs;
use crate::cli::validation;
use crate::config::{self, ConfigFile};
use crate::logging::{self, LogOptions};
use crate::output::{self, OutputFormat, ReportRecord};
use crate::runner::{self, Options, Runner, RunnerError};
use crate::scan::ScanReport;

fn print_banner() {
    const BANNER: &str = r#"
                                  __
   _  ___________  _________  / /_  ___
  | |/_/ ___/ __ \/ ___/ __ \/ __ \/ _ \
 _>  <(__  ) /_/ / /  / /_/ / /_/ /  __/
/_/|_/____/ .___/_/   \____/_.___/\___/
         /_/
       v0.1.0 - reflected XSS probe-and-confirm scanner
    "#;
    print!("{}", BANNER.cyan());
    println!();
}

fn format_kv_line(label: &str, value: &str) {
    println!(":: {:<10}: {}", label, value);
}

fn render_custom_help() -> String {
    let cmd = CliArgs::command();
    let mut out = String::new();

    out.push_str(cmd.get_name());
    if let Some(version) = cmd.get_version() {
        out.push(' ');
        out.push_str(version);
    }
    out.push('\n');
    if let Some(long_about) = cmd.get_long_about() {
        out.push('\n');
        out.push_str(&long_about.to_string());
        out.push('\n');
    }
    out.push_str("\nUsage: ");
    out.push_str(cmd.get_name());
    out.push_str(" [OPTIONS]\n\n");

    let mut sections: Vec<(String, Vec<&clap::Arg>)> = Vec::new();
    let mut section_idx: HashMap<String, usize> = HashMap::new();
    for arg in cmd.get_arguments() {
        if arg.is_hide_set() {
            continue;
        }
        let heading = arg.get_help_heading().unwrap_or("Options").to_string();
        let idx = *section_idx.entry(heading.clone()).or_insert_with(|| {
            sections.push((heading, Vec::new()));
            sections.len() - 1
        });
        sections[idx].1.push(arg);
    }

    for (heading, args) in sections {
        out.push_str(&heading);
        out.push_str(":\n");
        for arg in args {
            let mut parts: Vec<String> = Vec::new();
            if let Some(short) = arg.get_short() {
                parts.push(format!("-{short}"));
            }
            if let Some(long) = arg.get_long() {
                parts.push(format!("--{long}"));
            }
            for alias in arg.get_visible_aliases().unwrap_or_default() {
                let rendered = format!("--{alias}");
                if !parts.contains(&rendered) {
                    parts.push(rendered);
                }
            }
            let mut flags = parts.join(", ");
            if arg.get_action().takes_values() {
                let value_name = arg
                    .get_value_names()
                    .and_then(|names| names.first())
                    .map(|name| name.as_str())
                    .unwrap_or("VALUE");
                let optional = arg.get_num_args().map(|r| r.min_values()).unwrap_or(1) == 0;
                if optional {
                    flags.push_str(&format!(" [<{value_name}>]"));
                } else {
                    flags.push_str(&format!(" <{value_name}>"));
                }
            }
            out.push_str("  ");
            out.push_str(&flags);
            out.push('\n');
            if let Some(help) = arg.get_help() {
                let help = help.to_string();
                if !help.trim().is_empty() {
                    out.push_str("          ");
                    out.push_str(help.trim());
                    out.push('\n');
                }
            }
            out.push('\n');
        }
    }
    out
}

#[derive(Debug)]
struct RunConfig {
    options: Options,
    log: LogOptions,
    output: Option<String>,
    output_format: Option<OutputFormat>,
    no_color: bool,
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;

    let no_color = args.no_color || cfg.no_color.unwrap_or(false);
    let url = args
        .url
        .or(cfg.url)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| "no target provided, use -u/--url".to_string())?;
    let data = args.data.or(cfg.data).filter(|d| !d.trim().is_empty());

    let headers_raw = args.headers.or(cfg.headers);
    let headers = runner::parse_headers_option(headers_raw.as_deref())
        .map_err(|e| format!("invalid headers: {e}"))?;

    let encode = args.encode.or(cfg.encode);
    let json = args.json || cfg.json.unwrap_or(false);
    let path = args.path || cfg.path.unwrap_or(false);
    if json && data.is_none() {
        return Err("json mode requires --data".to_string());
    }

    let delay_seconds = args.delay.or(cfg.delay).unwrap_or(0);
    let timeout_seconds = args.timeout.or(cfg.timeout).unwrap_or(10);
    let threads = args.threads.or(cfg.threads).unwrap_or(10);
    if threads == 0 {
        return Err("invalid threads, expected positive integer".to_string());
    }
    let ban_backoff_seconds = args.ban_backoff.or(cfg.ban_backoff).unwrap_or(600);

    let proxy = args.proxy.or(cfg.proxy).filter(|p| !p.trim().is_empty());
    let verify_tls = args.verify_tls.or(cfg.verify_tls).unwrap_or(false);
    let follow_redirects = args
        .follow_redirects
        .or(cfg.follow_redirects)
        .unwrap_or(true);

    let skip = args.skip || cfg.skip.unwrap_or(false);
    let skip_dom = args.skip_dom || cfg.skip_dom.unwrap_or(false);
    let waf_signatures = args
        .waf_signatures
        .or(cfg.waf_signatures)
        .map(|p| config::expand_tilde_string(&p));

    let log = LogOptions {
        console_level: args
            .console_log_level
            .or(cfg.console_log_level)
            .unwrap_or_else(|| logging::DEFAULT_CONSOLE_LEVEL.to_string()),
        file_level: args
            .file_log_level
            .or(cfg.file_log_level)
            .unwrap_or_else(|| logging::DEFAULT_FILE_LEVEL.to_string()),
        log_file: args
            .log_file
            .or(cfg.log_file)
            .map(|p| config::expand_tilde_string(&p)),
        no_color,
    };
    logging::parse_level(&log.console_level)
        .map_err(|e| format!("invalid console log level '{}': {e}", log.console_level))?;
    logging::parse_level(&log.file_level)
        .map_err(|e| format!("invalid file log level '{}': {e}", log.file_level))?;

    let output = args
        .output
        .or(cfg.output)
        .map(|p| config::expand_tilde_string(&p));
    let output_format = match args.output_format.or(cfg.output_format) {
        Some(raw) => Some(
            OutputFormat::parse(&raw)
                .ok_or_else(|| format!("invalid output format '{raw}', expected text or json"))?,
        ),
        None => output.as_deref().and_then(output::infer_format_from_path),
    };

    Ok(RunConfig {
        options: Options {
            url,
            data,
            headers,
            json,
            path,
            encode,
            delay_seconds,
            timeout_seconds,
            threads,
            proxy,
            verify_tls,
            follow_redirects,
            skip,
            skip_dom,
            waf_signatures,
            ban_backoff_seconds,
        },
        log,
        output,
        output_format,
        no_color,
    })
}

fn print_settings(run: &RunConfig) {
    let o = &run.options;
    let method = match (&o.data, o.json) {
        (None, _) => "GET",
        (Some(_), false) => "POST (form)",
        (Some(_), true) => "POST (json)",
    };
    format_kv_line("Target", &o.url);
    format_kv_line("Method", method);
    if o.path {
        format_kv_line("Inject", "path segments");
    }
    if let Some(enc) = o.encode.as_deref() {
        format_kv_line("Encoding", enc);
    }
    format_kv_line("Threads", &o.threads.to_string());
    format_kv_line("Timeout", &format!("{}s", o.timeout_seconds));
    if o.delay_seconds > 0 {
        format_kv_line("Delay", &format!("{}s", o.delay_seconds));
    }
    if let Some(proxy) = o.proxy.as_deref() {
        format_kv_line("Proxy", proxy);
    }
    println!();
}

fn print_report(report: &ScanReport) {
    if let Some(waf) = report.waf.as_deref() {
        format_kv_line("WAF", &waf.red().to_string());
    } else {
        format_kv_line("WAF", &"offline".green().to_string());
    }
    for line in &report.dom_findings {
        println!("   {}", line.yellow());
    }
    for finding in &report.findings {
        println!("{}", "-".repeat(60).red());
        format_kv_line("Parameter", &finding.parameter);
        format_kv_line("Payload", &finding.payload.green().bold().to_string());
        format_kv_line("Efficiency", &finding.efficiency.to_string());
        format_kv_line("Confidence", &finding.confidence.to_string());
    }
    match report.verdict.as_ref() {
        Some(verdict) => {
            println!();
            format_kv_line("Vulnerable", &verdict.target.green().to_string());
        }
        None if report.findings.is_empty() => {
            println!();
            format_kv_line("Result", "no payload confirmed");
        }
        None => {}
    }
}

fn write_output(run: &RunConfig, report: &ScanReport) -> Result<(), String> {
    let Some(path) = run.output.as_deref() else {
        return Ok(());
    };
    let format = run.output_format.unwrap_or(OutputFormat::Text);
    let record = ReportRecord::from(report);
    std::fs::write(path, output::render(&record, format))
        .map_err(|e| format!("failed to write output '{path}': {e}"))?;
    format_kv_line("Output", path);
    Ok(())
}

fn build_progress_bar() -> Result<ProgressBar, String> {
    let pb = ProgressBar::new(1);
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(200));
    pb.set_style(
        ProgressStyle::with_template(
            ":: Progress: [{pos}/{len}] :: {per_sec} :: Duration: [{elapsed_precise}] :: {msg}",
        )
        .map_err(|e| format!("failed to build progress bar style: {e}"))?
        .progress_chars(r#"#>-"#),
    );
    Ok(pb)
}

/// Drives the scan until it ends or `interrupt` fires; an interrupt is an error.
async fn run_until_interrupted<S, I>(
    scan: S,
    interrupt: I,
    pb: &ProgressBar,
) -> Result<ScanReport, String>
where
    S: Future<Output = Result<ScanReport, RunnerError>>,
    I: Future<Output = ()>,
{
    let outcome = tokio::select! {
        res = scan => res.map_err(|e| e.to_string()),
        _ = interrupt => {
            tracing::warn!("Interrupted, stopping scan");
            Err("interrupted".to_string())
        }
    };
    pb.finish_and_clear();
    outcome
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    if run.no_color {
        colored::control::set_override(false);
    }
    logging::init(&run.log)?;
    print_banner();
    print_settings(&run);

    let runner = Runner::new(run.options.clone()).map_err(|e| e.to_string())?;
    let pb = build_progress_bar()?;

    let operator = Arc::new(ConsoleOperator::new(pb.clone()));
    let report = run_until_interrupted(
        runner.run(operator, pb.clone()),
        async {
            let _ = tokio::signal::ctrl_c().await;
        },
        &pb,
    )
    .await?;
    print_report(&report);
    write_output(&run, &report)?;
    Ok(())
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp => {
                print!("{}", render_custom_help());
                return Ok(());
            }
            ErrorKind::DisplayVersion => {
                let cmd = CliArgs::command();
                print!("{}", cmd.render_version());
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    let cfg = match args.config.clone().map(|p| config::expand_tilde(&p)) {
        Some(path) => config::load_config(&path, false)?,
        None => match config::default_config_path() {
            Some(path) => {
                config::ensure_default_config_file(&path)?;
                config::load_config(&path, true)?
            }
            None => ConfigFile::default(),
        },
    };

    let run = build_run_config(args, cfg)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    rt.block_on(run_async(run))?;
    Ok(())
}
