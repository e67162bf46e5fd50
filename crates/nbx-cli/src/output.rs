use atty::Stream;
use color_eyre::Result;
use nbx_core::{CommandGroup, CommandInfo, CommandStatus, ExecutionOutcome};
use serde_json::Value;

use crate::style::Style;

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub quiet: bool,
    pub json: bool,
    pub no_color: bool,
}

pub fn emit_output(opts: &OutputOptions, info: CommandInfo, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();
    let style = Style::new(opts.no_color, atty::is(Stream::Stdout));

    if opts.json {
        let payload = nbx_core::to_json_response(info, outcome, code);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    if let CommandStatus::Ok = outcome.status {
        // exec output belongs to the tool, even under --quiet
        if info.group == CommandGroup::Exec {
            if let Some(stdout) = outcome.details.get("stdout").and_then(Value::as_str) {
                if !stdout.is_empty() {
                    println!("{stdout}");
                }
            }
            return Ok(code);
        }
        if opts.quiet {
            return Ok(code);
        }
        let message = nbx_core::format_status_message(info, &outcome.message);
        println!("{}", style.status(&outcome.status, &message));
        for line in render_body(&style, info, &outcome.details) {
            println!("{line}");
        }
        if let Some(hint) = hint_from_details(&outcome.details) {
            println!("{}", style.info(&format!("Tip: {hint}")));
        }
    } else {
        let message = nbx_core::format_status_message(info, &outcome.message);
        eprintln!("{}", style.status(&outcome.status, &message));
        eprintln!();
        eprintln!("Why:");
        for reason in collect_why_bullets(&outcome.details, &outcome.message) {
            eprintln!("  • {reason}");
        }
        let fixes = collect_fix_bullets(&outcome.details);
        if !fixes.is_empty() {
            eprintln!();
            eprintln!("Fix:");
            for fix in fixes {
                eprintln!("{}", style.info(&format!("  • {fix}")));
            }
        }
        if let Some(stdout) = outcome.details.get("stdout").and_then(Value::as_str) {
            if !stdout.trim().is_empty() {
                eprintln!();
                eprintln!("{}", style.muted(stdout));
            }
        }
    }

    Ok(code)
}

fn render_body(style: &Style, info: CommandInfo, details: &Value) -> Vec<String> {
    match info.group {
        CommandGroup::Versions => details
            .get("versions")
            .and_then(Value::as_array)
            .map(|versions| {
                let bundled = details.get("bundled").and_then(Value::as_str);
                versions
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|version| {
                        if Some(version) == bundled {
                            format!("  {version} {}", style.muted("(bundled)"))
                        } else {
                            format!("  {version}")
                        }
                    })
                    .collect()
            })
            .unwrap_or_default(),
        CommandGroup::Info => render_info(style, details),
        CommandGroup::Install => details
            .get("packages")
            .and_then(Value::as_array)
            .filter(|packages| !packages.is_empty())
            .map(|packages| {
                let names: Vec<&str> = packages.iter().filter_map(Value::as_str).collect();
                vec![format!("  packages: {}", names.join(", "))]
            })
            .unwrap_or_default(),
        CommandGroup::Exec | CommandGroup::Use => Vec::new(),
    }
}

fn render_info(style: &Style, details: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    let mut row = |label: &str, value: String| {
        lines.push(format!("  {:<18}{}", style.label(label), value));
    };
    let text = |value: Option<&Value>| {
        value
            .and_then(Value::as_str)
            .map_or_else(|| "-".to_string(), ToString::to_string)
    };

    row("configured:", text(details.get("configured_path")));
    if let Some(runtime) = details.get("runtime").filter(|runtime| runtime.is_object()) {
        row("runtime:", text(runtime.get("path")));
        row("source:", text(runtime.get("source")));
        row("version:", text(runtime.get("version")));
        if let Some(tools) = runtime.get("tools").and_then(Value::as_object) {
            for (name, path) in tools {
                row(format!("{name}:").as_str(), text(Some(path)));
            }
        }
    }
    if let Some(bundled) = details.get("bundled") {
        row("bundled target:", text(bundled.get("target")));
        row("bundled version:", text(bundled.get("installed_version")));
        let ok = bundled
            .get("integrity_ok")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        row("up to date:", if ok { "yes" } else { "no" }.to_string());
    }
    lines
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

fn collect_why_bullets(details: &Value, fallback: &str) -> Vec<String> {
    let mut bullets = Vec::new();
    if let Some(reason) = details.get("reason").and_then(Value::as_str) {
        push_unique(
            &mut bullets,
            reason_display(reason).unwrap_or(reason).to_string(),
        );
    }
    if let Some(package) = details.get("package").and_then(Value::as_str) {
        push_unique(&mut bullets, format!("Package: {package}"));
    }
    if let Some(error) = details.get("error").and_then(Value::as_str) {
        push_unique(&mut bullets, error.to_string());
    }
    if bullets.is_empty() {
        bullets.push(fallback.to_string());
    }
    bullets
}

fn collect_fix_bullets(details: &Value) -> Vec<String> {
    let mut fixes = Vec::new();
    if let Some(hint) = hint_from_details(details) {
        push_unique(&mut fixes, hint.to_string());
    }
    if fixes.is_empty() {
        fixes.push("Re-run with -v for details or --help for usage.".to_string());
    }
    fixes
}

fn push_unique(vec: &mut Vec<String>, text: impl Into<String>) {
    let entry = text.into();
    if entry.trim().is_empty() {
        return;
    }
    if !vec.iter().any(|existing| existing == &entry) {
        vec.push(entry);
    }
}

fn reason_display(code: &str) -> Option<&'static str> {
    match code {
        "offline" => Some("Network access is disabled for this invocation."),
        "missing_runtime" => Some("Neither a configured nor a bundled Node.js runtime works."),
        "invalid_runtime" => Some("The given path does not answer `--version` like node does."),
        "tool_not_found" => Some("The runtime directory lacks the requested tool."),
        "install_busy" => Some("Another nbx install holds the install lock."),
        "download_failed" => Some("Downloading or unpacking Node.js failed."),
        "package_failed" => Some("An npm package install exited unsuccessfully."),
        _ => None,
    }
}
