use std::{fmt::Write, path::Path};

use anyhow::Result;

use runbox_config::{Severity, ValidationResult, validate};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Validate `path` (or the discovered config file) and print the report.
/// Exits with status 1 when any error was found.
pub fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate(path);
    eprint!("{}", render(&result, verbose));

    if result.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

fn render(result: &ValidationResult, verbose: bool) -> String {
    let mut out = String::new();

    // Print which file we're checking
    if let Some(ref path) = result.config_path {
        let _ = writeln!(out, "Checking {}\n", path.display());
    } else {
        let _ = writeln!(out, "No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            let _ = writeln!(out, "  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            let _ = writeln!(out, "  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        out.push('\n');
    }

    if errors == 0 && warnings == 0 {
        out.push_str("No issues found.\n");
    } else {
        let _ = writeln!(out, "{errors} error(s), {warnings} warning(s)");
    }
    out
}
