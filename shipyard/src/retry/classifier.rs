//! Failure classification
//!
//! Turns a [`DeployError`] into a category, a retry decision, a one-line
//! summary and an optional suggested fix. Compiler output is scanned line by
//! line for diagnostics.

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Longest summary kept on an attempt
const MAX_SUMMARY_CHARS: usize = 240;

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Source does not parse
    Syntax,

    /// Source parses but does not type-check
    Type,

    /// Unknown identifier, module or package
    Import,

    /// Bundler build failure
    Build,

    /// Network failure or deadline expiry
    Transport,

    /// Execution host rejected an install
    Install,

    /// Bundler did not finish within the poll budget
    Timeout,

    /// Malformed response from a collaborator
    Protocol,

    /// Another execution holds the project
    Conflict,

    /// Local configuration, storage or state-machine problem
    Internal,

    Unknown,
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One compiler diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,

    /// Bracketed code such as `M0096`
    pub code: Option<String>,

    /// `file:line.col-line.col` prefix, when present
    pub location: Option<String>,
    pub message: String,
}

/// Classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,

    /// First error code found in the diagnostics
    pub error_code: Option<String>,
    pub summary: String,
    pub suggested_fix: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Split a leading `path:line...` location off a diagnostic line
fn split_location(line: &str) -> (Option<&str>, &str) {
    let Some((head, rest)) = line.split_once(": ") else {
        return (None, line);
    };
    let has_position = head
        .split_once(':')
        .is_some_and(|(file, pos)| !file.is_empty() && pos.starts_with(|c: char| c.is_ascii_digit()));
    if has_position {
        (Some(head), rest)
    } else {
        (None, line)
    }
}

fn extract_code(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let end = text[start..].find(']')? + start;
    let code = &text[start + 1..end];
    let valid = !code.is_empty()
        && code.chars().all(|c| c.is_ascii_alphanumeric())
        && code.chars().any(|c| c.is_ascii_digit());
    valid.then(|| code.to_string())
}

fn line_severity(text: &str) -> Option<Severity> {
    let lower = text.to_ascii_lowercase();
    if lower.starts_with("warning") {
        Some(Severity::Warning)
    } else if lower.starts_with("error")
        || lower.starts_with("type error")
        || lower.starts_with("syntax error")
        || lower.starts_with("parse error")
        || lower.starts_with("import error")
    {
        Some(Severity::Error)
    } else {
        None
    }
}

/// Parse compiler output into diagnostics. Lines without a severity marker are skipped.
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (location, rest) = split_location(line);
            let severity = line_severity(rest)?;
            Some(Diagnostic {
                severity,
                code: extract_code(rest),
                location: location.map(str::to_string),
                message: rest.to_string(),
            })
        })
        .collect()
}

/// Category of compiler output
pub fn compile_category(text: &str) -> ErrorCategory {
    let lower = text.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&["syntax error", "parse error", "unexpected token", "unexpected end"]) {
        ErrorCategory::Syntax
    } else if any(&["unbound", "import", "package", "not found", "cannot find"]) {
        ErrorCategory::Import
    } else if any(&["type error", "expected type", "cannot produce", "type mismatch"]) {
        ErrorCategory::Type
    } else {
        ErrorCategory::Unknown
    }
}

fn suggested_fix(category: ErrorCategory) -> Option<String> {
    let fix = match category {
        ErrorCategory::Syntax => {
            "Check the reported line for a missing delimiter, keyword or semicolon."
        }
        ErrorCategory::Type => {
            "Make the expression at the reported location produce the type its context expects."
        }
        ErrorCategory::Import => {
            "Declare or import the missing name and list any package in backend/packages.json."
        }
        ErrorCategory::Build => "Fix the frontend build error reported by the bundler.",
        ErrorCategory::Timeout => {
            "The bundler did not finish in time. Deploy again later or trim frontend dependencies."
        }
        _ => return None,
    };
    Some(fix.to_string())
}

fn truncate(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() <= MAX_SUMMARY_CHARS {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(MAX_SUMMARY_CHARS).collect();
        format!("{}...", cut)
    }
}

fn classify_compilation(output: &str) -> ErrorClassification {
    let diagnostics = parse_diagnostics(output);
    let errors: Vec<&Diagnostic> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();

    let category_text = if errors.is_empty() {
        output.to_string()
    } else {
        errors
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    };
    let category = compile_category(&category_text);

    let summary = match errors.first() {
        Some(first) => match &first.location {
            Some(location) => truncate(&format!("{}: {}", location, first.message)),
            None => truncate(&first.message),
        },
        None => truncate(output),
    };
    let summary = if summary.is_empty() {
        "Compilation failed".to_string()
    } else {
        summary
    };

    ErrorClassification {
        category,
        severity: Severity::Error,
        retryable: false,
        error_code: errors.iter().find_map(|d| d.code.clone()),
        summary,
        suggested_fix: suggested_fix(category),
        diagnostics,
    }
}

/// Classify a failure
pub fn classify(error: &DeployError) -> ErrorClassification {
    if let DeployError::CompilationError(output) = error {
        return classify_compilation(output);
    }

    let (category, retryable) = match error {
        DeployError::TransportError(_) => (ErrorCategory::Transport, true),
        DeployError::InstallError(_) => (ErrorCategory::Install, true),
        DeployError::BundleTimeout { .. } => (ErrorCategory::Timeout, true),
        DeployError::BundlingError(_) => (ErrorCategory::Build, true),
        DeployError::BundleJobFailed(_) => (ErrorCategory::Build, false),
        DeployError::ProtocolError(_) | DeployError::JsonError(_) => (ErrorCategory::Protocol, false),
        DeployError::AlreadyRunning(_) => (ErrorCategory::Conflict, false),
        DeployError::InvalidTransition(_)
        | DeployError::RetryBudgetExhausted { .. }
        | DeployError::StorageError(_)
        | DeployError::ConfigError(_)
        | DeployError::ServerError(_)
        | DeployError::ShutdownError(_)
        | DeployError::IoError(_) => (ErrorCategory::Internal, false),
        DeployError::CompilationError(_) => (ErrorCategory::Unknown, false),
    };

    let suggested_fix = match error {
        DeployError::BundleJobFailed(_) => suggested_fix(ErrorCategory::Build),
        DeployError::BundleTimeout { .. } => suggested_fix(ErrorCategory::Timeout),
        _ => None,
    };

    ErrorClassification {
        category,
        severity: Severity::Error,
        retryable,
        error_code: None,
        summary: truncate(&error.to_string()),
        suggested_fix,
        diagnostics: Vec::new(),
    }
}
