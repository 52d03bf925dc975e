//! Config file checks: unknown fields (with "did you mean" hints) and
//! values that parse but can never work.

use serde_json::Value;
use std::collections::HashSet;

const KNOWN_TOP_LEVEL: &[&str] = &[
    "logging",
    "probe",
    "scheduler",
    "runtime",
    "telemetry",
    "topology",
];

/// Known fields for each section.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("logging", &["format", "file", "level"]),
    (
        "probe",
        &[
            "interval_ms",
            "backoff",
            "max_delay_ms",
            "max_attempts",
            "request_timeout_ms",
        ],
    ),
    (
        "scheduler",
        &[
            "instantiate_timeout_secs",
            "job_timeout_secs",
            "job_poll_interval_ms",
            "teardown_timeout_secs",
        ],
    ),
    ("runtime", &["backend", "docker_binary", "network", "pull"]),
    ("telemetry", &["enabled", "otlp_endpoint", "otlp_protocol"]),
    ("topology", &["root", "token"]),
];

/// Severity of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

/// One finding about a config file. `path` is dotted (`probe.max_attempts`)
/// or empty for whole-file findings.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(level: DiagnosticLevel, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        match self.path.as_str() {
            "" => write!(f, "{} {}", tag, self.message),
            path => write!(f, "{} {}: {}", tag, path, self.message),
        }
    }
}

/// Edit distance between two field names.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(ca != *cb);
            cur[j + 1] = substitute.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}

/// "did you mean" hint for the nearest known name within three edits.
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), *k))
        .filter(|(distance, _)| *distance <= 3)
        .min()
        .map(|(_, k)| format!("did you mean '{}'?", k))
}

fn unknown_field(path: String, key: &str, known: &[&str]) -> Diagnostic {
    let message = match suggest_field(key, known) {
        Some(hint) => format!("Unknown field '{}' ({})", key, hint),
        None => format!("Unknown field '{}'", key),
    };
    Diagnostic::new(DiagnosticLevel::Error, path, message)
}

/// Unknown top-level and section fields.
fn check_fields(obj: &serde_json::Map<String, Value>, out: &mut Vec<Diagnostic>) -> bool {
    let top: HashSet<&str> = KNOWN_TOP_LEVEL.iter().copied().collect();
    let before = out.len();

    out.extend(
        obj.keys()
            .filter(|key| !top.contains(key.as_str()))
            .map(|key| unknown_field(key.clone(), key, KNOWN_TOP_LEVEL)),
    );
    for (section, known) in KNOWN_SECTIONS {
        let Some(fields) = obj.get(*section).and_then(Value::as_object) else {
            continue;
        };
        out.extend(
            fields
                .keys()
                .filter(|key| !known.contains(&key.as_str()))
                .map(|key| unknown_field(format!("{}.{}", section, key), key, known)),
        );
    }
    out.len() == before
}

/// Values that load but cannot work.
fn check_values(obj: &serde_json::Map<String, Value>, out: &mut Vec<Diagnostic>) {
    let field = |section: &str, key: &str| obj.get(section).and_then(|s| s.get(key)).cloned();

    if field("probe", "max_attempts").and_then(|v| v.as_u64()) == Some(0) {
        out.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "probe.max_attempts",
            "Must be at least 1",
        ));
    }
    if field("runtime", "backend").as_ref().and_then(Value::as_str) == Some("dry_run") {
        out.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "runtime.backend",
            "dry_run never starts real containers",
        ));
    }
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let Some(obj) = raw.as_object() else {
        return vec![Diagnostic::new(
            DiagnosticLevel::Error,
            "",
            "Config must be a JSON object",
        )];
    };

    let mut diagnostics = vec![Diagnostic::new(DiagnosticLevel::Ok, "", "Valid JSON")];
    if check_fields(obj, &mut diagnostics) {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Ok,
            "",
            "All fields recognized",
        ));
    }
    check_values(obj, &mut diagnostics);
    diagnostics
}
