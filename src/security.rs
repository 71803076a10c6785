//! Security module for the gandalf MCP server.
//!
//! Every inbound parameter passes through here twice: once as raw JSON text
//! (size cap + dangerous-pattern scan, before deserialization) and once as a
//! typed value inside the handler (length bounds, extension blocklist, path
//! containment).
//!
//! # Design Philosophy
//!
//! Validation failures are typed outcomes with stable, user-facing messages.
//! Nothing here panics and nothing throws across the dispatch boundary.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Maximum serialized length of a `tools/call` params object.
pub const MAX_PARAMS_BYTES: usize = 50_000;

/// Maximum length of any single string parameter.
pub const MAX_STRING_LENGTH: usize = 50_000;

/// Maximum length of a search query.
pub const MAX_QUERY_LENGTH: usize = 100;

/// Maximum length of any array parameter.
pub const MAX_ARRAY_LENGTH: usize = 100;

/// Maximum component depth of any validated path.
pub const MAX_PATH_DEPTH: usize = 20;

/// System prefixes a resolved path must never enter, unless the project
/// root itself legitimately lies beneath one.
pub const BLOCKED_PREFIXES: &[&str] = &[
    "/etc", "/sys", "/proc", "/dev", "/root", "/boot", "/var/log", "/var/run", "/tmp", "/usr/bin",
    "/usr/sbin",
];

/// Extensions that are never valid filters (executable/script formats).
pub const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "scr", "vbs", "ps1", "dll", "com", "msi", "jar", "app",
];

/// Security-related errors.
#[derive(Error, Debug, Clone)]
pub enum SecurityError {
    #[error("JSON params exceed size limit")]
    ParamsTooLarge { size: usize },

    #[error("Dangerous pattern detected in JSON params")]
    DangerousPattern { matched: &'static str },

    #[error("Invalid {field}: exceeds maximum length of {max}")]
    TooLong { field: &'static str, max: usize },

    #[error("Invalid {field}: array exceeds maximum length of {max}")]
    ArrayTooLong { field: &'static str, max: usize },

    #[error("Invalid file extension: '{extension}'")]
    BadExtension { extension: String },

    #[error("Invalid path '{path}': escapes project root")]
    PathEscape { path: String },

    #[error("Invalid path '{path}': exceeds maximum depth of {max}")]
    PathTooDeep { path: String, max: usize },

    #[error("Invalid path '{path}': resolves into blocked system prefix {prefix}")]
    BlockedPrefix { path: String, prefix: &'static str },

    #[error("Invalid {field}: {reason}")]
    BadValue { field: &'static str, reason: String },
}

impl SecurityError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParamsTooLarge { .. } => "PARAMS_TOO_LARGE",
            Self::DangerousPattern { .. } => "DANGEROUS_PATTERN",
            Self::TooLong { .. } => "STRING_TOO_LONG",
            Self::ArrayTooLong { .. } => "ARRAY_TOO_LONG",
            Self::BadExtension { .. } => "BAD_EXTENSION",
            Self::PathEscape { .. } => "PATH_ESCAPE",
            Self::PathTooDeep { .. } => "PATH_TOO_DEEP",
            Self::BlockedPrefix { .. } => "BLOCKED_PREFIX",
            Self::BadValue { .. } => "BAD_VALUE",
        }
    }
}

type SecResult<T> = Result<T, SecurityError>;

// ============================================================================
// Raw-Params Gate
// ============================================================================

/// Substrings that reject a raw params object outright.
///
/// Covers command substitution, shell redirection, null bytes, URI scheme
/// smuggling, and literal or URL-encoded path traversal.
const DANGEROUS_SUBSTRINGS: &[&str] = &[
    "$(", "`", ">>", "<<", "\\u0000", "file:", "javascript:", "data:", "../", "..\\",
];

fn encoded_traversal_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // %2e%2e / %2f / %5c in any case, covering ..%2f, %2e%2e%2f, ..%5c
        regex::Regex::new(r"(?i)(%2e%2e|\.\.%2f|\.\.%5c|%2e%2e%2f|%2e%2e%5c)")
            .expect("static regex")
    })
}

/// Validates the serialized params text of a `tools/call` before anything
/// deserializes it.
///
/// Idempotent: a value that passed once passes again unchanged.
pub fn validate_raw_params(raw: &str) -> SecResult<()> {
    if raw.len() > MAX_PARAMS_BYTES {
        return Err(SecurityError::ParamsTooLarge { size: raw.len() });
    }
    if raw.contains('\0') {
        return Err(SecurityError::DangerousPattern { matched: "null byte" });
    }
    for pat in DANGEROUS_SUBSTRINGS {
        if raw.contains(pat) {
            return Err(SecurityError::DangerousPattern { matched: pat });
        }
    }
    if encoded_traversal_re().is_match(raw) {
        return Err(SecurityError::DangerousPattern {
            matched: "encoded traversal",
        });
    }
    Ok(())
}

// ============================================================================
// Per-Parameter Gates
// ============================================================================

/// Bounds a free-form string parameter.
pub fn validate_string(field: &'static str, value: &str) -> SecResult<()> {
    if value.len() > MAX_STRING_LENGTH {
        return Err(SecurityError::TooLong {
            field,
            max: MAX_STRING_LENGTH,
        });
    }
    Ok(())
}

/// Bounds a search query (tighter than a general string).
pub fn validate_query(value: &str) -> SecResult<()> {
    if value.is_empty() {
        return Err(SecurityError::BadValue {
            field: "query",
            reason: "must not be empty".into(),
        });
    }
    if value.chars().count() > MAX_QUERY_LENGTH {
        return Err(SecurityError::TooLong {
            field: "query",
            max: MAX_QUERY_LENGTH,
        });
    }
    Ok(())
}

/// Bounds an array parameter's length.
pub fn validate_array_len<T>(field: &'static str, values: &[T]) -> SecResult<()> {
    if values.len() > MAX_ARRAY_LENGTH {
        return Err(SecurityError::ArrayTooLong {
            field,
            max: MAX_ARRAY_LENGTH,
        });
    }
    Ok(())
}

/// Validates one file-extension filter.
///
/// Accepts an optional leading dot; the stem must be 1-10 alphanumerics and
/// must not name an executable format. Returns the normalized extension
/// (lowercase, no dot).
pub fn validate_extension(raw: &str) -> SecResult<String> {
    let stem = raw.strip_prefix('.').unwrap_or(raw);
    let ok_shape = (1..=10).contains(&stem.len())
        && stem.bytes().all(|b| b.is_ascii_alphanumeric());
    if !ok_shape {
        return Err(SecurityError::BadExtension {
            extension: raw.to_string(),
        });
    }
    let normalized = stem.to_ascii_lowercase();
    if BLOCKED_EXTENSIONS.contains(&normalized.as_str()) {
        return Err(SecurityError::BadExtension {
            extension: raw.to_string(),
        });
    }
    Ok(normalized)
}

/// Bounds-checks an integer parameter.
pub fn validate_int_range(
    field: &'static str,
    value: i64,
    min: i64,
    max: i64,
) -> SecResult<()> {
    if value < min || value > max {
        return Err(SecurityError::BadValue {
            field,
            reason: format!("must be an integer between {min} and {max}"),
        });
    }
    Ok(())
}

// ============================================================================
// Path Validation
// ============================================================================

/// Normalizes a path by resolving `.` and `..` components without
/// filesystem access.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if components
                    .last()
                    .is_some_and(|c| !matches!(c, Component::ParentDir))
                {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
            _ => {
                components.push(component);
            }
        }
    }

    components.iter().collect()
}

/// Returns the blocked system prefix a path falls under, if any.
fn blocked_prefix_of(path: &Path) -> Option<&'static str> {
    BLOCKED_PREFIXES
        .iter()
        .find(|p| path.starts_with(p))
        .copied()
}

/// Validates that a user-provided relative path stays inside the project
/// root after normalization.
///
/// # Security Properties
///
/// 1. Rejects absolute paths and any path whose normalized form still
///    contains `..`
/// 2. Bounds component depth at [`MAX_PATH_DEPTH`]
/// 3. Rejects resolution into a blocked system prefix, unless the root
///    itself legitimately lies beneath that prefix
pub fn validate_project_path(root: &Path, user_path: &str) -> SecResult<PathBuf> {
    let user = Path::new(user_path);

    if user.is_absolute() {
        return Err(SecurityError::PathEscape {
            path: user_path.to_string(),
        });
    }

    let normalized = normalize_path(user);
    for component in normalized.components() {
        if matches!(component, Component::ParentDir) {
            return Err(SecurityError::PathEscape {
                path: user_path.to_string(),
            });
        }
    }

    if normalized.components().count() > MAX_PATH_DEPTH {
        return Err(SecurityError::PathTooDeep {
            path: user_path.to_string(),
            max: MAX_PATH_DEPTH,
        });
    }

    let joined = root.join(&normalized);
    let resolved = dunce::canonicalize(&joined).unwrap_or(joined);
    let canonical_root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    if !resolved.starts_with(&canonical_root) {
        return Err(SecurityError::PathEscape {
            path: user_path.to_string(),
        });
    }

    if let Some(prefix) = blocked_prefix_of(&resolved) {
        // The root itself may live under /tmp (tests) or another blocked
        // prefix; only reject when the root does not share that prefix.
        if blocked_prefix_of(&canonical_root) != Some(prefix) {
            return Err(SecurityError::BlockedPrefix {
                path: user_path.to_string(),
                prefix,
            });
        }
    }

    Ok(resolved)
}

/// Validates a candidate project root: absolute, existing directory, within
/// depth bounds, not inside a blocked system prefix.
pub fn validate_root_candidate(candidate: &Path) -> SecResult<PathBuf> {
    let resolved =
        dunce::canonicalize(candidate).unwrap_or_else(|_| candidate.to_path_buf());

    if !resolved.is_dir() {
        return Err(SecurityError::BadValue {
            field: "project_root",
            reason: format!("'{}' is not a directory", resolved.display()),
        });
    }

    if resolved.components().count() > MAX_PATH_DEPTH {
        return Err(SecurityError::PathTooDeep {
            path: resolved.display().to_string(),
            max: MAX_PATH_DEPTH,
        });
    }

    // /tmp is blocked for parameter paths but is a legitimate place for a
    // project root (CI checkouts, tests), so only the exact system dirs
    // reject a root.
    if let Some(prefix) = blocked_prefix_of(&resolved) {
        if prefix != "/tmp" {
            return Err(SecurityError::BlockedPrefix {
                path: resolved.display().to_string(),
                prefix,
            });
        }
    }

    Ok(resolved)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Raw gate

    #[test]
    fn test_raw_gate_size_cap() {
        let raw = "x".repeat(MAX_PARAMS_BYTES + 1);
        assert!(matches!(
            validate_raw_params(&raw),
            Err(SecurityError::ParamsTooLarge { .. })
        ));
        let ok = "x".repeat(MAX_PARAMS_BYTES);
        assert!(validate_raw_params(&ok).is_ok());
    }

    #[test]
    fn test_raw_gate_dangerous_patterns() {
        for bad in [
            r#"{"query":"$(rm -rf /)"}"#,
            r#"{"query":"`id`"}"#,
            r#"{"path":"../../../etc/passwd"}"#,
            r#"{"path":"..%2f..%2fetc"}"#,
            r#"{"path":"%2e%2e%2fetc"}"#,
            r#"{"url":"file:///etc/passwd"}"#,
            r#"{"url":"javascript:alert(1)"}"#,
            r#"{"url":"data:text/html,x"}"#,
            "{\"q\":\"a\0b\"}",
        ] {
            assert!(
                validate_raw_params(bad).is_err(),
                "expected rejection: {bad}"
            );
        }
    }

    #[test]
    fn test_raw_gate_accepts_normal_params() {
        assert!(validate_raw_params(r#"{"file_types":[".rs",".py"],"max_files":100}"#).is_ok());
        assert!(validate_raw_params(r#"{"query":"async fn resolve"}"#).is_ok());
    }

    #[test]
    fn test_raw_gate_idempotent() {
        let raw = r#"{"query":"hello world"}"#;
        assert!(validate_raw_params(raw).is_ok());
        assert!(validate_raw_params(raw).is_ok());
    }

    // Scalar gates

    #[test]
    fn test_query_length() {
        assert!(validate_query("hello").is_ok());
        assert!(validate_query(&"q".repeat(MAX_QUERY_LENGTH)).is_ok());
        assert!(validate_query(&"q".repeat(MAX_QUERY_LENGTH + 1)).is_err());
        assert!(validate_query("").is_err());
    }

    #[test]
    fn test_array_length() {
        let ok: Vec<u8> = vec![0; MAX_ARRAY_LENGTH];
        assert!(validate_array_len("file_types", &ok).is_ok());
        let bad: Vec<u8> = vec![0; MAX_ARRAY_LENGTH + 1];
        assert!(validate_array_len("file_types", &bad).is_err());
    }

    #[test]
    fn test_extension_validation() {
        assert_eq!(validate_extension(".py").unwrap(), "py");
        assert_eq!(validate_extension("RS").unwrap(), "rs");
        assert_eq!(validate_extension("tsx").unwrap(), "tsx");

        assert!(validate_extension(".exe").is_err());
        assert!(validate_extension("ps1").is_err());
        assert!(validate_extension("").is_err());
        assert!(validate_extension("../../../etc/passwd").is_err());
        assert!(validate_extension(".waytoolongext").is_err());
        assert!(validate_extension(".t@r").is_err());
    }

    #[test]
    fn test_int_range() {
        assert!(validate_int_range("limit", 1, 1, 100).is_ok());
        assert!(validate_int_range("limit", 100, 1, 100).is_ok());
        let err = validate_int_range("limit", 101, 1, 100).unwrap_err();
        assert!(err.to_string().contains("between 1 and 100"));
        assert!(validate_int_range("max_files", 0, 1, 5000).is_err());
    }

    // Path gates

    #[test]
    fn test_valid_project_paths() {
        let root = std::env::temp_dir();
        assert!(validate_project_path(&root, "src/main.rs").is_ok());
        assert!(validate_project_path(&root, "./src/lib.rs").is_ok());
        assert!(validate_project_path(&root, "src/./lib.rs").is_ok());
    }

    #[test]
    fn test_path_traversal_blocked() {
        let root = std::env::temp_dir();
        assert!(validate_project_path(&root, "../etc/passwd").is_err());
        assert!(validate_project_path(&root, "src/../../etc/passwd").is_err());
        assert!(validate_project_path(&root, "/etc/passwd").is_err());
    }

    #[test]
    fn test_path_depth_cap() {
        let root = std::env::temp_dir();
        let deep = (0..=MAX_PATH_DEPTH)
            .map(|i| format!("d{i}"))
            .collect::<Vec<_>>()
            .join("/");
        assert!(matches!(
            validate_project_path(&root, &deep),
            Err(SecurityError::PathTooDeep { .. })
        ));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("./foo")), Path::new("foo"));
        assert_eq!(normalize_path(Path::new("foo/./bar")), Path::new("foo/bar"));
        assert_eq!(normalize_path(Path::new("foo/../bar")), Path::new("bar"));
        assert_eq!(normalize_path(Path::new("../foo")), Path::new("../foo"));
    }

    #[test]
    fn test_root_candidate_under_tmp_allowed() {
        // Test checkouts commonly live under /tmp; the root validator must
        // accept them while parameter paths still honor the blocklist.
        let dir = std::env::temp_dir();
        assert!(validate_root_candidate(&dir).is_ok());
    }

    #[test]
    fn test_root_candidate_system_dir_rejected() {
        if Path::new("/etc").is_dir() {
            assert!(matches!(
                validate_root_candidate(Path::new("/etc")),
                Err(SecurityError::BlockedPrefix { .. })
            ));
        }
    }
}
