//! Identifier validation and sanitisation.
//!
//! Every value that flows into a DDL statement (schema creation, database
//! creation, search-path selection) must pass through these validators before
//! interpolation. DDL cannot take bound parameters, so validation is the only
//! injection defense and must run immediately before every such statement.

use crate::error::{Result, TenancyError};

/// Hard cap applied before any character scan.
const MAX_INPUT_LEN: usize = 512;

/// Maximum identifier length accepted by the supported engines.
const MAX_IDENT_LEN: usize = 63;

/// Namespace prefixes reserved by the engine; never allowed for tenants.
const RESERVED_PREFIXES: &[&str] = &["pg_"];

/// Check whether `identifier` is a valid tenant slug.
///
/// A valid slug is 3-63 characters, starts with a lowercase letter, ends with
/// a lowercase letter or digit, and contains only lowercase letters, digits,
/// and hyphens (no consecutive hyphens).
pub fn is_valid_tenant_identifier(identifier: &str) -> bool {
    if identifier.len() > MAX_INPUT_LEN {
        return false;
    }
    let bytes = identifier.as_bytes();
    if bytes.len() < 3 || bytes.len() > MAX_IDENT_LEN {
        return false;
    }
    if !bytes[0].is_ascii_lowercase() {
        return false;
    }
    let last = bytes[bytes.len() - 1];
    if !(last.is_ascii_lowercase() || last.is_ascii_digit()) {
        return false;
    }
    let mut prev_hyphen = false;
    for &b in bytes {
        match b {
            b'a'..=b'z' | b'0'..=b'9' => prev_hyphen = false,
            b'-' => {
                if prev_hyphen {
                    return false;
                }
                prev_hyphen = true;
            }
            _ => return false,
        }
    }
    true
}

/// Validate a tenant slug, returning it on success.
pub fn validate_tenant_identifier(identifier: &str) -> Result<()> {
    if is_valid_tenant_identifier(identifier) {
        Ok(())
    } else {
        Err(TenancyError::Validation(format!(
            "invalid tenant identifier {:?}: must be 3-63 lowercase letters, digits, and hyphens",
            identifier
        )))
    }
}

/// Check whether `name` is a safe schema/database identifier.
///
/// Safe identifiers start with a lowercase letter or underscore, contain only
/// lowercase letters, digits, and underscores, and do not exceed 63 bytes.
pub fn is_safe_namespace_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_IDENT_LEN {
        return false;
    }
    let bytes = name.as_bytes();
    if !(bytes[0].is_ascii_lowercase() || bytes[0] == b'_') {
        return false;
    }
    bytes
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Assert that `name` is safe to interpolate into a DDL statement.
///
/// Call this immediately before any statement that embeds a namespace name.
/// Rejects reserved engine prefixes. Never truncates or rewrites the value;
/// callers wanting normalisation should use [`sanitize_identifier`].
pub fn assert_safe_namespace(name: &str, context: &str) -> Result<()> {
    if !is_safe_namespace_name(name) {
        return Err(TenancyError::Validation(format!(
            "unsafe namespace name {:?} ({}): only lowercase letters, digits, and underscores are allowed (max 63 chars)",
            name, context
        )));
    }
    for prefix in RESERVED_PREFIXES {
        if name.starts_with(prefix) {
            return Err(TenancyError::Validation(format!(
                "namespace name {:?} ({}) uses reserved prefix {:?}",
                name, context, prefix
            )));
        }
    }
    Ok(())
}

/// Convert an arbitrary string into a safe namespace identifier.
///
/// Lossy by design: lowercases, maps hyphens and dots to underscores, strips
/// everything else, collapses runs of underscores, prepends `t_` when the
/// result starts with a digit, truncates to 63 bytes, and falls back to
/// `"tenant"` for empty results.
pub fn sanitize_identifier(identifier: &str) -> String {
    let mut out = String::with_capacity(identifier.len());
    let mut prev_underscore = false;
    for c in identifier.chars().flat_map(|c| c.to_lowercase()) {
        let mapped = match c {
            'a'..='z' | '0'..='9' => Some(c),
            '-' | '.' | ' ' | '_' => Some('_'),
            _ => None,
        };
        if let Some(m) = mapped {
            if m == '_' {
                if !prev_underscore && !out.is_empty() {
                    out.push('_');
                }
                prev_underscore = true;
            } else {
                out.push(m);
                prev_underscore = false;
            }
        }
    }
    let mut s: String = out.trim_matches('_').to_string();
    if s.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        s = format!("t_{}", s);
    }
    if s.is_empty() {
        s = "tenant".to_string();
    }
    s.truncate(MAX_IDENT_LEN);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(is_valid_tenant_identifier("acme-corp"));
        assert!(is_valid_tenant_identifier("abc"));
        assert!(is_valid_tenant_identifier("tenant123"));
        // Exactly 63 characters is accepted.
        let max = format!("a{}", "b".repeat(62));
        assert_eq!(max.len(), 63);
        assert!(is_valid_tenant_identifier(&max));
    }

    #[test]
    fn test_invalid_identifiers() {
        // Too short.
        assert!(!is_valid_tenant_identifier("ab"));
        // Too long.
        assert!(!is_valid_tenant_identifier(&"a".repeat(64)));
        // Uppercase.
        assert!(!is_valid_tenant_identifier("ACME"));
        // Leading/trailing hyphen.
        assert!(!is_valid_tenant_identifier("-acme"));
        assert!(!is_valid_tenant_identifier("acme-"));
        // Consecutive hyphens.
        assert!(!is_valid_tenant_identifier("acme--corp"));
        // Starts with a digit.
        assert!(!is_valid_tenant_identifier("1acme"));
        // Disallowed characters.
        assert!(!is_valid_tenant_identifier("acme_corp"));
        assert!(!is_valid_tenant_identifier("acme.corp"));
        assert!(!is_valid_tenant_identifier(""));
    }

    #[test]
    fn test_namespace_safety() {
        assert!(assert_safe_namespace("tenant_acme_corp", "test").is_ok());
        assert!(assert_safe_namespace("_private", "test").is_ok());

        // Injection attempts never reach a statement.
        assert!(assert_safe_namespace("x\"; DROP SCHEMA public; --", "test").is_err());
        assert!(assert_safe_namespace("Tenant", "test").is_err());
        assert!(assert_safe_namespace("", "test").is_err());
        assert!(assert_safe_namespace(&"a".repeat(64), "test").is_err());

        // Reserved engine prefix is rejected before any DDL executes.
        assert!(assert_safe_namespace("pg_tenant", "test").is_err());
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("acme-corp"), "acme_corp");
        assert_eq!(sanitize_identifier("2fast"), "t_2fast");
        assert_eq!(sanitize_identifier("A B C"), "a_b_c");
        assert_eq!(sanitize_identifier("a..b--c"), "a_b_c");
        assert_eq!(sanitize_identifier("!!!"), "tenant");
        assert!(sanitize_identifier(&"x".repeat(100)).len() <= 63);
    }
}
