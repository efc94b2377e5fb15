//! Wildcard matching shared by role filters, derived-role parent roles, and
//! rule action sets.
//!
//! Three shapes are supported: `*` matches anything, `prefix:*` matches
//! anything sharing that prefix up to the first `:`, and `*:suffix` matches
//! anything sharing that suffix. Wildcards never cross the `:` when combined
//! (there is no `prefix:*:suffix` double-wildcard form).

/// Match a single candidate string against a single pattern.
pub fn matches(candidate: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(":*") {
        return candidate
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with(':'))
            .unwrap_or(false);
    }
    if let Some(suffix) = pattern.strip_prefix("*:") {
        return candidate
            .strip_suffix(suffix)
            .map(|rest| rest.ends_with(':'))
            .unwrap_or(false);
    }
    candidate == pattern
}

/// Whether `candidate` matches any of `patterns`.
pub fn matches_any(candidate: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| matches(candidate, p))
}

/// Whether any of `candidates` matches any of `patterns` (used for action-set
/// intersection and role-filter satisfaction).
pub fn any_intersects(candidates: &[String], patterns: &[String]) -> bool {
    candidates.iter().any(|c| matches_any(c, patterns))
}

/// Glob match used by the policy store's `name` filter (`*` only, no `:`
/// semantics — this is a plain filesystem-style glob over policy names).
pub fn glob_matches(candidate: &str, glob: &str) -> bool {
    if !glob.contains('*') {
        return candidate == glob;
    }
    let escaped = regex::escape(glob).replace("\\*", ".*");
    regex::Regex::new(&format!("^{escaped}$"))
        .map(|re| re.is_match(candidate))
        .unwrap_or(false)
}
