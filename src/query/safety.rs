use once_cell::sync::Lazy;
use regex::RegexSet;
use thiserror::Error;

/// Administrative statements the proxy refuses to forward anywhere.
///
/// Matched against the raw statement text, so the check knows nothing about
/// statement boundaries, quoting or comments.
pub const DANGEROUS_PATTERNS: [&str; 9] = [
    r"DROP\s+DATABASE",
    r"CREATE\s+DATABASE",
    r"ALTER\s+DATABASE",
    r"GRANT\s+.*\s+ON",
    r"REVOKE\s+.*\s+FROM",
    r"FLUSH\s+PRIVILEGES",
    r"SET\s+PASSWORD",
    r"CREATE\s+USER",
    r"DROP\s+USER",
];

static DENYLIST: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(DANGEROUS_PATTERNS.iter().map(|p| format!("(?i){p}"))).expect("static regex set")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Query contains potentially dangerous operations (matched {pattern})")]
pub struct SecurityRejection {
    pub pattern: &'static str,
}

/// Check `sql` against the denylist, naming the first pattern that matched.
pub fn check(sql: &str) -> Result<(), SecurityRejection> {
    match DENYLIST.matches(sql).iter().next() {
        Some(index) => Err(SecurityRejection {
            pattern: DANGEROUS_PATTERNS[index],
        }),
        None => Ok(()),
    }
}

pub fn is_safe(sql: &str) -> bool {
    !DENYLIST.is_match(sql)
}
