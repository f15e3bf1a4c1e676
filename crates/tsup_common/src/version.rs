//! Version string normalization

/// Strip surrounding whitespace and a single leading `v`.
pub fn normalize_version(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_prefix('v').unwrap_or(trimmed).to_string()
}

/// Compare two version strings after normalization.
pub fn same_version(a: &str, b: &str) -> bool {
    normalize_version(a) == normalize_version(b)
}

/// Pull the version out of `tailscale version` output.
///
/// The first non-empty line carries the version; later lines hold commit info.
pub fn parse_reported_version(output: &str) -> Option<String> {
    let first = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let token = first.split_whitespace().last()?;
    let version = normalize_version(token);
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}
