//! Engine-version comparison.
//!
//! Handles the case where the desired version names only a major version,
//! e.g. "6.x", while the remote reports the fully resolved version, e.g.
//! "6.0.5". From major version 6 upward the remote also self-upgrades the
//! patch level, so patch differences there are not drift.

/// Returns true if the desired and latest engine versions match.
///
/// If the desired version ends in "x" or its major version is 6 or higher,
/// only the major (and, when given, minor) components are compared and the
/// patch level is ignored. Below major 6 the strings must match exactly.
pub fn versions_match(desired: &str, latest: &str) -> bool {
    if desired == latest {
        return true;
    }

    let (d_major, d_minor) = version_numbers(desired);
    let (l_major, l_minor) = version_numbers(latest);

    if d_major > 5 || desired.ends_with('x') {
        return d_major == l_major && (d_minor < 0 || d_minor == l_minor);
    }

    false
}

/// Major and minor components of a version string like "6.2", "6.x" or
/// "7.0.4". A missing component, or the "x" placeholder, yields -1.
fn version_numbers(version: &str) -> (i64, i64) {
    let mut parts = version.split('.');
    let major = parts
        .next()
        .and_then(|p| p.parse::<i64>().ok())
        .unwrap_or(-1);
    let minor = match parts.next() {
        Some(p) if !p.eq_ignore_ascii_case("x") => p.parse::<i64>().unwrap_or(-1),
        _ => -1,
    };
    (major, minor)
}
