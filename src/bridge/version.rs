//! Framework version compatibility gate
//!
//! Versions are split into numeric and alphabetic parts (`2.1.0rc1` becomes
//! `2 1 0 rc 1`). Numeric parts compare numerically, alphabetic parts
//! lexically (case-sensitive), and a numeric part sorts before an alphabetic
//! one. When one version is a prefix of the other, the longer one is newer, so
//! `2.1` is older than `2.1.0`.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
enum VersionPart {
    Number(u64),
    Text(String),
}

impl Ord for VersionPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (VersionPart::Number(a), VersionPart::Number(b)) => a.cmp(b),
            (VersionPart::Text(a), VersionPart::Text(b)) => a.cmp(b),
            (VersionPart::Number(_), VersionPart::Text(_)) => Ordering::Less,
            (VersionPart::Text(_), VersionPart::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for VersionPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn parse_parts(version: &str) -> Vec<VersionPart> {
    let mut parts = Vec::new();

    for component in version.trim().split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut rest = component;
        while let Some(first) = rest.chars().next() {
            let is_digit = first.is_ascii_digit();
            let end = rest
                .find(|c: char| c.is_ascii_digit() != is_digit)
                .unwrap_or(rest.len());
            let (run, tail) = rest.split_at(end);
            parts.push(if is_digit {
                // Runs too long for u64 still compare sensibly as saturated numbers
                VersionPart::Number(run.parse().unwrap_or(u64::MAX))
            } else {
                VersionPart::Text(run.to_string())
            });
            rest = tail;
        }
    }

    parts
}

/// Compare two dotted version strings
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    // Lexicographic over parts; a strict prefix sorts first
    parse_parts(a).cmp(&parse_parts(b))
}

/// Startup gate: true when `current` is at least `minimum`
pub fn check_compatibility(current: &str, minimum: &str) -> bool {
    let compatible = compare_versions(current, minimum) != Ordering::Less;
    if compatible {
        tracing::info!(current, minimum, "Framework version is compatible");
    } else {
        tracing::error!(
            "This module requires framework version {} or newer, running {}",
            minimum,
            current
        );
    }
    compatible
}
