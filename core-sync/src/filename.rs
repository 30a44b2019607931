//! Remote object naming convention.
//!
//! A script object's remote name encodes its URI: `vm@2-<encoded-uri>` is
//! canonical, `vm-<percent-encoded-uri>` is the legacy read-only form. The
//! URI is pre-encoded by the caller; nothing here re-encodes. The metadata
//! object carries a fixed, unprefixed name and must never be parsed as a
//! script.

const NAME_PREFIX: &str = "vm";
const CANONICAL_VERSION: u64 = 2;

/// Synthesize the canonical remote name for a script URI.
pub fn script_file_name(uri: &str) -> String {
    format!("{}@{}-{}", NAME_PREFIX, CANONICAL_VERSION, uri)
}

/// Whether a remote name denotes a script object (`vm-…` or `vm@<digits>-…`).
pub fn is_script_file(name: &str) -> bool {
    split_versioned(name).is_some()
}

/// Extract the script URI from a remote name.
///
/// Version 2 names carry the URI verbatim. Legacy names carry it
/// percent-encoded; when decoding fails the raw remainder is used so foreign
/// content still reconciles.
pub fn uri_from_file_name(name: &str) -> Option<String> {
    let (version, rest) = split_versioned(name)?;
    match version {
        Some(CANONICAL_VERSION) => Some(rest.to_string()),
        _ => Some(
            urlencoding::decode(rest)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| rest.to_string()),
        ),
    }
}

/// Split a name into its optional version and the URI remainder.
///
/// The prefix ends at the first `-`; the version, when present, sits between
/// `@` and that dash and must be all digits.
fn split_versioned(name: &str) -> Option<(Option<u64>, &str)> {
    let rest = name.strip_prefix(NAME_PREFIX)?;
    if let Some(tail) = rest.strip_prefix('-') {
        return Some((None, tail));
    }
    let rest = rest.strip_prefix('@')?;
    let (digits, tail) = rest.split_once('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((digits.parse().ok(), tail))
}
