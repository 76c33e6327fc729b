//! Shared normalization helpers used by every adapter (§4.1).

use buildrisk_domain::{CiConclusion, CiStatus};

/// Maps a provider's native status string into the five-value status enum.
/// Each adapter supplies its own vocabulary; unmapped strings fall back to
/// `Unknown` rather than erroring, since a new provider status string should
/// degrade gracefully, not break ingestion.
pub fn normalize_status(native: &str, vocabulary: &[(&str, CiStatus)]) -> CiStatus {
    vocabulary
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(native))
        .map(|(_, status)| *status)
        .unwrap_or(CiStatus::Unknown)
}

pub fn normalize_conclusion(
    native: &str,
    vocabulary: &[(&str, CiConclusion)],
) -> Option<CiConclusion> {
    vocabulary
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(native))
        .map(|(_, c)| *c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_strings_degrade_to_unknown() {
        let vocab = [("completed", CiStatus::Completed)];
        assert_eq!(normalize_status("totally_new_status", &vocab), CiStatus::Unknown);
        assert_eq!(normalize_status("COMPLETED", &vocab), CiStatus::Completed);
    }
}
