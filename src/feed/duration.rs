// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Normalize an episode duration to at least `m:ss` form
///
/// Plain seconds and `m:ss`/`h:mm:ss` values are rewritten as `m:ss` or
/// `h:mm:ss`. Durations of zero become `None`. Text that is not a number
/// is kept as written.
pub fn normalize_duration(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    match total_seconds(raw) {
        Some(0) => None,
        Some(total) => Some(format_seconds(total)),
        None => Some(raw.to_string()),
    }
}

fn total_seconds(raw: &str) -> Option<u64> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() > 3 {
        return None;
    }

    let mut total: u64 = 0;
    for part in parts {
        // Some feeds append fractions of a second
        let whole = part.split('.').next().unwrap_or(part);
        let value: u64 = whole.trim().parse().ok()?;
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(total)
}

fn format_seconds(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_seconds_gain_minutes() {
        assert_eq!(normalize_duration("125"), Some("2:05".to_string()));
        assert_eq!(normalize_duration("45"), Some("0:45".to_string()));
        assert_eq!(normalize_duration("3723"), Some("1:02:03".to_string()));
    }

    #[test]
    fn colon_forms_are_normalized() {
        assert_eq!(normalize_duration("30:00"), Some("30:00".to_string()));
        assert_eq!(normalize_duration("1:02:03"), Some("1:02:03".to_string()));
        assert_eq!(normalize_duration("00:45:10"), Some("45:10".to_string()));
        assert_eq!(normalize_duration("75:00"), Some("1:15:00".to_string()));
    }

    #[test]
    fn zero_durations_collapse_to_none() {
        assert_eq!(normalize_duration("0:00"), None);
        assert_eq!(normalize_duration("00:00:00"), None);
        assert_eq!(normalize_duration("0"), None);
        assert_eq!(normalize_duration("  "), None);
    }

    #[test]
    fn unparseable_text_is_kept() {
        assert_eq!(normalize_duration("1h30m"), Some("1h30m".to_string()));
    }

    #[test]
    fn fractional_seconds_are_dropped() {
        assert_eq!(normalize_duration("12:34.5"), Some("12:34".to_string()));
    }
}
