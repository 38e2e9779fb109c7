// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};

/// Fallback formats, tried in order after RFC 2822
const ALTERNATE_FORMATS: [&str; 2] = [
    // "Mon, 01 Jan 2024 12:00 +0000" (no seconds)
    "%a, %d %b %Y %H:%M %z",
    // "2024-01-01T12:00:00+00:00"
    "%Y-%m-%dT%H:%M:%S%:z",
];

/// Parse an episode publication date
///
/// Returns `None` when no known format matches.
pub fn parse_pub_date(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim();
    if date_str.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Some(dt.to_utc());
    }

    ALTERNATE_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
        .map(|dt| dt.to_utc())
}
