// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::model::Episode;

/// Longest title portion kept in a file name
const MAX_TITLE_LENGTH: usize = 100;

/// Hex digits of the media URL digest appended to every file name
const MEDIA_TAG_LENGTH: usize = 8;

/// Extensions accepted verbatim from the media URL
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp3", "m4a", "m4v", "mp4", "mov", "aac", "ogg", "oga", "opus", "wav", "flac", "webm",
];

/// Where the download of `episode` lands below `root`
///
/// Layout: `<root>/<podcast>/<YYYY-MM-DD>-<title>-<tag>.<ext>`, where the
/// tag is derived from the media URL so same-titled episodes never share a
/// file.
pub fn download_path(root: &Path, episode: &Episode) -> PathBuf {
    root.join(podcast_dir_name(episode)).join(episode_file_name(episode))
}

/// Directory name for the episode's podcast
///
/// Falls back to the feed host when the podcast has no usable name.
pub fn podcast_dir_name(episode: &Episode) -> String {
    let raw = episode
        .podcast_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| episode.podcast_url().host_str())
        .unwrap_or("podcast");

    let sanitized = sanitize_filename::sanitize(raw.trim());
    if sanitized.is_empty() {
        "podcast".to_string()
    } else {
        sanitized
    }
}

/// File name for an episode: date prefix, sanitized title, media URL tag
/// and media extension
pub fn episode_file_name(episode: &Episode) -> String {
    let date_prefix = episode
        .pub_date
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "undated".to_string());

    let title = episode
        .name
        .as_deref()
        .map(slugify)
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| url_stem(episode));

    format!(
        "{date_prefix}-{title}-{}.{}",
        media_tag(episode),
        media_extension(episode)
    )
}

/// Leading hex digits of the SHA-256 of the media URL
fn media_tag(episode: &Episode) -> String {
    let mut hasher = Sha256::new();
    hasher.update(episode.media_url.as_str().as_bytes());
    let mut tag = format!("{:x}", hasher.finalize());
    tag.truncate(MEDIA_TAG_LENGTH);
    tag
}

/// Extension of the media URL's last path segment, `mp3` when unknown
pub fn media_extension(episode: &Episode) -> String {
    episode
        .media_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "mp3".to_string())
}

/// Stem of the media URL's file name, used for untitled episodes
fn url_stem(episode: &Episode) -> String {
    let stem = episode
        .media_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|file| file.rsplit_once('.').map_or(file, |(stem, _)| stem))
        .map(slugify)
        .unwrap_or_default();

    if stem.is_empty() {
        "episode".to_string()
    } else {
        stem
    }
}

/// Reduce a title to ASCII alphanumerics, `_` and `.`, joined by single dashes
fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    truncate_at_dash(&slug, MAX_TITLE_LENGTH)
}

/// Cut to `max_len` bytes, preferring the last dash in the second half
fn truncate_at_dash(slug: &str, max_len: usize) -> String {
    if slug.len() <= max_len {
        return slug.to_string();
    }

    let cut = &slug[..max_len];
    match cut.rfind('-') {
        Some(pos) if pos > max_len / 2 => cut[..pos].to_string(),
        _ => cut.trim_end_matches('-').to_string(),
    }
}
