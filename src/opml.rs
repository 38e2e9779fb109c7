// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};
use url::Url;

use crate::error::OpmlError;
use crate::model::Podcast;

/// Name of the podcast list file inside the data directory
pub const OPML_FILENAME: &str = "podcasts.opml";

/// Durable home of the user's podcast list
#[async_trait]
pub trait PodcastListStore: Send + Sync {
    /// Read all stored podcasts; a store that was never written is empty
    async fn load(&self) -> Result<Vec<Podcast>, OpmlError>;

    async fn save(&self, podcasts: &[Podcast]) -> Result<(), OpmlError>;
}

/// Podcast list kept as an OPML file
#[derive(Debug, Clone)]
pub struct OpmlStore {
    path: PathBuf,
}

impl OpmlStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PodcastListStore for OpmlStore {
    async fn load(&self) -> Result<Vec<Podcast>, OpmlError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(OpmlError::ReadFailed {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        let podcasts = parse_opml(&bytes)?;
        debug!(path = %self.path.display(), podcasts = podcasts.len(), "Read podcast list");
        Ok(podcasts)
    }

    async fn save(&self, podcasts: &[Podcast]) -> Result<(), OpmlError> {
        let write_failed = |e| OpmlError::WriteFailed {
            path: self.path.clone(),
            source: e,
        };
        let tmp_path = self.path.with_extension("opml.tmp");

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }
        tokio::fs::write(&tmp_path, write_opml(podcasts))
            .await
            .map_err(write_failed)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(write_failed)?;

        debug!(path = %self.path.display(), podcasts = podcasts.len(), "Wrote podcast list");
        Ok(())
    }
}

/// Read every `outline` carrying an `xmlUrl`, at any nesting depth
pub fn parse_opml(xml_bytes: &[u8]) -> Result<Vec<Podcast>, OpmlError> {
    let mut reader = Reader::from_reader(xml_bytes);
    let mut podcasts = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(element) | Event::Empty(element) => {
                if element.local_name().as_ref() == b"outline"
                    && let Some(podcast) = outline_podcast(&element)
                {
                    podcasts.push(podcast);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(podcasts)
}

fn outline_podcast(element: &BytesStart<'_>) -> Option<Podcast> {
    let raw_url = attribute(element, "xmlUrl")?;
    let url = match Url::parse(&raw_url) {
        Ok(url) => url,
        Err(e) => {
            warn!(url = %raw_url, error = %e, "Skipping outline with malformed feed URL");
            return None;
        }
    };

    let name = attribute(element, "text").or_else(|| attribute(element, "title"));
    Some(Podcast::new(name, url))
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key.as_bytes())
        .map(|attr| {
            let raw = String::from_utf8_lossy(&attr.value);
            html_escape::decode_html_entities(&raw).trim().to_string()
        })
        .filter(|value| !value.is_empty())
}

/// Render `podcasts` as an OPML 2.0 document
pub fn write_opml(podcasts: &[Podcast]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <opml version=\"2.0\">\n  <head>\n    <title>Podcasts</title>\n  </head>\n  <body>\n",
    );

    for podcast in podcasts {
        let name = podcast.display_name();
        out.push_str("    <outline type=\"rss\" text=\"");
        out.push_str(&html_escape::encode_double_quoted_attribute(name));
        out.push_str("\" title=\"");
        out.push_str(&html_escape::encode_double_quoted_attribute(name));
        out.push_str("\" xmlUrl=\"");
        out.push_str(&html_escape::encode_double_quoted_attribute(podcast.url.as_str()));
        out.push_str("\"/>\n");
    }

    out.push_str("  </body>\n</opml>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn podcast(name: &str, url: &str) -> Podcast {
        Podcast::new(Some(name.to_string()), Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn save_then_load_preserves_names_and_urls() {
        let dir = tempdir().unwrap();
        let store = OpmlStore::new(dir.path().join(OPML_FILENAME));
        let podcasts = vec![
            podcast("Tom & Jerry's \"Show\" <live>", "https://example.com/feed.xml?a=1&b=2"),
            podcast("Café Talk", "https://example.org/rss"),
        ];

        store.save(&podcasts).await.unwrap();
        let loaded = store.load().await.unwrap();

        let pairs: Vec<_> = loaded
            .iter()
            .map(|p| (p.name.clone().unwrap(), p.url.to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (
                    "Tom & Jerry's \"Show\" <live>".to_string(),
                    "https://example.com/feed.xml?a=1&b=2".to_string()
                ),
                ("Café Talk".to_string(), "https://example.org/rss".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_list() {
        let dir = tempdir().unwrap();
        let store = OpmlStore::new(dir.path().join(OPML_FILENAME));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[test]
    fn nested_outlines_and_title_fallback() {
        let xml = br#"<?xml version="1.0"?>
            <opml version="1.1"><body>
              <outline text="News">
                <outline title="Daily" type="rss" xmlUrl="https://example.com/daily.xml"></outline>
                <outline text="Broken" xmlUrl="not a url"/>
              </outline>
              <outline text="Category only"/>
            </body></opml>"#;

        let podcasts = parse_opml(xml).unwrap();

        assert_eq!(podcasts.len(), 1);
        assert_eq!(podcasts[0].name.as_deref(), Some("Daily"));
        assert_eq!(podcasts[0].url.as_str(), "https://example.com/daily.xml");
    }

    #[test]
    fn malformed_document_is_an_error() {
        let xml = b"<opml><body><outline text=\"a\" xmlUrl=\"https://example.com/\"></body></opml>";
        assert!(matches!(parse_opml(xml), Err(OpmlError::Xml(_))));
    }
}
