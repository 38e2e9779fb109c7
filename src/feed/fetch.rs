// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LoadError;
use crate::loader::{FetchOptions, RemoteLoader};
use crate::model::Podcast;
use crate::progress::{LoadProgress, ProgressReporter};

use super::parse::parse_feed;

/// Fetch and parse a podcast feed into `podcast`
///
/// On success `last_loaded` is stamped. On any error the episode list is
/// emptied, so a half-parsed feed never escapes.
pub async fn load_feed(
    loader: &RemoteLoader,
    podcast: &mut Podcast,
    options: &FetchOptions,
    cancel: &CancellationToken,
    reporter: &dyn ProgressReporter,
) -> Result<(), LoadError> {
    debug!(url = %podcast.url, "Loading feed");
    let url = podcast.url.clone();

    let result = async {
        let bytes = loader.fetch(&url, options, cancel, reporter).await?;
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        reporter.report(LoadProgress::Parsing);
        parse_feed(&bytes, podcast)?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            podcast.last_loaded = Some(Utc::now());
            Ok(())
        }
        Err(e) => {
            podcast.episodes.clear();
            Err(e)
        }
    }
}

/// Determine if a string is a URL or a file path
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::loader::tests::MockHttpClient;
    use crate::progress::NoopReporter;
    use std::sync::Arc;
    use url::Url;

    const FEED: &str = r#"<rss><channel><title>Show</title>
        <item><title>One</title><enclosure url="https://example.com/1.mp3"/></item>
    </channel></rss>"#;

    fn podcast() -> Podcast {
        Podcast::new(None, Url::parse("https://example.com/feed.xml").unwrap())
    }

    #[tokio::test]
    async fn load_feed_parses_and_stamps() {
        let client = Arc::new(MockHttpClient::with(
            "https://example.com/feed.xml",
            200,
            FEED.as_bytes(),
        ));
        let loader = RemoteLoader::new(client);
        let mut podcast = podcast();

        load_feed(
            &loader,
            &mut podcast,
            &FetchOptions::default(),
            &CancellationToken::new(),
            &NoopReporter,
        )
        .await
        .unwrap();

        assert_eq!(podcast.name.as_deref(), Some("Show"));
        assert_eq!(podcast.episodes.len(), 1);
        assert!(podcast.last_loaded.is_some());
    }

    #[tokio::test]
    async fn malformed_feed_clears_episodes() {
        let client = Arc::new(MockHttpClient::with(
            "https://example.com/feed.xml",
            200,
            br#"<rss><channel><item><enclosure url="https://example.com/1.mp3"/></item><item>"#,
        ));
        let loader = RemoteLoader::new(client);
        let mut podcast = podcast();

        let result = load_feed(
            &loader,
            &mut podcast,
            &FetchOptions::default(),
            &CancellationToken::new(),
            &NoopReporter,
        )
        .await;

        assert!(matches!(result, Err(LoadError::Parse(_))));
        assert!(podcast.episodes.is_empty());
        assert!(podcast.last_loaded.is_none());
    }

    #[test]
    fn is_url_detects_http() {
        assert!(is_url("http://example.com/feed.xml"));
        assert!(is_url("https://example.com/feed.xml"));
        assert!(!is_url("./feed.xml"));
    }
}
