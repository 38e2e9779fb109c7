// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::InsertError;

use super::podcast::Podcast;

/// An ordered collection of podcasts that only accepts named, unique entries
#[derive(Debug, Clone, Default)]
pub struct PodcastList {
    podcasts: Vec<Podcast>,
}

impl PodcastList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a podcast, rejecting unnamed podcasts and duplicates by URL
    pub fn insert(&mut self, podcast: Podcast) -> Result<(), InsertError> {
        if !podcast.has_name() {
            return Err(InsertError::Unnamed);
        }
        if self.contains(podcast.url.as_str()) {
            return Err(InsertError::Duplicate);
        }
        self.podcasts.push(podcast);
        Ok(())
    }

    pub fn remove(&mut self, url: &str) -> Option<Podcast> {
        let index = self.podcasts.iter().position(|p| p.has_url(url))?;
        Some(self.podcasts.remove(index))
    }

    pub fn find(&self, url: &str) -> Option<&Podcast> {
        self.podcasts.iter().find(|p| p.has_url(url))
    }

    pub fn find_mut(&mut self, url: &str) -> Option<&mut Podcast> {
        self.podcasts.iter_mut().find(|p| p.has_url(url))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.find(url).is_some()
    }

    pub fn sort_by_name(&mut self) {
        self.podcasts.sort_by(Podcast::by_name);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Podcast> {
        self.podcasts.iter()
    }

    pub fn len(&self) -> usize {
        self.podcasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.podcasts.is_empty()
    }

    /// Copy of the current entries
    pub fn to_vec(&self) -> Vec<Podcast> {
        self.podcasts.clone()
    }
}

impl FromIterator<Podcast> for PodcastList {
    /// Collects valid podcasts, silently dropping the ones `insert` rejects
    fn from_iter<I: IntoIterator<Item = Podcast>>(iter: I) -> Self {
        let mut list = PodcastList::new();
        for podcast in iter {
            let _ = list.insert(podcast);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn podcast(name: Option<&str>, url: &str) -> Podcast {
        Podcast::new(name.map(String::from), Url::parse(url).unwrap())
    }

    #[test]
    fn insert_rejects_unnamed_podcasts() {
        let mut list = PodcastList::new();
        let result = list.insert(podcast(None, "https://example.com/feed.xml"));

        assert_eq!(result, Err(InsertError::Unnamed));
        assert!(list.is_empty());
    }

    #[test]
    fn insert_rejects_duplicates_by_url() {
        let mut list = PodcastList::new();
        list.insert(podcast(Some("One"), "https://example.com/feed.xml"))
            .unwrap();
        let result = list.insert(podcast(Some("Two"), "https://EXAMPLE.com/feed.xml"));

        assert_eq!(result, Err(InsertError::Duplicate));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_and_find_ignore_case() {
        let mut list = PodcastList::new();
        list.insert(podcast(Some("One"), "https://example.com/Feed.xml"))
            .unwrap();

        assert!(list.find("https://example.com/feed.xml").is_some());
        let removed = list.remove("https://example.com/FEED.xml").unwrap();
        assert_eq!(removed.display_name(), "One");
        assert!(list.is_empty());
    }

    #[test]
    fn collect_skips_invalid_entries() {
        let list: PodcastList = vec![
            podcast(Some("B"), "https://b.example.com/"),
            podcast(None, "https://x.example.com/"),
            podcast(Some("A"), "https://a.example.com/"),
            podcast(Some("A again"), "https://a.example.com/"),
        ]
        .into_iter()
        .collect();

        assert_eq!(list.len(), 2);
    }
}
