// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use quick_xml::NsReader;
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use tracing::{debug, warn};
use url::Url;

use crate::error::FeedError;
use crate::model::{Episode, Podcast};

use super::date::parse_pub_date;
use super::duration::normalize_duration;

/// Namespace of the `content:encoded` long description element
const CONTENT_NAMESPACE: &[u8] = b"http://purl.org/rss/1.0/modules/content/";

/// Parse feed XML into `podcast`
///
/// The episode list and description are cleared before parsing starts, so
/// a failed parse leaves them holding whatever was read before the error.
/// Callers must treat any error as a failed load and discard the episodes.
///
/// The podcast name is only filled in when it is still unset.
pub fn parse_feed(xml_bytes: &[u8], podcast: &mut Podcast) -> Result<(), FeedError> {
    podcast.episodes.clear();
    podcast.description = None;

    let mut parser = FeedParser::new(xml_bytes);
    parser.parse_document(podcast)?;

    if let Some(encoding) = parser.encoding {
        podcast.encoding = Some(encoding);
    }
    for episode in &mut podcast.episodes {
        episode.podcast_name.clone_from(&podcast.name);
    }

    debug!(
        podcast = podcast.display_name(),
        episodes = podcast.episodes.len(),
        "Parsed feed"
    );
    Ok(())
}

/// One step of the document stream, reduced to what the parser cares about
enum Node<'a> {
    Start {
        element: BytesStart<'a>,
        content_namespace: bool,
    },
    Empty {
        element: BytesStart<'a>,
    },
    Text(String),
    End,
    Eof,
}

/// Fields collected while walking an `<item>` element
#[derive(Default)]
struct ItemFields {
    title: Option<String>,
    enclosure_url: Option<String>,
    pub_date: Option<String>,
    duration: Option<String>,
    description: Option<String>,
    long_description: Option<String>,
}

struct FeedParser<'a> {
    reader: NsReader<&'a [u8]>,
    encoding: Option<String>,
}

impl<'a> FeedParser<'a> {
    fn new(xml_bytes: &'a [u8]) -> Self {
        Self {
            reader: NsReader::from_reader(xml_bytes),
            encoding: None,
        }
    }

    fn next_node(&mut self) -> Result<Node<'a>, FeedError> {
        loop {
            let (namespace, event) = self.reader.read_resolved_event()?;
            let content_namespace = matches!(
                namespace,
                ResolveResult::Bound(Namespace(uri)) if uri == CONTENT_NAMESPACE
            );

            let node = match event {
                Event::Start(element) => Node::Start {
                    element,
                    content_namespace,
                },
                Event::Empty(element) => Node::Empty { element },
                Event::End(_) => Node::End,
                Event::Text(text) => Node::Text(unescape_lossy(&text)),
                Event::CData(data) => Node::Text(String::from_utf8_lossy(&data).into_owned()),
                Event::GeneralRef(reference) => Node::Text(resolve_reference(&reference)),
                Event::Decl(decl) => {
                    if let Some(Ok(encoding)) = decl.encoding() {
                        self.encoding = Some(String::from_utf8_lossy(&encoding).into_owned());
                    }
                    continue;
                }
                Event::Eof => Node::Eof,
                _ => continue,
            };
            return Ok(node);
        }
    }

    fn parse_document(&mut self, podcast: &mut Podcast) -> Result<(), FeedError> {
        let mut saw_element = false;

        loop {
            match self.next_node()? {
                Node::Start { element, .. } => {
                    saw_element = true;
                    let name = local_name(&element);
                    match name.as_str() {
                        "rss" | "RDF" | "channel" | "feed" => {}
                        "title" => {
                            let title = self.read_text(&name)?;
                            if !podcast.has_name() && title.is_some() {
                                podcast.name = title;
                            }
                        }
                        "description" => {
                            let description = self.read_text(&name)?;
                            if podcast.description.is_none() {
                                podcast.description = description;
                            }
                        }
                        "explicit" => {
                            podcast.explicit = self.read_text(&name)?.is_some_and(|v| {
                                matches!(v.to_ascii_lowercase().as_str(), "yes" | "true" | "explicit")
                            });
                        }
                        "image" => {
                            let logo = match attribute(&element, "href") {
                                Some(href) => {
                                    self.skip(&name)?;
                                    Some(href)
                                }
                                None => self.read_image()?,
                            };
                            set_logo(podcast, logo);
                        }
                        "thumbnail" => {
                            set_logo(podcast, attribute(&element, "url"));
                            self.skip(&name)?;
                        }
                        "item" => {
                            if let Some(episode) = self.read_item(podcast)? {
                                podcast.episodes.push(episode);
                            }
                        }
                        _ => self.skip(&name)?,
                    }
                }
                Node::Empty { element } => {
                    saw_element = true;
                    match local_name(&element).as_str() {
                        "image" => set_logo(podcast, attribute(&element, "href")),
                        "thumbnail" => set_logo(podcast, attribute(&element, "url")),
                        _ => {}
                    }
                }
                Node::Text(_) | Node::End => {}
                Node::Eof => break,
            }
        }

        if saw_element {
            Ok(())
        } else {
            Err(FeedError::EmptyDocument)
        }
    }

    /// Read the nested `<url>` of an RSS `<image>` block
    fn read_image(&mut self) -> Result<Option<String>, FeedError> {
        let mut url = None;
        loop {
            match self.next_node()? {
                Node::Start { element, .. } => {
                    let name = local_name(&element);
                    if name == "url" {
                        url = self.read_text(&name)?;
                    } else {
                        self.skip(&name)?;
                    }
                }
                Node::End => return Ok(url),
                Node::Empty { .. } | Node::Text(_) => {}
                Node::Eof => {
                    return Err(FeedError::UnexpectedEof {
                        element: "image".to_string(),
                    });
                }
            }
        }
    }

    fn read_item(&mut self, podcast: &Podcast) -> Result<Option<Episode>, FeedError> {
        let mut item = ItemFields::default();

        loop {
            match self.next_node()? {
                Node::Start {
                    element,
                    content_namespace,
                } => {
                    let name = local_name(&element);
                    match name.as_str() {
                        "title" => item.title = self.read_text(&name)?,
                        "pubDate" => item.pub_date = self.read_text(&name)?,
                        "duration" => item.duration = self.read_text(&name)?,
                        "description" => item.description = self.read_text(&name)?,
                        "encoded" if content_namespace => {
                            item.long_description = self.read_text(&name)?;
                        }
                        "enclosure" => {
                            if item.enclosure_url.is_none() {
                                item.enclosure_url = attribute(&element, "url");
                            }
                            self.skip(&name)?;
                        }
                        _ => self.skip(&name)?,
                    }
                }
                Node::Empty { element } => {
                    if local_name(&element) == "enclosure" && item.enclosure_url.is_none() {
                        item.enclosure_url = attribute(&element, "url");
                    }
                }
                Node::End => break,
                Node::Text(_) => {}
                Node::Eof => {
                    return Err(FeedError::UnexpectedEof {
                        element: "item".to_string(),
                    });
                }
            }
        }

        Ok(item.into_episode(podcast))
    }

    /// Collect the text content of the element just opened, up to its end tag
    fn read_text(&mut self, element: &str) -> Result<Option<String>, FeedError> {
        let mut text = String::new();
        let mut depth = 0usize;

        loop {
            match self.next_node()? {
                Node::Text(chunk) => text.push_str(&chunk),
                Node::Start { .. } => depth += 1,
                Node::End if depth == 0 => break,
                Node::End => depth -= 1,
                Node::Empty { .. } => {}
                Node::Eof => {
                    return Err(FeedError::UnexpectedEof {
                        element: element.to_string(),
                    });
                }
            }
        }

        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }

    /// Skip the element just opened together with its whole subtree
    fn skip(&mut self, element: &str) -> Result<(), FeedError> {
        let mut depth = 0usize;
        loop {
            match self.next_node()? {
                Node::Start { .. } => depth += 1,
                Node::End if depth == 0 => return Ok(()),
                Node::End => depth -= 1,
                Node::Empty { .. } | Node::Text(_) => {}
                Node::Eof => {
                    return Err(FeedError::UnexpectedEof {
                        element: element.to_string(),
                    });
                }
            }
        }
    }
}

impl ItemFields {
    fn into_episode(self, podcast: &Podcast) -> Option<Episode> {
        let Some(raw_url) = self.enclosure_url else {
            debug!(title = ?self.title, "Skipping item without enclosure");
            return None;
        };

        let media_url = match Url::parse(&raw_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %raw_url, error = %e, "Skipping item with malformed enclosure URL");
                return None;
            }
        };

        let pub_date = self.pub_date.as_deref().and_then(|raw| {
            let parsed = parse_pub_date(raw);
            if parsed.is_none() {
                warn!(date = raw, "Unrecognized publication date");
            }
            parsed
        });

        let mut episode = Episode::new(podcast.url.clone(), podcast.name.clone(), media_url);
        episode.name = self.title;
        episode.pub_date = pub_date;
        episode.duration = self.duration.as_deref().and_then(normalize_duration);
        episode.description = self.description;
        episode.long_description = self.long_description;
        Some(episode)
    }
}

/// First declared logo wins
fn set_logo(podcast: &mut Podcast, raw: Option<String>) {
    if podcast.logo_url.is_some() {
        return;
    }
    let Some(raw) = raw else { return };

    match Url::parse(&raw) {
        Ok(url) => podcast.logo_url = Some(url),
        Err(e) => warn!(url = %raw, error = %e, "Ignoring malformed logo URL"),
    }
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key.as_bytes())
        .map(|attr| unescape_lossy(&attr.value))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unescape_lossy(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    match unescape(&text) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => text.into_owned(),
    }
}

fn resolve_reference(reference: &BytesRef<'_>) -> String {
    if let Ok(Some(ch)) = reference.resolve_char_ref() {
        return ch.to_string();
    }
    let name = String::from_utf8_lossy(reference);
    match resolve_predefined_entity(&name) {
        Some(value) => value.to_string(),
        None => format!("&{name};"),
    }
}
