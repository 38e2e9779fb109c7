// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

use super::podcast::Podcast;

/// Language a podcast is produced in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Language {
    English,
    German,
    French,
    Spanish,
    Italian,
    Dutch,
}

/// Directory category of a podcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Genre {
    Arts,
    Business,
    Comedy,
    Education,
    GamesHobbies,
    GovernmentOrganizations,
    Health,
    KidsFamily,
    Music,
    NewsPolitics,
    ReligionSpirituality,
    ScienceMedicine,
    SocietyCulture,
    SportsRecreation,
    Technology,
    TvFilm,
}

/// Kind of media a podcast publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    Audio,
    Video,
}

/// A podcast offered on the discovery list
///
/// Suggestions live only in the suggestion list and are never persisted with
/// the subscribed podcasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub podcast: Podcast,
    pub featured: bool,
}

impl Suggestion {
    pub fn new(podcast: Podcast, featured: bool) -> Self {
        Self { podcast, featured }
    }
}
