mod episode;
mod list;
mod podcast;
mod suggestion;

pub use episode::Episode;
pub use list::PodcastList;
pub use podcast::{LoadState, Podcast};
pub(crate) use podcast::url_key;
pub use suggestion::{Genre, Language, MediaType, Suggestion};
