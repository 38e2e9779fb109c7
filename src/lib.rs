pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod listeners;
pub mod loader;
pub mod manager;
pub mod metadata;
pub mod model;
pub mod opml;
pub mod policy;
pub mod progress;
pub mod settings;
pub mod suggestions;

// Re-export main types for convenience
pub use episode::{DownloadBackend, EpisodeLookup, EpisodeManager, HttpDownloadBackend};
pub use error::{
    DownloadError, FeedError, InsertError, LoadError, MetadataError, OpmlError, SettingsError,
    SuggestionError,
};
pub use feed::{is_url, load_feed, parse_feed};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
pub use listeners::{
    EpisodeDownloadListener, FailureReason, PodcastListListener, PodcastLoadListener,
    PodcastLogoListener,
};
pub use loader::{CacheMode, FetchOptions, RemoteLoader};
pub use manager::{LoadRequest, PodcastManager};
pub use metadata::METADATA_FILENAME;
pub use model::{Episode, Genre, Language, LoadState, MediaType, Podcast, Suggestion};
pub use opml::{OPML_FILENAME, OpmlStore, PodcastListStore};
pub use policy::{ConnectionType, Connectivity, FreshnessPolicy, SharedConnectivity};
pub use progress::{LoadProgress, NoopReporter, ProgressReporter};
pub use settings::{SETTINGS_FILENAME, Settings};
pub use suggestions::{fetch_suggestions, parse_suggestions, without_subscribed};
