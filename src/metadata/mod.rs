mod record;
mod store;

pub use record::EpisodeMetadata;
pub use store::{METADATA_FILENAME, MetadataStore, write_snapshot};
