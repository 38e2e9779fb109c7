mod download;
mod filename;
mod manager;

pub use download::{DownloadBackend, DownloadEvent, DownloadId, DownloadRequest, HttpDownloadBackend};
pub use filename::{download_path, episode_file_name, media_extension, podcast_dir_name};
pub use manager::{EpisodeLookup, EpisodeManager};
