mod date;
mod duration;
mod fetch;
mod parse;

pub use date::parse_pub_date;
pub use duration::normalize_duration;
pub use fetch::{is_url, load_feed};
pub use parse::parse_feed;
