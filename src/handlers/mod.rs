pub mod config;
pub mod document;
pub mod speech;

pub use self::config::*;
pub use document::{clear_document, download_document, extract_document, get_document, put_document};
pub use speech::{download, list_voices, play, status, stop, toggle};
