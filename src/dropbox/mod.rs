//! Dropbox content store client

pub mod client;
pub mod errors;
pub mod types;

pub use client::{DropboxClient, DropboxSettings, RemoteContent};
pub use errors::DropboxError;
pub use types::{RemoteEntry, RemoteProperties};
