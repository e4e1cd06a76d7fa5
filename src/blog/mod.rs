//! Blog documents: front matter, sources and change detection

pub mod error;
pub mod frontmatter;
pub mod source;
pub mod sync;
pub mod types;

pub use error::BlogError;
pub use source::{DocumentSource, RemoteDocumentSource};
pub use sync::{SyncLoop, SyncReport};
pub use types::{ChangeEvent, Document, DocumentMeta};
