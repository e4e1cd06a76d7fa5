//! In-memory fakes shared by unit tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::blog::frontmatter::{self, FrontMatter};
use crate::blog::{BlogError, Document, DocumentMeta, DocumentSource};
use crate::cache::error::CacheError;
use crate::cache::two_tier::SharedStore;
use crate::dropbox::{DropboxError, RemoteContent, RemoteEntry, RemoteProperties};

/// Render a post with front matter
pub fn post(title: &str, published: DateTime<Utc>, body: &str) -> String {
    frontmatter::render(
        &FrontMatter {
            title: title.to_string(),
            published,
        },
        body,
    )
    .unwrap()
}

struct StoredDoc {
    content: Vec<u8>,
    hash: String,
    modified: DateTime<Utc>,
    properties: Option<RemoteProperties>,
}

/// Content store kept in a map, with call counters
pub struct MemoryRemote {
    base_path: String,
    docs: Mutex<BTreeMap<String, StoredDoc>>,
    failing_properties: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            base_path: "/blog".to_string(),
            docs: Mutex::new(BTreeMap::new()),
            failing_properties: Mutex::new(HashSet::new()),
            fail_listing: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
        }
    }

    /// Create or overwrite a document, keeping its stored properties
    pub fn put(&self, id: &str, content: &str, hash: &str) {
        let mut docs = self.docs.lock().unwrap();
        let properties = docs.remove(id).and_then(|doc| doc.properties);
        docs.insert(
            id.to_string(),
            StoredDoc {
                content: content.as_bytes().to_vec(),
                hash: hash.to_string(),
                modified: Utc::now(),
                properties,
            },
        );
    }

    pub fn set_stored(&self, id: &str, props: RemoteProperties) {
        if let Some(doc) = self.docs.lock().unwrap().get_mut(id) {
            doc.properties = Some(props);
        }
    }

    pub fn properties(&self, id: &str) -> Option<RemoteProperties> {
        self.docs.lock().unwrap().get(id)?.properties.clone()
    }

    pub fn fail_properties_for(&self, id: &str) {
        self.failing_properties.lock().unwrap().insert(id.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_properties.lock().unwrap().clear();
        self.fail_listing(false);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    fn entry(&self, id: &str, doc: &StoredDoc) -> RemoteEntry {
        RemoteEntry {
            path: format!("{}/{}.md", self.base_path, id),
            content_hash: doc.hash.clone(),
            modified: doc.modified,
            properties: doc.properties.clone(),
        }
    }
}

#[async_trait]
impl RemoteContent for MemoryRemote {
    async fn list_collection(&self) -> Result<Vec<RemoteEntry>, DropboxError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(DropboxError::Server(503, "listing unavailable".to_string()));
        }
        let docs = self.docs.lock().unwrap();
        Ok(docs.iter().map(|(id, doc)| self.entry(id, doc)).collect())
    }

    async fn get_content(&self, id: &str) -> Result<(Vec<u8>, RemoteEntry), DropboxError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let docs = self.docs.lock().unwrap();
        let doc = docs
            .get(id)
            .ok_or_else(|| DropboxError::NotFound(format!("path/not_found/{}", id)))?;
        Ok((doc.content.clone(), self.entry(id, doc)))
    }

    async fn set_properties(
        &self,
        entry: &RemoteEntry,
        props: &RemoteProperties,
    ) -> Result<(), DropboxError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.derive_id(entry);
        if self.failing_properties.lock().unwrap().contains(&id) {
            return Err(DropboxError::Request(400, "property template rejected".to_string()));
        }
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(&id)
            .ok_or_else(|| DropboxError::NotFound(entry.path.clone()))?;
        doc.properties = Some(props.clone());
        Ok(())
    }

    fn derive_id(&self, entry: &RemoteEntry) -> String {
        let prefix = format!("{}/", self.base_path);
        let id = entry.path.strip_prefix(&prefix).unwrap_or(&entry.path);
        id.strip_suffix(".md").unwrap_or(id).to_string()
    }
}

/// Document source with canned answers, a per-call delay and call counters
pub struct CountingSource {
    docs: Mutex<HashMap<String, Document>>,
    delay: Duration,
    document_calls: AtomicUsize,
    meta_calls: AtomicUsize,
}

impl CountingSource {
    pub fn new(delay: Duration) -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            delay,
            document_calls: AtomicUsize::new(0),
            meta_calls: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, id: &str, title: &str, published: DateTime<Utc>) {
        let doc = Document {
            meta: DocumentMeta {
                id: id.to_string(),
                title: title.to_string(),
                published,
                updated: published,
            },
            content: format!("content of {}", id),
        };
        self.docs.lock().unwrap().insert(id.to_string(), doc);
    }

    pub fn document_calls(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }

    pub fn meta_calls(&self) -> usize {
        self.meta_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for CountingSource {
    async fn get_document(&self, id: &str) -> Result<Document, BlogError> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.docs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| BlogError::NotFound(id.to_string()))
    }

    async fn get_meta_list(&self) -> Result<Vec<DocumentMeta>, BlogError> {
        self.meta_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let mut metas: Vec<DocumentMeta> = self
            .docs
            .lock()
            .unwrap()
            .values()
            .map(|doc| doc.meta.clone())
            .collect();
        metas.sort_by(|a, b| b.published.cmp(&a.published));
        Ok(metas)
    }
}

/// Shared cache tier kept in a map; can be switched to fail every call
#[derive(Default)]
pub struct MemorySharedStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
    down: AtomicBool,
}

impl MemorySharedStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().unwrap().contains_key(key)
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::Backend("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SharedStore for MemorySharedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.check()?;
        self.values.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Wrap a value for trait-object use in tests
pub fn shared<T: SharedStore + 'static>(store: &Arc<T>) -> Arc<dyn SharedStore> {
    Arc::clone(store) as Arc<dyn SharedStore>
}
