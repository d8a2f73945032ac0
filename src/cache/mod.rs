pub mod lru;
pub mod trx;

pub use lru::LruMap;
pub use trx::{AfterCommit, AfterCommitAction, AutoCommit, DeferredCommit};

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use serde_json::{Map, Value};

use crate::changes::{DocumentChangesCollector, NullChangesCollector};
use crate::config::DocumentCacheConfig;
use crate::document::{
    CopyMode, Document, DocumentId, DocumentPath, EntityDescriptor, FieldChangeRequest, ValidStatus,
};
use crate::error::{Error, Result};

/// Cache of checked-in documents of one entity, plus the checkout protocol
/// for editing them.
///
/// Readers get the cached `Arc<Document>` snapshot and never see a partially
/// edited document. Writers check out a private copy; at most one checkout
/// per id exists at a time. Committing a checkout swaps a fresh snapshot into
/// the cache once the caller's transaction commits.
///
/// Cloning is cheap; clones share the cache.
#[derive(Clone)]
pub struct DocumentRepository {
    inner: Arc<RepositoryInner>,
}

struct RepositoryInner {
    descriptor: Arc<EntityDescriptor>,
    config: DocumentCacheConfig,
    cache: Mutex<LruMap<DocumentId, Arc<Document>>>,
    /// Checked-out ids and the thread that took each checkout.
    checkouts: Mutex<HashMap<DocumentId, ThreadId>>,
    checkout_released: Condvar,
    next_id: AtomicI64,
}

impl DocumentRepository {
    pub fn new(descriptor: Arc<EntityDescriptor>, config: DocumentCacheConfig) -> Self {
        Self {
            inner: Arc::new(RepositoryInner {
                cache: Mutex::new(LruMap::new(config.capacity)),
                checkouts: Mutex::new(HashMap::new()),
                checkout_released: Condvar::new(),
                next_id: AtomicI64::new(1),
                descriptor,
                config,
            }),
        }
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.inner.descriptor
    }

    pub fn config(&self) -> &DocumentCacheConfig {
        &self.inner.config
    }

    /// Number of cached documents.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock_cache()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Creates, validates and caches a new document under a fresh id. Fields
    /// marked `seeded` are copied from `seed` when present there; the key
    /// field is set to the new id.
    pub fn create_new(&self, seed: Option<&Map<String, Value>>) -> Result<Arc<Document>> {
        let id = DocumentId::of(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let descriptor = self.inner.descriptor.clone();
        let path = DocumentPath::root(descriptor.document_type().clone(), id.clone());
        let mut document = Document::new(descriptor.clone(), path, NullChangesCollector::shared());

        if let Some(seed) = seed {
            for field in descriptor.fields().iter().filter(|field| field.seeded) {
                if let Some(value) = seed.get(&field.field_name) {
                    document.set_value(&field.field_name, value.clone())?;
                }
            }
        }
        if let Some(key) = descriptor.key_field() {
            document.set_value(&key.field_name, id.to_json_value())?;
        }
        document.check_and_get_valid_status()?;

        let document = Arc::new(document.copy(CopyMode::CheckInReadonly));
        self.put(document.clone())?;
        log::debug!(
            "CACHE CREATE: cache='{}' path='{}' status={:?}",
            self.inner.config.name,
            document.path(),
            document.valid_status()
        );
        Ok(document)
    }

    /// The cached readonly snapshot.
    pub fn get_for_reading(&self, id: &DocumentId) -> Result<Arc<Document>> {
        self.lock_cache()?
            .get(id)
            .cloned()
            .ok_or_else(|| self.not_found(id))
    }

    /// A writable copy bound to `collector`. The cached snapshot is left as
    /// it is and no checkout guard is taken.
    pub(crate) fn get_for_writing(
        &self,
        id: &DocumentId,
        collector: Arc<dyn DocumentChangesCollector>,
    ) -> Result<Document> {
        let cached = self.get_for_reading(id)?;
        Ok(cached.copy(CopyMode::CheckOutWritable(collector)))
    }

    /// Checks a document out for editing, waiting while another thread holds
    /// a checkout of the same id. A checkout still held by the calling thread
    /// fails with [`Error::AlreadyCheckedOut`], since waiting would never end.
    pub fn checkout(
        &self,
        id: &DocumentId,
        collector: Arc<dyn DocumentChangesCollector>,
    ) -> Result<Checkout> {
        self.get_for_reading(id)?;
        let guard = self.acquire(id, true)?;
        self.checkout_with(guard, collector)
    }

    /// Like [`checkout`](Self::checkout) but fails with
    /// [`Error::AlreadyCheckedOut`] instead of waiting.
    pub fn try_checkout(
        &self,
        id: &DocumentId,
        collector: Arc<dyn DocumentChangesCollector>,
    ) -> Result<Checkout> {
        self.get_for_reading(id)?;
        let guard = self.acquire(id, false)?;
        self.checkout_with(guard, collector)
    }

    fn checkout_with(
        &self,
        guard: CheckoutGuard,
        collector: Arc<dyn DocumentChangesCollector>,
    ) -> Result<Checkout> {
        // The entry may have been evicted while waiting; dropping the guard
        // then releases the id again.
        let document = self.get_for_writing(&guard.id, collector)?;
        log::trace!("CACHE CHECKOUT: path='{}'", document.path());
        Ok(Checkout { document, guard })
    }

    /// Checks the document in. The cache swap runs through `trx`, and the
    /// checkout stays held until it ran. If `trx` discards the action, the
    /// edit is lost and the id is released.
    pub fn commit(&self, checkout: Checkout, trx: &dyn AfterCommit) {
        let Checkout { document, guard } = checkout;
        let snapshot = Arc::new(document.copy(CopyMode::CheckInReadonly));
        let repository = self.clone();
        trx.on_after_commit(Box::new(move || {
            if let Err(e) = repository.put(snapshot) {
                log::warn!("CACHE COMMIT FAILED: id='{}' error={}", guard.id, e);
            }
            drop(guard);
        }));
    }

    /// Checks out `id`, runs `f` on the writable copy and commits if `f`
    /// succeeds. On error the checkout is abandoned.
    pub fn modify<R>(
        &self,
        id: &DocumentId,
        collector: Arc<dyn DocumentChangesCollector>,
        trx: &dyn AfterCommit,
        f: impl FnOnce(&mut Document) -> Result<R>,
    ) -> Result<R> {
        let mut checkout = self.checkout(id, collector)?;
        let result = f(&mut checkout.document)?;
        self.commit(checkout, trx);
        Ok(result)
    }

    /// Applies client change requests to a document and commits it.
    pub fn process_changes(
        &self,
        id: &DocumentId,
        requests: &[FieldChangeRequest],
        collector: Arc<dyn DocumentChangesCollector>,
        trx: &dyn AfterCommit,
    ) -> Result<ValidStatus> {
        self.modify(id, collector, trx, |document| document.process_value_changes(requests))
    }

    /// Runs the completion step (typically persisting the document elsewhere)
    /// and evicts the document once `trx` commits. The document is checked
    /// out meanwhile, so no edit can slip in between.
    pub fn finalize_and_evict<R>(
        &self,
        id: &DocumentId,
        trx: &dyn AfterCommit,
        complete: impl FnOnce(&Document) -> anyhow::Result<R>,
    ) -> Result<R> {
        let checkout = self.checkout(id, NullChangesCollector::shared())?;
        let result = complete(&checkout.document).map_err(Error::storage)?;

        let Checkout { guard, .. } = checkout;
        let repository = self.clone();
        trx.on_after_commit(Box::new(move || {
            repository.remove(&guard.id);
            drop(guard);
        }));
        Ok(result)
    }

    /// Evicts a document. Missing ids are not an error.
    pub fn remove(&self, id: &DocumentId) {
        match self.lock_cache() {
            Ok(mut cache) => {
                let removed = cache.remove(id).is_some();
                log::debug!(
                    "CACHE REMOVE: cache='{}' id='{}' removed={}",
                    self.inner.config.name,
                    id,
                    removed
                );
            }
            Err(e) => log::warn!("CACHE REMOVE FAILED: id='{}' error={}", id, e),
        }
    }

    fn put(&self, document: Arc<Document>) -> Result<()> {
        let id = document.document_id().clone();
        log::trace!(
            "CACHE PUT: cache='{}' id='{}' version={}",
            self.inner.config.name,
            id,
            document.version()
        );
        if let Some((evicted, _)) = self.lock_cache()?.put(id, document) {
            log::debug!("CACHE EVICT: cache='{}' id='{}'", self.inner.config.name, evicted);
        }
        Ok(())
    }

    fn acquire(&self, id: &DocumentId, wait: bool) -> Result<CheckoutGuard> {
        let mut checkouts = self
            .inner
            .checkouts
            .lock()
            .map_err(|_| Error::poisoned("checkouts"))?;
        let current = thread::current().id();
        while let Some(owner) = checkouts.get(id) {
            if !wait || *owner == current {
                return Err(Error::AlreadyCheckedOut(id.clone()));
            }
            log::trace!("CACHE CHECKOUT WAIT: id='{}'", id);
            checkouts = self
                .inner
                .checkout_released
                .wait(checkouts)
                .map_err(|_| Error::poisoned("checkouts"))?;
        }
        checkouts.insert(id.clone(), current);
        Ok(CheckoutGuard {
            inner: self.inner.clone(),
            id: id.clone(),
        })
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, LruMap<DocumentId, Arc<Document>>>> {
        self.inner.cache.lock().map_err(|_| Error::poisoned("document cache"))
    }

    fn not_found(&self, id: &DocumentId) -> Error {
        Error::DocumentNotFound {
            document_type: self.inner.descriptor.document_type().clone(),
            document_id: id.clone(),
        }
    }
}

impl std::fmt::Debug for DocumentRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRepository")
            .field("document_type", self.inner.descriptor.document_type())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Marks one id as checked out until dropped.
struct CheckoutGuard {
    inner: Arc<RepositoryInner>,
    id: DocumentId,
}

impl Drop for CheckoutGuard {
    fn drop(&mut self) {
        let mut checkouts = match self.inner.checkouts.lock() {
            Ok(checkouts) => checkouts,
            Err(poisoned) => poisoned.into_inner(),
        };
        checkouts.remove(&self.id);
        self.inner.checkout_released.notify_all();
        log::trace!("CACHE CHECKOUT RELEASED: id='{}'", self.id);
    }
}

/// A writable document together with the exclusive right to commit it.
/// Dropping it abandons the edit.
pub struct Checkout {
    document: Document,
    guard: CheckoutGuard,
}

impl Checkout {
    pub fn document_id(&self) -> &DocumentId {
        &self.guard.id
    }
}

impl Deref for Checkout {
    type Target = Document;

    fn deref(&self) -> &Document {
        &self.document
    }
}

impl DerefMut for Checkout {
    fn deref_mut(&mut self) -> &mut Document {
        &mut self.document
    }
}

impl std::fmt::Debug for Checkout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout").field("document", &self.document).finish()
    }
}
