//! In-memory known-product state shared by the monitor and the query server

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::models::Product;

/// Every product ever observed, plus the ones not yet flushed to disk.
///
/// The map and the pending buffer live in one value so a single lock
/// covers both and they cannot drift apart.
#[derive(Debug, Default)]
pub struct Catalog {
    known: HashMap<String, Product>,
    pending: Vec<Product>,
}

impl Catalog {
    pub fn contains(&self, id: &str) -> bool {
        self.known.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Populates known products from a persisted snapshot. Seeded products
    /// are already durable so they never enter the pending buffer.
    /// Returns how many distinct products were added.
    pub fn seed(&mut self, products: Vec<Product>) -> usize {
        let mut added = 0;
        for product in products {
            if product.id.is_empty() || self.contains(&product.id) {
                continue;
            }
            self.known.insert(product.id.clone(), product);
            added += 1;
        }
        added
    }

    /// Marks every unseen product as known and queues it for persistence.
    /// The first observation of an id wins; later ones are ignored even if
    /// their fields differ. Returns the newly admitted products in input order.
    pub fn admit(&mut self, products: Vec<Product>) -> Vec<Product> {
        let mut admitted = Vec::new();
        for product in products {
            if product.id.is_empty() || self.contains(&product.id) {
                continue;
            }
            self.known.insert(product.id.clone(), product.clone());
            self.pending.push(product.clone());
            admitted.push(product);
        }
        admitted
    }

    pub fn snapshot(&self) -> Vec<Product> {
        self.known.values().cloned().collect()
    }

    /// Empties the pending buffer. Only call after a successful full save.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

/// Handle to the one lock guarding the [`Catalog`].
#[derive(Debug, Clone, Default)]
pub struct SharedCatalog {
    inner: Arc<Mutex<Catalog>>,
}

impl SharedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, Catalog> {
        self.inner.lock().await
    }

    pub async fn admit(&self, products: Vec<Product>) -> Vec<Product> {
        self.inner.lock().await.admit(products)
    }

    /// Copies the known products out so callers can serialize without the lock.
    pub async fn snapshot(&self) -> Vec<Product> {
        self.inner.lock().await.snapshot()
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending_len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
