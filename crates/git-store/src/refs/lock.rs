//! Per-reference locks. Each normalized ref path gets a lazily created
//! binary semaphore; multi-ref acquisition sorts and deduplicates the paths
//! so concurrent pushes over overlapping ref sets cannot deadlock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::{GitError, Result};
use crate::hash::ObjectId;
use crate::refs::{Expected, RefStore};

#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// Holds one ref's lock; released on drop.
pub struct RefLock {
    name: String,
    _permit: OwnedSemaphorePermit,
}

impl RefLock {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Holds a whole set of ref locks, acquired in byte-lexicographic order.
/// Released together on drop.
pub struct MultiRefLock {
    names: BTreeSet<String>,
    _held: Vec<RefLock>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore(&self, name: &str) -> Arc<Semaphore> {
        let mut locks = self.locks.lock();
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    pub async fn acquire(&self, name: &str) -> RefLock {
        let permit = self
            .semaphore(name)
            .acquire_owned()
            .await
            .expect("ref semaphores are never closed");
        RefLock {
            name: name.to_string(),
            _permit: permit,
        }
    }

    /// Acquires every named lock. Duplicates are collapsed; acquisition
    /// happens in sorted order, which is what rules out lock cycles between
    /// concurrent holders.
    pub async fn acquire_many<I>(&self, names: I) -> MultiRefLock
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let ordered: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        let mut held = Vec::with_capacity(ordered.len());
        for name in &ordered {
            held.push(self.acquire(name).await);
        }
        MultiRefLock {
            names: ordered,
            _held: held,
        }
    }
}

impl MultiRefLock {
    pub fn covers(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// CAS update of a ref that is a member of this lock set. Updating a ref
    /// outside the set is a programming error and is rejected rather than
    /// racing unlocked.
    pub fn write_with_validation(
        &self,
        refs: &RefStore,
        name: &str,
        expected: Option<Expected>,
        new: Option<ObjectId>,
    ) -> Result<()> {
        if !self.covers(name) {
            return Err(GitError::InvalidArgument(format!(
                "ref {name} is not covered by this lock"
            )));
        }
        refs.update(name, expected, new)
    }
}
