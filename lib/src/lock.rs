// Copyright 2024 The GitVault Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![expect(missing_docs)]

//! Process-local reference locks.
//!
//! Every reference mutation happens under the per-reference mutex owned by
//! this registry. Multi-reference acquisition sorts the names first so that
//! overlapping callers cannot deadlock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as SyncMutex;

use itertools::Itertools as _;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::ref_name::RefName;
use crate::ref_name::RefNameBuf;

/// Scoped lock on a single reference; dropping it releases the lock.
#[derive(Debug)]
pub struct RefLockGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Registry of per-reference mutexes.
#[derive(Debug, Default)]
pub struct RefLocks {
    // Guarded so that at most one mutex is ever created per name. Entries are
    // never removed; the map is bounded by the set of refs touched by this
    // process.
    mutexes: SyncMutex<HashMap<RefNameBuf, Arc<Mutex<()>>>>,
}

impl RefLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, name: &RefName) -> Arc<Mutex<()>> {
        let mut mutexes = self.mutexes.lock().unwrap();
        mutexes.entry(name.to_owned()).or_default().clone()
    }

    /// Acquires the exclusive lock for `name`.
    ///
    /// The mutex is fair, so writers to the same reference are served in
    /// arrival order.
    pub async fn acquire(&self, name: &RefName) -> RefLockGuard {
        let mutex = self.mutex_for(name);
        RefLockGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    /// Acquires locks for all `names`, deduplicated and in sorted order.
    ///
    /// Dropping the returned future mid-acquisition releases everything
    /// acquired so far.
    pub async fn acquire_many(
        &self,
        names: impl IntoIterator<Item = RefNameBuf>,
    ) -> Vec<(RefNameBuf, RefLockGuard)> {
        let names: Vec<RefNameBuf> = names.into_iter().sorted().dedup().collect();
        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            let guard = self.acquire(&name).await;
            guards.push((name, guard));
        }
        guards
    }
}
