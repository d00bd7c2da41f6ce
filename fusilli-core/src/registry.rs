// Copyright 2025 Fusilli Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Registry of live tailers.
//!
//! The registry hands out process-unique [`TailerId`]s and keeps the tailers
//! it identified reachable by id. Tailers only hold a weak reference back to
//! the registry, so dropping the registry does not leak them.
//!
//! Identity assignment runs under the registry lock: concurrent calls on
//! different tailers get distinct ids, repeated calls on the same tailer
//! return the id it already has.

use crate::tailer::{Tailer, TailerId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct RegistryInner {
    last_id: u64,
    tailers: HashMap<TailerId, Arc<Tailer>>,
}

/// Process-wide table of identified tailers.
#[derive(Debug, Default)]
pub struct TailerRegistry {
    inner: Mutex<RegistryInner>,
}

impl TailerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Assigns an identity to `tailer` if it has none and registers it.
    pub(crate) fn register(&self, tailer: &Arc<Tailer>) -> TailerId {
        let mut inner = self.inner.lock();
        let next = inner.last_id + 1;
        let (id, assigned) = tailer.identity_or_assign(|| TailerId(next));
        if assigned {
            inner.last_id = next;
            debug!(tailer = %id, "Tailer identity assigned");
        }
        inner
            .tailers
            .entry(id)
            .or_insert_with(|| Arc::clone(tailer));
        id
    }

    pub(crate) fn deregister(&self, id: TailerId) -> Option<Arc<Tailer>> {
        let removed = self.inner.lock().tailers.remove(&id);
        if removed.is_some() {
            debug!(tailer = %id, "Tailer removed from registry");
        }
        removed
    }

    /// Looks up a registered tailer.
    #[must_use]
    pub fn get(&self, id: TailerId) -> Option<Arc<Tailer>> {
        self.inner.lock().tailers.get(&id).cloned()
    }

    /// Registered ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<TailerId> {
        let mut ids: Vec<TailerId> = self.inner.lock().tailers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered tailers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().tailers.len()
    }

    /// Returns true if no tailer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests every registered tailer to stop.
    pub fn stop_all(&self) {
        let tailers: Vec<Arc<Tailer>> = self.inner.lock().tailers.values().cloned().collect();
        for tailer in tailers {
            tailer.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemoryOplog;
    use crate::tailer::TailerPhase;

    fn tailer(registry: &Arc<TailerRegistry>) -> Arc<Tailer> {
        Tailer::builder()
            .source(Arc::new(MemoryOplog::new()))
            .address("memory")
            .registry(registry)
            .build()
            .unwrap()
    }

    #[test]
    fn test_identity_is_idempotent() {
        let registry = TailerRegistry::new();
        let tailer = tailer(&registry);
        assert!(tailer.id().is_none());

        let first = tailer.assign_identity().unwrap();
        let second = tailer.assign_identity().unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_tailers_get_distinct_ids() {
        let registry = TailerRegistry::new();
        let a = tailer(&registry).assign_identity().unwrap();
        let b = tailer(&registry).assign_identity().unwrap();

        assert_ne!(a, b);
        assert_eq!(registry.ids(), vec![a, b]);
    }

    #[test]
    fn test_remove_stops_and_deregisters() {
        let registry = TailerRegistry::new();
        let tailer = tailer(&registry);
        let id = tailer.assign_identity().unwrap();

        tailer.remove();
        assert_eq!(tailer.phase(), TailerPhase::Stopped);
        assert!(registry.get(id).is_none());
        assert_eq!(tailer.id(), Some(id));
    }

    #[test]
    fn test_stop_all() {
        let registry = TailerRegistry::new();
        let a = tailer(&registry);
        let b = tailer(&registry);
        a.assign_identity().unwrap();
        b.assign_identity().unwrap();

        registry.stop_all();
        assert_eq!(a.phase(), TailerPhase::Stopped);
        assert_eq!(b.phase(), TailerPhase::Stopped);
    }

    #[test]
    fn test_dropped_registry_is_unavailable() {
        let registry = TailerRegistry::new();
        let tailer = tailer(&registry);
        drop(registry);

        assert!(tailer.assign_identity().is_err());
    }
}
