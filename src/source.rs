// ============================================================================
// source.rs — Heatmask
// Heat sources and the registry that tracks them between frames.
// ============================================================================

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use crate::error::HeatmaskError;

// ======================== Heat Source ========================

/// Current values of one heat source.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SourceState {
    /// Position on the ground plane (x, z).
    pub position: [f32; 2],
    pub range: f32,
    pub heat: f32,
}

/// A building contributing heat to the mask.
///
/// Owned by the host (usually as `Arc<HeatSource>`); the registry only keeps a
/// weak reference. Values can be changed between ticks and the next
/// aggregation picks them up.
#[derive(Debug)]
pub struct HeatSource {
    state: RwLock<SourceState>,
}

impl HeatSource {
    pub fn new(position: [f32; 2], range: f32, heat: f32) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(SourceState {
                position,
                range,
                heat,
            }),
        })
    }

    pub fn state(&self) -> SourceState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_position(&self, position: [f32; 2]) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).position = position;
    }

    pub fn set_range(&self, range: f32) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).range = range;
    }

    pub fn set_heat(&self, heat: f32) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).heat = heat;
    }
}

// ======================== Registry ========================

/// Identifies one registration; pass it back to `deregister`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceKey {
    generation: u64,
    id: u64,
}

struct Entry {
    id: u64,
    source: Weak<HeatSource>,
    /// Set once the dropped source has been logged.
    reported: bool,
}

struct RegistryState {
    generation: u64,
    next_id: u64,
    entries: Vec<Entry>,
}

/// Ordered list of registered heat sources.
///
/// Structural mutation and snapshotting are serialized by a mutex, so sources
/// may register from threads other than the one driving the frame loop.
pub struct SourceRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                generation: 0,
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Handle given to sources so they can register themselves.
    pub fn handle(&self) -> RegistryHandle {
        let generation = lock(&self.state).generation;
        RegistryHandle {
            state: Arc::clone(&self.state),
            generation,
        }
    }

    /// Number of entries, including ones whose source has been dropped.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the live sources in registration order.
    ///
    /// Entries whose source was dropped by the host are skipped but stay
    /// registered until `deregister` or `prune_expired` removes them.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut state = lock(&self.state);
        let mut sources = Vec::with_capacity(state.entries.len());
        let mut newly_expired = 0usize;
        for entry in state.entries.iter_mut() {
            match entry.source.upgrade() {
                Some(source) => sources.push(source),
                None if !entry.reported => {
                    entry.reported = true;
                    newly_expired += 1;
                }
                None => {}
            }
        }
        if newly_expired > 0 {
            log::warn!(
                "{} registered heat source(s) were dropped without deregistering",
                newly_expired
            );
        }
        RegistrySnapshot { sources }
    }

    /// Remove one registration. Returns false if it was already gone.
    pub fn deregister(&self, key: SourceKey) -> bool {
        let mut state = lock(&self.state);
        if state.generation != key.generation {
            return false;
        }
        let before = state.entries.len();
        state.entries.retain(|e| e.id != key.id);
        state.entries.len() != before
    }

    /// Remove entries whose source no longer exists. Returns how many.
    pub fn prune_expired(&self) -> usize {
        let mut state = lock(&self.state);
        let before = state.entries.len();
        state.entries.retain(|e| e.source.strong_count() > 0);
        before - state.entries.len()
    }

    /// Drop every registration and invalidate all outstanding handles.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.entries.clear();
        log::info!("Source registry reset (generation {})", state.generation);
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration entry point handed to heat sources.
#[derive(Clone)]
pub struct RegistryHandle {
    state: Arc<Mutex<RegistryState>>,
    generation: u64,
}

impl RegistryHandle {
    /// Append a source. Duplicates are not checked.
    ///
    /// Fails if the registry has been reset since this handle was issued.
    pub fn register(&self, source: &Arc<HeatSource>) -> Result<SourceKey, HeatmaskError> {
        let mut state = lock(&self.state);
        if state.generation != self.generation {
            return Err(HeatmaskError::usage(format!(
                "registry handle from generation {} used after reset (current generation {})",
                self.generation, state.generation
            )));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push(Entry {
            id,
            source: Arc::downgrade(source),
            reported: false,
        });
        Ok(SourceKey {
            generation: self.generation,
            id,
        })
    }
}

/// Sources captured by `SourceRegistry::snapshot`.
pub struct RegistrySnapshot {
    sources: Vec<Arc<HeatSource>>,
}

impl RegistrySnapshot {
    pub fn sources(&self) -> &[Arc<HeatSource>] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn lock(state: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
