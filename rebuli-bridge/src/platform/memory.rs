use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rebuli_core::{EntityKey, SensorValue};

use super::{BusEvent, EntityHandle, EntityPlatform, EntitySpec};

/// In-memory entity platform.
/// This is primarily intended for testing and as a reference
/// implementation of the EntityPlatform trait.
#[derive(Clone, Default)]
pub struct MemoryPlatform {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Number of readiness probes left to answer with "not ready".
    not_ready_for: Option<u32>,
    readiness_probes: u32,
    entities: BTreeMap<EntityKey, MemoryEntity>,
    events: Vec<BusEvent>,
}

/// An entity as recorded by [`MemoryPlatform`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntity {
    pub spec: EntitySpec,
    /// Every value presented, starting with the initial one.
    pub history: Vec<SensorValue>,
}

impl MemoryEntity {
    pub fn value(&self) -> SensorValue {
        self.history
            .last()
            .copied()
            .unwrap_or(self.spec.initial_value)
    }
}

/// Error type for MemoryPlatform
#[derive(Debug)]
pub enum MemoryPlatformError {
    MutexPoisoned(String),
    UnknownEntity(EntityKey),
}

impl std::error::Error for MemoryPlatformError {}

impl fmt::Display for MemoryPlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryPlatformError::MutexPoisoned(msg) => write!(f, "Mutex poisoned: {}", msg),
            MemoryPlatformError::UnknownEntity(key) => write!(f, "Unknown entity: {}", key),
        }
    }
}

impl<T> From<PoisonError<T>> for MemoryPlatformError {
    fn from(err: PoisonError<T>) -> Self {
        MemoryPlatformError::MutexPoisoned(err.to_string())
    }
}

impl MemoryPlatform {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every readiness probe succeed (`true`) or fail (`false`).
    pub fn set_ready(&self, ready: bool) {
        self.lock().not_ready_for = if ready { None } else { Some(u32::MAX) };
    }

    /// Fail the next `probes` readiness probes, then become ready.
    pub fn set_ready_after(&self, probes: u32) {
        self.lock().not_ready_for = Some(probes);
    }

    pub fn readiness_probes(&self) -> u32 {
        self.lock().readiness_probes
    }

    pub fn entity(&self, key: &EntityKey) -> Option<MemoryEntity> {
        self.lock().entities.get(key).cloned()
    }

    pub fn entities(&self) -> Vec<MemoryEntity> {
        self.lock().entities.values().cloned().collect()
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.lock().events.clone()
    }
}

#[async_trait]
impl EntityPlatform for MemoryPlatform {
    type Handle = MemoryEntityHandle;
    type Error = MemoryPlatformError;

    async fn is_ready(&self) -> bool {
        let mut inner = self.lock();
        inner.readiness_probes += 1;

        match inner.not_ready_for {
            None => true,
            Some(0) => {
                inner.not_ready_for = None;
                true
            }
            Some(u32::MAX) => false,
            Some(remaining) => {
                inner.not_ready_for = Some(remaining - 1);
                false
            }
        }
    }

    async fn create_entity(&self, spec: &EntitySpec) -> Result<Self::Handle, Self::Error> {
        let mut inner = self.inner.lock()?;

        inner.entities.insert(
            spec.key.clone(),
            MemoryEntity {
                spec: spec.clone(),
                history: vec![spec.initial_value],
            },
        );

        Ok(MemoryEntityHandle {
            key: spec.key.clone(),
            inner: Arc::clone(&self.inner),
        })
    }

    async fn fire_event(&self, event: BusEvent) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock()?;
        inner.events.push(event);
        Ok(())
    }
}

pub struct MemoryEntityHandle {
    key: EntityKey,
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl EntityHandle for MemoryEntityHandle {
    type Error = MemoryPlatformError;

    async fn set_value(&self, value: SensorValue) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock()?;

        let entity = inner
            .entities
            .get_mut(&self.key)
            .ok_or_else(|| MemoryPlatformError::UnknownEntity(self.key.clone()))?;
        entity.history.push(value);

        Ok(())
    }
}
