// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Store registry: named typed cells that other nodes can `get`/`put`.

use crate::codec::{Datatype, Value};
use crate::error::StoreError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A callable store's producer: invoked on every remote `get`, may suspend.
pub type Producer = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Value> + Send>> + Send + Sync>;

enum Store {
    Writable { dtype: Datatype, value: Value },
    Callable { dtype: Datatype, producer: Producer },
}

/// Result of `StoreRegistry::snapshot`: either the value is already in hand,
/// or a cloned producer the caller must invoke after releasing any lock it
/// took out on the registry.
pub enum StoreSnapshot {
    Value(Datatype, Value),
    Producer(Datatype, Producer),
}

/// Registry of named stores owned by this node.
#[derive(Default)]
pub struct StoreRegistry {
    stores: HashMap<String, Store>,
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.as_bytes().len() > 255 {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a writable store with an initial value.
    pub fn register_writable(
        &mut self,
        name: &str,
        dtype: Datatype,
        default: Value,
    ) -> Result<(), StoreError> {
        validate_name(name)?;
        if self.stores.contains_key(name) {
            return Err(StoreError::AlreadyRegistered(name.to_string()));
        }
        self.stores.insert(
            name.to_string(),
            Store::Writable { dtype, value: default },
        );
        Ok(())
    }

    /// Register a read-only store whose value is produced on demand.
    pub fn register_callable(
        &mut self,
        name: &str,
        dtype: Datatype,
        producer: Producer,
    ) -> Result<(), StoreError> {
        validate_name(name)?;
        if self.stores.contains_key(name) {
            return Err(StoreError::AlreadyRegistered(name.to_string()));
        }
        self.stores
            .insert(name.to_string(), Store::Callable { dtype, producer });
        Ok(())
    }

    /// Read a store's current value, invoking the producer for callables.
    pub async fn read(&self, name: &str) -> Result<(Datatype, Value), StoreError> {
        match self.stores.get(name) {
            Some(Store::Writable { dtype, value }) => Ok((*dtype, value.clone())),
            Some(Store::Callable { dtype, producer }) => Ok((*dtype, producer().await)),
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }

    /// Take a snapshot of a store without awaiting a callable's producer.
    ///
    /// Callers that hold this registry's lock across the snapshot must drop
    /// it before awaiting `StoreSnapshot::Producer`'s future, since the
    /// producer may call back into the node (e.g. `put`) and the registry's
    /// lock is not reentrant.
    pub fn snapshot(&self, name: &str) -> Result<StoreSnapshot, StoreError> {
        match self.stores.get(name) {
            Some(Store::Writable { dtype, value }) => Ok(StoreSnapshot::Value(*dtype, value.clone())),
            Some(Store::Callable { dtype, producer }) => {
                Ok(StoreSnapshot::Producer(*dtype, producer.clone()))
            }
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }

    /// Overwrite a writable store's value. Fails for callables or a dtype
    /// mismatch against the store's registered type.
    pub fn write(&mut self, name: &str, value: Value) -> Result<(), StoreError> {
        match self.stores.get_mut(name) {
            Some(Store::Writable { dtype, value: slot }) => {
                if *dtype != value.dtype() {
                    return Err(StoreError::TypeMismatch {
                        name: name.to_string(),
                        expected: dtype.wire_code(),
                        actual: value.dtype().wire_code(),
                    });
                }
                *slot = value;
                Ok(())
            }
            Some(Store::Callable { .. }) => Err(StoreError::ReadOnly(name.to_string())),
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }
}
