//! Per-address advisory locks
//!
//! One commissioning run per leaf address at a time. A second run for the
//! same address is refused immediately rather than queued.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use leafmesh_common::{Error, Result};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct AddressLocks {
    held: Arc<DashMap<String, ()>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `address`, or fail with `Busy`
    pub fn try_acquire(&self, address: &str) -> Result<AddressGuard> {
        match self.held.entry(address.to_string()) {
            Entry::Occupied(_) => Err(Error::Busy {
                address: address.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(AddressGuard {
                    held: self.held.clone(),
                    address: address.to_string(),
                })
            }
        }
    }

    pub fn is_held(&self, address: &str) -> bool {
        self.held.contains_key(address)
    }
}

/// Releases the address on drop
pub struct AddressGuard {
    held: Arc<DashMap<String, ()>>,
    address: String,
}

impl Drop for AddressGuard {
    fn drop(&mut self) {
        self.held.remove(&self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_busy() {
        let locks = AddressLocks::new();
        let guard = locks.try_acquire("10.0.0.5").unwrap();
        assert!(matches!(locks.try_acquire("10.0.0.5"), Err(Error::Busy { .. })));
        assert!(locks.try_acquire("10.0.0.6").is_ok());

        drop(guard);
        assert!(!locks.is_held("10.0.0.5"));
        assert!(locks.try_acquire("10.0.0.5").is_ok());
    }
}
