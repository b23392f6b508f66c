// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Capability interface implemented by hardware and software cipher backends.
//!
//! A backend driver registers a [CipherBackend] object with the
//! [AlgorithmManager](../manager/struct.AlgorithmManager.html). The encryption layer never
//! inspects backend private data, it only moves the opaque [CipherState] between the
//! capability methods.

use std::any::Any;
use std::io::Result;

#[cfg(feature = "soft-cipher")]
pub mod soft;

/// Opaque, backend specific state bound to a crypto context.
pub type CipherState = Box<dyn Any + Send>;

/// Capability table of a cipher backend.
///
/// `alloc()` and `free()` are mandatory. Key management capabilities are optional and report
/// `EOPNOTSUPP` if the backend doesn't implement them.
pub trait CipherBackend: Send + Sync {
    /// Allocate private state for a new crypto context.
    fn alloc(&self) -> Result<CipherState>;

    /// Release private state allocated by `alloc()`.
    fn free(&self, state: CipherState) -> Result<()>;

    /// Get the raw key installed into the state.
    fn get_key(&self, _state: &CipherState) -> Result<Vec<u8>> {
        Err(eopnotsupp!("get_key"))
    }

    /// Install a raw key of `size` bytes into the state.
    fn set_key(&self, _state: &mut CipherState, _key: &[u8], _size: u32) -> Result<()> {
        Err(eopnotsupp!("set_key"))
    }

    /// Remove the key installed into the state.
    fn clear_key(&self, _state: &mut CipherState) -> Result<()> {
        Err(eopnotsupp!("clear_key"))
    }
}

/// Get a typed reference to backend private state.
pub fn downcast_state<T: 'static>(state: &CipherState) -> Result<&T> {
    state
        .downcast_ref::<T>()
        .ok_or_else(|| einval!("cipher state doesn't belong to the backend"))
}

/// Get a typed mutable reference to backend private state.
pub fn downcast_state_mut<T: 'static>(state: &mut CipherState) -> Result<&mut T> {
    state
        .downcast_mut::<T>()
        .ok_or_else(|| einval!("cipher state doesn't belong to the backend"))
}
