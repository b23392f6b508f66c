// Copyright (C) 2021 Alibaba Cloud. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Crypto contexts binding a resolved cipher algorithm to backend private state.

use std::fmt::{self, Debug, Formatter};
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use blk_crypt_api::{CryptError, CryptResult, KeyPersistence};

use crate::algorithm::{CipherAlgorithm, DeviceId};
use crate::backend::CipherState;
use crate::key::KeyInfo;
use crate::manager::AlgorithmManager;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identity of a crypto context, attached to block IOs to be encrypted with the context.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CipherHandle(NonZeroU64);

impl CipherHandle {
    fn next() -> Self {
        let id = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        // Starts from 1 and can't wrap around within the lifetime of a process.
        CipherHandle(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }

    pub fn id(&self) -> u64 {
        self.0.get()
    }
}

/// Per-request binding between a cipher algorithm and its backend private state.
///
/// A context holds one reference to its algorithm. The reference and the private state are
/// released by [CipherContext::put()], or on drop if the owner never called it.
pub struct CipherContext {
    algorithm: Arc<CipherAlgorithm>,
    state: Option<CipherState>,
    handle: CipherHandle,
    pub(crate) key: Option<KeyInfo>,
    pub(crate) default_persistence: KeyPersistence,
}

impl CipherContext {
    /// Create a crypto context for cipher `name` on `device`.
    pub fn get(
        manager: &AlgorithmManager,
        device: Option<DeviceId>,
        name: &str,
    ) -> CryptResult<Self> {
        let algorithm = manager.resolve(device, name)?;
        let state = match algorithm.backend().alloc() {
            Ok(v) => v,
            Err(e) => {
                algorithm.put();
                warn!(
                    "blk-crypt: failed to allocate state for cipher {}, {}",
                    name, e
                );
                return Err(e.into());
            }
        };

        let ctx = CipherContext {
            algorithm,
            state: Some(state),
            handle: CipherHandle::next(),
            key: None,
            default_persistence: manager.config().default_key_persistence,
        };
        debug!(
            "blk-crypt: created context {} for cipher {}",
            ctx.handle.id(),
            name
        );

        Ok(ctx)
    }

    pub fn algorithm(&self) -> &Arc<CipherAlgorithm> {
        &self.algorithm
    }

    pub fn handle(&self) -> CipherHandle {
        self.handle
    }

    /// Get the backend private state, for backends performing the actual encryption.
    pub fn state(&self) -> CryptResult<&CipherState> {
        self.state
            .as_ref()
            .ok_or_else(|| CryptError::InvalidArgument("context has been released".to_string()))
    }

    pub(crate) fn state_mut(&mut self) -> CryptResult<&mut CipherState> {
        self.state
            .as_mut()
            .ok_or_else(|| CryptError::InvalidArgument("context has been released".to_string()))
    }

    /// Release the context.
    ///
    /// Backend private state is freed and the algorithm reference is dropped even if a step
    /// fails, the first failure is returned.
    pub fn put(mut self) -> CryptResult<()> {
        self.release()
    }

    fn release(&mut self) -> CryptResult<()> {
        let mut state = match self.state.take() {
            Some(v) => v,
            None => return Ok(()),
        };
        let backend = self.algorithm.backend().clone();
        let mut result = Ok(());

        if let Some(info) = self.key.take() {
            if info.persistence == KeyPersistence::Ephemeral {
                match backend.clear_key(&mut state) {
                    Ok(()) => {}
                    Err(e) => match CryptError::from(e) {
                        CryptError::Unsupported => {}
                        e => {
                            warn!(
                                "blk-crypt: failed to clear key of context {}, {}",
                                self.handle.id(),
                                e
                            );
                            result = Err(e);
                        }
                    },
                }
            }
        }

        if let Err(e) = backend.free(state) {
            warn!(
                "blk-crypt: failed to free state of context {}, {}",
                self.handle.id(),
                e
            );
            if result.is_ok() {
                result = Err(e.into());
            }
        }
        self.algorithm.put();
        debug!(
            "blk-crypt: released context {} of cipher {}",
            self.handle.id(),
            self.algorithm.name()
        );

        result
    }
}

impl Drop for CipherContext {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!("blk-crypt: failed to release crypto context, {}", e);
        }
    }
}

impl Debug for CipherContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("handle", &self.handle.id())
            .field("algorithm", &self.algorithm.name())
            .field("key", &self.key)
            .finish()
    }
}

/// Create a crypto context for cipher `name` on `device`.
pub fn get_context(
    manager: &AlgorithmManager,
    device: Option<DeviceId>,
    name: &str,
) -> CryptResult<CipherContext> {
    CipherContext::get(manager, device, name)
}

/// Release a crypto context, no-op for `None`.
pub fn put_context<C: Into<Option<CipherContext>>>(ctx: C) {
    if let Some(ctx) = ctx.into() {
        let handle = ctx.handle().id();
        if let Err(e) = ctx.put() {
            error!("blk-crypt: failed to release context {}, {}", handle, e);
        }
    }
}
