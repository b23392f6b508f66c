// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Registry of cipher algorithms provided by backend drivers.
//!
//! The [AlgorithmManager] keeps registered [CipherAlgorithm] objects in registration order and
//! resolves cipher names requested by filesystems into algorithms. Registration, unregistration
//! and the slow lookup path serialize on one lock. The reference count of an algorithm is
//! atomic and may only be taken while the algorithm hasn't been retired by unregistration, so a
//! resolver can never hand out an algorithm which is being destroyed.
//!
//! The lock is a plain `std::sync::Mutex`. Callers which run with interrupts disabled have no
//! equivalent in userspace.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use blk_crypt_api::{CryptConfig, CryptError, CryptResult};

use crate::algorithm::{CipherAlgorithm, CryptMode, DeviceId, MAX_CIPHER_NAME_LEN};
use crate::backend::CipherBackend;

lazy_static::lazy_static! {
    /// Default algorithm manager of the process.
    pub static ref ALGORITHM_MANAGER: AlgorithmManager = AlgorithmManager::default();
}

/// Registry of cipher algorithms.
pub struct AlgorithmManager {
    config: CryptConfig,
    algorithms: Mutex<Vec<Arc<CipherAlgorithm>>>,
    // Advisory only, always validated before use.
    last_accessed: ArcSwapOption<CipherAlgorithm>,
}

impl AlgorithmManager {
    /// Create a new instance of [AlgorithmManager].
    pub fn new(config: CryptConfig) -> Self {
        AlgorithmManager {
            config,
            algorithms: Mutex::new(Vec::new()),
            last_accessed: ArcSwapOption::empty(),
        }
    }

    pub fn config(&self) -> &CryptConfig {
        &self.config
    }

    /// Register a cipher algorithm.
    ///
    /// An algorithm conflicts with a registered one sharing its mode or its name, unless both
    /// are bound to different devices.
    pub fn register_algorithm(
        &self,
        device: Option<DeviceId>,
        name: &str,
        mode: CryptMode,
        backend: Arc<dyn CipherBackend>,
    ) -> CryptResult<Arc<CipherAlgorithm>> {
        if name.is_empty() || name.len() > MAX_CIPHER_NAME_LEN {
            return Err(CryptError::InvalidArgument(format!(
                "cipher name `{}` should have 1 to {} bytes",
                name, MAX_CIPHER_NAME_LEN
            )));
        }

        let mut guard = self.algorithms.lock().unwrap();
        if let Some(alg) = guard
            .iter()
            .find(|alg| alg.conflicts_with(device, name, mode))
        {
            warn!(
                "blk-crypt: cipher {} mode {} conflicts with registered cipher {} mode {}",
                name,
                mode,
                alg.name(),
                alg.mode()
            );
            return Err(CryptError::AlreadyExists);
        }

        let alg = Arc::new(CipherAlgorithm::new(device, name, mode, backend));
        guard.push(alg.clone());
        drop(guard);

        match device {
            Some(dev) => info!(
                "blk-crypt: registered cipher {} mode {} on device {}",
                name, mode, dev
            ),
            None => info!("blk-crypt: registered cipher {} mode {}", name, mode),
        }

        Ok(alg)
    }

    /// Unregister a cipher algorithm which has no live crypto context.
    pub fn unregister_algorithm(&self, alg: &Arc<CipherAlgorithm>) -> CryptResult<()> {
        let mut guard = self.algorithms.lock().unwrap();
        let index = guard
            .iter()
            .position(|v| Arc::ptr_eq(v, alg))
            .ok_or_else(|| {
                CryptError::InvalidArgument(format!("cipher {} is not registered", alg.name()))
            })?;
        if !alg.try_retire() {
            debug!(
                "blk-crypt: cipher {} is still used by {} contexts",
                alg.name(),
                alg.ref_count()
            );
            return Err(CryptError::Busy);
        }

        guard.remove(index);
        let cached = self.last_accessed.load_full();
        if cached.map_or(false, |v| Arc::ptr_eq(&v, alg)) {
            self.last_accessed.store(None);
        }
        drop(guard);

        info!(
            "blk-crypt: unregistered cipher {} mode {}",
            alg.name(),
            alg.mode()
        );

        Ok(())
    }

    /// Resolve a cipher name for `device` and take a reference to the algorithm.
    ///
    /// The reference is owned by the crypto context created from it and released with the
    /// context, see [CipherContext::get()](crate::context::CipherContext::get).
    pub(crate) fn resolve(
        &self,
        device: Option<DeviceId>,
        name: &str,
    ) -> CryptResult<Arc<CipherAlgorithm>> {
        if let Some(alg) = self.last_accessed.load_full() {
            if alg.matches(device, name) && alg.try_get() {
                return Ok(alg);
            }
        }

        let guard = self.algorithms.lock().unwrap();
        for alg in guard.iter() {
            // Algorithms on the list are never retired.
            if alg.matches(device, name) && alg.try_get() {
                self.last_accessed.store(Some(alg.clone()));
                return Ok(alg.clone());
            }
        }

        Err(CryptError::NotFound)
    }

    /// Find a registered algorithm without taking a reference.
    pub fn lookup(&self, device: Option<DeviceId>, name: &str) -> Option<Arc<CipherAlgorithm>> {
        self.algorithms
            .lock()
            .unwrap()
            .iter()
            .find(|alg| alg.matches(device, name))
            .cloned()
    }

    /// Get a snapshot of registered algorithms in registration order.
    pub fn algorithms(&self) -> Vec<Arc<CipherAlgorithm>> {
        self.algorithms.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.algorithms.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn cached(&self) -> Option<Arc<CipherAlgorithm>> {
        self.last_accessed.load_full()
    }
}

impl Default for AlgorithmManager {
    fn default() -> Self {
        Self::new(CryptConfig::default())
    }
}
