// Copyright (C) 2022 Alibaba Cloud. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Key management on crypto contexts.
//!
//! Keys are handed to the backend of the context's algorithm. The context only remembers the
//! size and persistence of the installed key: an ephemeral key is cleared from the backend
//! when the context is released, a persistent key stays installed, for example in a hardware
//! key slot shared by later contexts.

use blk_crypt_api::{CryptError, CryptResult, KeyPersistence};
use zeroize::Zeroizing;

use crate::context::CipherContext;

/// Maximum size of a raw key in bytes, enough for AES-256-XTS.
pub const MAX_KEY_SIZE: usize = 64;

/// Information about the key installed into a crypto context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyInfo {
    pub size: u32,
    pub persistence: KeyPersistence,
}

fn validate_key(raw_key: &[u8], size: u32) -> CryptResult<()> {
    if size == 0 || size as usize > MAX_KEY_SIZE || size as usize != raw_key.len() {
        return Err(CryptError::InvalidArgument(format!(
            "key size {} with {} bytes of key material",
            size,
            raw_key.len()
        )));
    }
    Ok(())
}

impl CipherContext {
    /// Install a raw key with the default persistence of the algorithm manager.
    pub fn set_key(&mut self, raw_key: &[u8], size: u32) -> CryptResult<()> {
        let persistence = self.default_persistence;
        self.set_key_with(raw_key, size, persistence)
    }

    /// Install a raw key with explicit persistence.
    pub fn set_key_with(
        &mut self,
        raw_key: &[u8],
        size: u32,
        persistence: KeyPersistence,
    ) -> CryptResult<()> {
        validate_key(raw_key, size)?;

        let backend = self.algorithm().backend().clone();
        backend.set_key(self.state_mut()?, raw_key, size)?;
        self.key = Some(KeyInfo { size, persistence });
        trace!(
            "blk-crypt: installed {} key of {} bytes into context {}",
            persistence,
            size,
            self.handle().id()
        );

        Ok(())
    }

    /// Get the raw key installed into the context.
    pub fn get_key(&self) -> CryptResult<Zeroizing<Vec<u8>>> {
        let key = self.algorithm().backend().get_key(self.state()?)?;
        Ok(Zeroizing::new(key))
    }

    /// Remove the key from the context, whatever its persistence.
    pub fn clear_key(&mut self) -> CryptResult<()> {
        let backend = self.algorithm().backend().clone();
        backend.clear_key(self.state_mut()?)?;
        self.key = None;
        Ok(())
    }

    /// Get information about the installed key.
    pub fn key_info(&self) -> Option<KeyInfo> {
        self.key
    }
}
