// Copyright 2020 Ant Group. All rights reserved.
// Copyright (C) 2021 Alibaba Cloud. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::backend::{downcast_state, downcast_state_mut, CipherBackend, CipherState};

#[derive(Default)]
pub(crate) struct MockState {
    pub key: Option<Vec<u8>>,
}

/// Cipher backend counting capability invocations, with failure injection.
#[derive(Default)]
pub(crate) struct MockBackend {
    pub allocs: AtomicUsize,
    pub frees: AtomicUsize,
    pub set_keys: AtomicUsize,
    pub clear_keys: AtomicUsize,
    pub fail_alloc: AtomicBool,
    pub fail_free: AtomicBool,
    pub fail_set_key: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_states(&self) -> usize {
        self.allocs.load(Ordering::Acquire) - self.frees.load(Ordering::Acquire)
    }
}

impl CipherBackend for MockBackend {
    fn alloc(&self) -> Result<CipherState> {
        if self.fail_alloc.load(Ordering::Acquire) {
            return Err(eio!("mock alloc failure"));
        }
        self.allocs.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MockState::default()))
    }

    fn free(&self, state: CipherState) -> Result<()> {
        downcast_state::<MockState>(&state)?;
        self.frees.fetch_add(1, Ordering::AcqRel);
        if self.fail_free.load(Ordering::Acquire) {
            return Err(eio!("mock free failure"));
        }
        Ok(())
    }

    fn get_key(&self, state: &CipherState) -> Result<Vec<u8>> {
        let state = downcast_state::<MockState>(state)?;
        state.key.clone().ok_or_else(|| enokey!("no key installed"))
    }

    fn set_key(&self, state: &mut CipherState, key: &[u8], size: u32) -> Result<()> {
        if self.fail_set_key.load(Ordering::Acquire) {
            return Err(std::io::Error::from_raw_os_error(libc::EKEYREJECTED));
        }
        let state = downcast_state_mut::<MockState>(state)?;
        state.key = Some(key[..size as usize].to_vec());
        self.set_keys.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn clear_key(&self, state: &mut CipherState) -> Result<()> {
        let state = downcast_state_mut::<MockState>(state)?;
        state.key = None;
        self.clear_keys.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Cipher backend implementing the mandatory capabilities only.
pub(crate) struct MinimalBackend;

impl CipherBackend for MinimalBackend {
    fn alloc(&self) -> Result<CipherState> {
        Ok(Box::new(()))
    }

    fn free(&self, _state: CipherState) -> Result<()> {
        Ok(())
    }
}
