// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use blk_crypt::backend::{downcast_state, CipherBackend, CipherState};

/// Cipher backend without key support, counting its private states.
#[derive(Default)]
pub struct CountingBackend {
    pub allocs: AtomicUsize,
    pub frees: AtomicUsize,
    pub fail_alloc: AtomicBool,
}

impl CountingBackend {
    pub fn live_states(&self) -> usize {
        self.allocs.load(Ordering::Acquire) - self.frees.load(Ordering::Acquire)
    }
}

impl CipherBackend for CountingBackend {
    fn alloc(&self) -> Result<CipherState> {
        if self.fail_alloc.load(Ordering::Acquire) {
            return Err(std::io::Error::from_raw_os_error(libc::ENOMEM));
        }
        self.allocs.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(self.allocs.load(Ordering::Acquire)))
    }

    fn free(&self, state: CipherState) -> Result<()> {
        downcast_state::<usize>(&state)?;
        self.frees.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
