// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Registered cipher algorithms and their reference counts.

use std::fmt::{self, Debug, Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::CipherBackend;

/// Maximum length in bytes of a cipher algorithm name.
pub const MAX_CIPHER_NAME_LEN: usize = 15;

// Set once unregistration has claimed an algorithm, no reference may be taken afterwards.
const REF_RETIRED: usize = 1 << (usize::BITS - 1);

const MINOR_BITS: u32 = 20;
const MINOR_MASK: u64 = (1 << MINOR_BITS) - 1;

/// Identifier of a block device, encoded as `major << 20 | minor`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Create a device identifier from major and minor numbers.
    pub const fn new(major: u32, minor: u32) -> Self {
        DeviceId(((major as u64) << MINOR_BITS) | (minor as u64 & MINOR_MASK))
    }

    pub fn major(&self) -> u32 {
        (self.0 >> MINOR_BITS) as u32
    }

    pub fn minor(&self) -> u32 {
        (self.0 & MINOR_MASK) as u32
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

/// Encryption mode tag of a cipher algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CryptMode(pub u32);

impl CryptMode {
    pub const AES_256_XTS: CryptMode = CryptMode(1);
    pub const AES_256_CTS: CryptMode = CryptMode(4);
    pub const AES_128_CBC: CryptMode = CryptMode(5);
    pub const AES_128_XTS: CryptMode = CryptMode(10);
    /// Reserved for private and test algorithms.
    pub const PRIVATE: CryptMode = CryptMode(u32::MAX);

    pub fn is_private(&self) -> bool {
        *self == Self::PRIVATE
    }
}

impl Display for CryptMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_private() {
            write!(f, "private")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A cipher algorithm registered by a backend driver.
///
/// The algorithm is shared between the registry and all crypto contexts bound to it. The
/// reference count tracks live contexts only, it is independent of the `Arc` strong count.
pub struct CipherAlgorithm {
    name: String,
    mode: CryptMode,
    device: Option<DeviceId>,
    refs: AtomicUsize,
    backend: Arc<dyn CipherBackend>,
}

impl CipherAlgorithm {
    pub(crate) fn new(
        device: Option<DeviceId>,
        name: &str,
        mode: CryptMode,
        backend: Arc<dyn CipherBackend>,
    ) -> Self {
        CipherAlgorithm {
            name: name.to_string(),
            mode,
            device,
            refs: AtomicUsize::new(0),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> CryptMode {
        self.mode
    }

    /// Get the owning block device, `None` for a global algorithm.
    pub fn device(&self) -> Option<DeviceId> {
        self.device
    }

    pub fn backend(&self) -> &Arc<dyn CipherBackend> {
        &self.backend
    }

    /// Get number of live crypto contexts bound to the algorithm.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire) & !REF_RETIRED
    }

    /// Check whether the algorithm is still registered.
    pub fn is_registered(&self) -> bool {
        self.refs.load(Ordering::Acquire) & REF_RETIRED == 0
    }

    /// Check whether the algorithm may serve requests for `device`.
    pub fn admits(&self, device: Option<DeviceId>) -> bool {
        self.device.is_none() || self.device == device
    }

    pub(crate) fn matches(&self, device: Option<DeviceId>, name: &str) -> bool {
        self.name == name && self.admits(device)
    }

    // Algorithms bound to different devices never conflict.
    pub(crate) fn conflicts_with(
        &self,
        device: Option<DeviceId>,
        name: &str,
        mode: CryptMode,
    ) -> bool {
        if self.device.is_some() && device.is_some() && self.device != device {
            return false;
        }
        self.mode == mode || self.name == name
    }

    /// Take a reference unless the algorithm has been retired.
    pub(crate) fn try_get(&self) -> bool {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                if v & REF_RETIRED != 0 {
                    None
                } else {
                    Some(v + 1)
                }
            })
            .is_ok()
    }

    /// Release a reference taken by resolving the algorithm.
    pub(crate) fn put(&self) {
        let ret = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                if v & !REF_RETIRED == 0 {
                    None
                } else {
                    Some(v - 1)
                }
            });
        if ret.is_err() {
            error!("blk-crypt: unbalanced reference release of cipher {}", self.name);
        }
    }

    /// Retire the algorithm, only succeeds when no reference is held.
    pub(crate) fn try_retire(&self) -> bool {
        self.refs
            .compare_exchange(0, REF_RETIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Debug for CipherAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherAlgorithm")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("device", &self.device)
            .field("refs", &self.ref_count())
            .field("registered", &self.is_registered())
            .finish()
    }
}
