// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Encryption attributes of block IOs and the rules to merge encrypted IOs.
//!
//! A [BlockIo] starts unbound. Binding it to a crypto context attaches a [BioCrypt] carrying
//! the context's [CipherHandle] and, optionally, the range of data unit numbers covered by the
//! IO. Backends derive the IV of each data unit from its number, so two IOs may only be merged
//! when they use the same context and their data unit numbers are contiguous.

use std::fmt::{self, Debug, Formatter};

use blk_crypt_api::{CryptConfig, CryptError, CryptResult};

use crate::context::{CipherContext, CipherHandle};

/// Shift to convert between bytes and 512-byte sectors.
pub const SECTOR_SHIFT: u32 = 9;
/// Size of a sector in bytes.
pub const SECTOR_SIZE: u64 = 1 << SECTOR_SHIFT;

bitflags! {
    /// Flags of a block IO.
    pub struct BioFlags: u32 {
        /// Data flows from memory to the device.
        const WRITE = 0x0000_0001;
        /// Data is encrypted or decrypted inline with the IO.
        const ENCRYPTED = 0x0000_0002;
    }
}

impl Default for BioFlags {
    fn default() -> Self {
        BioFlags::empty()
    }
}

/// Range of data unit numbers `[start, end)` covered by an IO.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DunRange {
    pub start: u64,
    pub end: u64,
}

impl DunRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        DunRange { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check whether `next` immediately follows the range.
    pub fn is_followed_by(&self, next: &DunRange) -> bool {
        self.end == next.start
    }
}

/// Encryption attributes attached to a block IO.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BioCrypt {
    pub handle: CipherHandle,
    pub dun: Option<DunRange>,
}

impl BioCrypt {
    pub fn new(handle: CipherHandle, dun: Option<DunRange>) -> Self {
        BioCrypt { handle, dun }
    }
}

/// A block IO request with optional encryption attributes.
#[derive(Clone, Default)]
pub struct BlockIo {
    /// Start sector of the IO.
    pub sector: u64,
    /// Size of the IO in bytes.
    pub size: u32,
    pub flags: BioFlags,
    crypt: Option<BioCrypt>,
}

impl BlockIo {
    /// Create a new unbound block IO.
    pub fn new(sector: u64, size: u32, flags: BioFlags) -> Self {
        BlockIo {
            sector,
            size,
            flags,
            crypt: None,
        }
    }

    /// Get the sector following the last sector of the IO, `None` if it overflows.
    pub fn end_sector(&self) -> Option<u64> {
        self.sector.checked_add(self.size as u64 >> SECTOR_SHIFT)
    }

    pub fn crypt(&self) -> Option<&BioCrypt> {
        self.crypt.as_ref()
    }

    pub fn cipher_handle(&self) -> Option<CipherHandle> {
        self.crypt.map(|c| c.handle)
    }

    pub fn start_dun(&self) -> Option<u64> {
        self.crypt.and_then(|c| c.dun).map(|d| d.start)
    }

    pub fn end_dun(&self) -> Option<u64> {
        self.crypt.and_then(|c| c.dun).map(|d| d.end)
    }

    /// Attach encryption attributes to an unbound IO and mark it encrypted.
    ///
    /// The attributes of a bound IO are immutable until [BlockIo::release()].
    pub fn set_crypt(&mut self, crypt: BioCrypt) -> CryptResult<()> {
        if self.crypt.is_some() {
            return Err(CryptError::InvalidArgument(format!(
                "IO at sector {} is already bound to a crypto context",
                self.sector
            )));
        }
        self.crypt = Some(crypt);
        self.flags.insert(BioFlags::ENCRYPTED);
        Ok(())
    }

    /// Bind the IO to `ctx`, the first data unit of the IO being number `dun`.
    pub fn bind(
        &mut self,
        ctx: &CipherContext,
        dun: Option<u64>,
        config: &CryptConfig,
    ) -> CryptResult<()> {
        if !config.validate() {
            return Err(CryptError::InvalidArgument(format!(
                "invalid data unit size {}",
                config.data_unit_size
            )));
        }
        let unit_size = config.data_unit_size as u64;
        if self.size as u64 % unit_size != 0 || (self.sector << SECTOR_SHIFT) % unit_size != 0 {
            return Err(CryptError::InvalidArgument(format!(
                "IO at sector {} size {} is not aligned to data unit size {}",
                self.sector, self.size, unit_size
            )));
        }
        let range = match dun {
            Some(start) => {
                let end = start
                    .checked_add(self.size as u64 / unit_size)
                    .ok_or_else(|| {
                        CryptError::InvalidArgument(format!("data unit number {} overflows", start))
                    })?;
                Some(DunRange::new(start, end))
            }
            None => None,
        };
        self.set_crypt(BioCrypt::new(ctx.handle(), range))
    }

    /// Detach the encryption attributes, the IO becomes plaintext.
    pub fn release(&mut self) -> Option<BioCrypt> {
        self.flags.remove(BioFlags::ENCRYPTED);
        self.crypt.take()
    }

    /// Get the data unit number of the data unit containing `sector`.
    pub fn dun_at(&self, sector: u64, config: &CryptConfig) -> Option<u64> {
        if !config.validate() || sector < self.sector || sector >= self.end_sector()? {
            return None;
        }
        let start = self.start_dun()?;
        Some(start + (sector - self.sector) / config.sectors_per_data_unit())
    }

    /// Try to append `next` to the IO.
    ///
    /// Succeeds only if `next` starts where the IO ends, both move data in the same direction
    /// and [mergeable()] allows it. The merged IO keeps a data unit range only if the range of
    /// `next` directly follows its own, otherwise the range is dropped.
    pub fn try_merge(&mut self, next: &BlockIo, config: &CryptConfig) -> bool {
        if self.end_sector() != Some(next.sector)
            || self.flags.contains(BioFlags::WRITE) != next.flags.contains(BioFlags::WRITE)
            || !mergeable(config, self, next)
        {
            return false;
        }
        let size = match self.size.checked_add(next.size) {
            Some(v) => v,
            None => return false,
        };

        let dun = match (self.crypt.and_then(|c| c.dun), next.crypt.and_then(|c| c.dun)) {
            (Some(dun), Some(next_dun)) if dun.is_followed_by(&next_dun) => {
                Some(DunRange::new(dun.start, next_dun.end))
            }
            _ => None,
        };
        self.size = size;
        if let Some(crypt) = self.crypt.as_mut() {
            crypt.dun = dun;
        }

        true
    }
}

impl Debug for BlockIo {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("BlockIo")
            .field("sector", &self.sector)
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("cipher", &self.cipher_handle().map(|h| h.id()))
            .field("dun", &self.crypt.and_then(|c| c.dun))
            .finish()
    }
}

/// Check whether the IO is encrypted inline.
pub fn is_encrypted(io: &BlockIo) -> bool {
    io.flags.contains(BioFlags::ENCRYPTED) && io.crypt.is_some()
}

/// Check whether `next` may be merged after `io` without breaking IV derivation.
pub fn mergeable(config: &CryptConfig, io: &BlockIo, next: &BlockIo) -> bool {
    if !config.enable {
        return true;
    }
    if io.cipher_handle() != next.cipher_handle() {
        return false;
    }
    if config.dun_tracking && is_encrypted(io) && is_encrypted(next) {
        return match (io.crypt.and_then(|c| c.dun), next.crypt.and_then(|c| c.dun)) {
            (None, None) => true,
            (Some(dun), Some(next_dun)) => dun.is_followed_by(&next_dun),
            _ => false,
        };
    }

    true
}
