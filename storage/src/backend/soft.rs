// Copyright (C) 2022 Alibaba Cloud. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Software cipher backend based on openssl, for devices without inline encryption hardware.
//!
//! Each data unit is encrypted independently with AES-XTS, the tweak being the little endian
//! encoding of its data unit number.

use std::fmt::{self, Display, Formatter};
use std::io::Result;
use std::str::FromStr;

use openssl::symm;
use zeroize::Zeroizing;

use super::{downcast_state, downcast_state_mut, CipherBackend, CipherState};

/// Size of the XTS tweak derived from a data unit number.
pub const XTS_IV_SIZE: usize = 16;

/// Ciphers supported by [SoftCipherBackend].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SoftCipherKind {
    Aes128Xts,
    Aes256Xts,
}

impl SoftCipherKind {
    /// Size of the raw key, both XTS halves included.
    pub fn key_size(&self) -> usize {
        match self {
            SoftCipherKind::Aes128Xts => 32,
            SoftCipherKind::Aes256Xts => 64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SoftCipherKind::Aes128Xts => "aes128xts",
            SoftCipherKind::Aes256Xts => "aes256xts",
        }
    }

    fn cipher(&self) -> symm::Cipher {
        match self {
            SoftCipherKind::Aes128Xts => symm::Cipher::aes_128_xts(),
            SoftCipherKind::Aes256Xts => symm::Cipher::aes_256_xts(),
        }
    }
}

impl Display for SoftCipherKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SoftCipherKind {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "aes128xts" => Ok(Self::Aes128Xts),
            "aes256xts" => Ok(Self::Aes256Xts),
            _ => Err(einval!("cipher should be aes128xts or aes256xts")),
        }
    }
}

/// Convert a data unit number into an XTS tweak.
pub fn dun_to_iv(dun: u64) -> [u8; XTS_IV_SIZE] {
    let mut iv = [0u8; XTS_IV_SIZE];
    iv[..8].copy_from_slice(&dun.to_le_bytes());
    iv
}

#[derive(Default)]
struct SoftCipherState {
    key: Option<Zeroizing<Vec<u8>>>,
}

/// Cipher backend encrypting data units in software.
pub struct SoftCipherBackend {
    kind: SoftCipherKind,
}

impl SoftCipherBackend {
    pub fn new(kind: SoftCipherKind) -> Self {
        SoftCipherBackend { kind }
    }

    pub fn kind(&self) -> SoftCipherKind {
        self.kind
    }

    /// Encrypt one data unit with the key installed into `state`.
    pub fn encrypt_unit(&self, state: &CipherState, dun: u64, data: &[u8]) -> Result<Vec<u8>> {
        self.crypt_unit(state, symm::Mode::Encrypt, dun, data)
    }

    /// Decrypt one data unit with the key installed into `state`.
    pub fn decrypt_unit(&self, state: &CipherState, dun: u64, data: &[u8]) -> Result<Vec<u8>> {
        self.crypt_unit(state, symm::Mode::Decrypt, dun, data)
    }

    fn crypt_unit(
        &self,
        state: &CipherState,
        mode: symm::Mode,
        dun: u64,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let state = downcast_state::<SoftCipherState>(state)?;
        let key = state
            .key
            .as_ref()
            .ok_or_else(|| enokey!("no key installed"))?;
        if data.len() < XTS_IV_SIZE {
            return Err(einval!(format!(
                "data unit of {} bytes is too small for XTS",
                data.len()
            )));
        }

        let cipher = self.kind.cipher();
        let iv = dun_to_iv(dun);
        let mut out = vec![0u8; data.len() + cipher.block_size()];
        let count = symm::Crypter::new(cipher, mode, key, Some(&iv))
            .and_then(|mut c| {
                let count = c.update(data, &mut out)?;
                let rest = c.finalize(&mut out[count..])?;
                Ok(count + rest)
            })
            .map_err(|e| eother!(format!("failed to process data unit {}, {}", dun, e)))?;
        out.truncate(count);

        Ok(out)
    }
}

impl CipherBackend for SoftCipherBackend {
    fn alloc(&self) -> Result<CipherState> {
        Ok(Box::new(SoftCipherState::default()))
    }

    fn free(&self, state: CipherState) -> Result<()> {
        downcast_state::<SoftCipherState>(&state)?;
        Ok(())
    }

    fn get_key(&self, state: &CipherState) -> Result<Vec<u8>> {
        let state = downcast_state::<SoftCipherState>(state)?;
        state
            .key
            .as_ref()
            .map(|k| k.to_vec())
            .ok_or_else(|| enokey!("no key installed"))
    }

    fn set_key(&self, state: &mut CipherState, key: &[u8], size: u32) -> Result<()> {
        let size = size as usize;
        if size != self.kind.key_size() || key.len() < size {
            return Err(einval!(format!(
                "{} needs a key of {} bytes, got {}",
                self.kind,
                self.kind.key_size(),
                size
            )));
        }
        let key = &key[..size];
        let half = size >> 1;
        if key[..half] == key[half..] {
            return Err(einval!("XTS key halves must not be identical"));
        }

        let state = downcast_state_mut::<SoftCipherState>(state)?;
        state.key = Some(Zeroizing::new(key.to_vec()));
        Ok(())
    }

    fn clear_key(&self, state: &mut CipherState) -> Result<()> {
        let state = downcast_state_mut::<SoftCipherState>(state)?;
        state.key = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(kind: SoftCipherKind) -> Vec<u8> {
        (0..kind.key_size()).map(|v| v as u8).collect()
    }

    #[test]
    fn test_cipher_kind() {
        assert_eq!(
            SoftCipherKind::from_str("aes128xts").unwrap(),
            SoftCipherKind::Aes128Xts
        );
        assert_eq!(
            "aes256xts".parse::<SoftCipherKind>().unwrap(),
            SoftCipherKind::Aes256Xts
        );
        assert!(SoftCipherKind::from_str("aes256gcm").is_err());
        assert_eq!(SoftCipherKind::Aes128Xts.key_size(), 32);
        assert_eq!(SoftCipherKind::Aes256Xts.key_size(), 64);
        assert_eq!(SoftCipherKind::Aes256Xts.to_string(), "aes256xts");
    }

    #[test]
    fn test_dun_to_iv() {
        assert_eq!(dun_to_iv(0), [0u8; 16]);
        let iv = dun_to_iv(0x0102);
        assert_eq!(iv[0], 0x02);
        assert_eq!(iv[1], 0x01);
        assert_eq!(&iv[2..], &[0u8; 14]);
    }

    #[test]
    fn test_encrypt_decrypt_unit() {
        for kind in [SoftCipherKind::Aes128Xts, SoftCipherKind::Aes256Xts] {
            let backend = SoftCipherBackend::new(kind);
            let mut state = backend.alloc().unwrap();
            let key = test_key(kind);
            backend
                .set_key(&mut state, &key, key.len() as u32)
                .unwrap();
            assert_eq!(backend.get_key(&state).unwrap(), key);

            let data = vec![0x33u8; 4096];
            let c1 = backend.encrypt_unit(&state, 1, &data).unwrap();
            let c2 = backend.encrypt_unit(&state, 2, &data).unwrap();
            assert_eq!(c1.len(), data.len());
            assert_ne!(c1, data);
            assert_ne!(c1, c2);
            assert_eq!(backend.encrypt_unit(&state, 1, &data).unwrap(), c1);

            assert_eq!(backend.decrypt_unit(&state, 1, &c1).unwrap(), data);
            assert_ne!(backend.decrypt_unit(&state, 2, &c1).unwrap(), data);

            // Ciphertext stealing for sizes not aligned to the AES block.
            let odd = vec![0x44u8; 17];
            let c = backend.encrypt_unit(&state, 7, &odd).unwrap();
            assert_eq!(c.len(), 17);
            assert_eq!(backend.decrypt_unit(&state, 7, &c).unwrap(), odd);

            backend.free(state).unwrap();
        }
    }

    #[test]
    fn test_invalid_unit() {
        let backend = SoftCipherBackend::new(SoftCipherKind::Aes128Xts);
        let mut state = backend.alloc().unwrap();

        let err = backend.encrypt_unit(&state, 0, &[0u8; 512]).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOKEY));

        let key = test_key(SoftCipherKind::Aes128Xts);
        backend.set_key(&mut state, &key, 32).unwrap();
        let err = backend.encrypt_unit(&state, 0, &[0u8; 15]).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));

        let foreign: CipherState = Box::new(0u32);
        assert!(backend.encrypt_unit(&foreign, 0, &[0u8; 512]).is_err());
        assert!(backend.free(foreign).is_err());
    }

    #[test]
    fn test_set_invalid_key() {
        let backend = SoftCipherBackend::new(SoftCipherKind::Aes256Xts);
        let mut state = backend.alloc().unwrap();

        let err = backend.set_key(&mut state, &[1u8; 32], 32).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
        let err = backend.set_key(&mut state, &[1u8; 32], 64).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));

        let mut key = [0x5au8; 64];
        let err = backend.set_key(&mut state, &key, 64).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
        key[63] = 0xa5;
        backend.set_key(&mut state, &key, 64).unwrap();

        backend.clear_key(&mut state).unwrap();
        let err = backend.get_key(&state).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOKEY));
    }
}
