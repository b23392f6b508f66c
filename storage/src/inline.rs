// Copyright (C) 2021 Alibaba Cloud. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Helper for filesystems encrypting file contents with inline block encryption.
//!
//! A filesystem picks an [EncryptionMode] per file. Modes whose cipher string carries the
//! `inline-` prefix are handled by the block layer: the prefix is stripped to get the cipher
//! name registered with the [AlgorithmManager], and an [InlineCryptInfo] keeps a keyed crypto
//! context for the file until the file is evicted.

use std::sync::atomic::{AtomicBool, Ordering};

use blk_crypt_api::{CryptConfig, CryptError, CryptResult};

use crate::algorithm::{CryptMode, DeviceId};
use crate::context::{put_context, CipherContext};
use crate::device::BlockIo;
use crate::manager::AlgorithmManager;

/// Prefix of cipher strings handled by inline encryption hardware.
pub const INLINE_PREFIX: &str = "inline-";

/// A content encryption mode available to filesystems.
#[derive(Debug)]
pub struct EncryptionMode {
    pub mode: CryptMode,
    pub friendly_name: &'static str,
    pub cipher_str: &'static str,
    pub key_size: usize,
    pub inline_enc: bool,
    logged: AtomicBool,
}

impl EncryptionMode {
    const fn new(
        mode: CryptMode,
        friendly_name: &'static str,
        cipher_str: &'static str,
        key_size: usize,
        inline_enc: bool,
    ) -> Self {
        EncryptionMode {
            mode,
            friendly_name,
            cipher_str,
            key_size,
            inline_enc,
            logged: AtomicBool::new(false),
        }
    }

    /// Get the name of the block layer cipher implementing the mode.
    pub fn inline_cipher_name(&self) -> CryptResult<&'static str> {
        inline_cipher_name(self.cipher_str)
    }
}

static AVAILABLE_MODES: [EncryptionMode; 3] = [
    EncryptionMode::new(
        CryptMode::AES_256_XTS,
        "AES-256-XTS",
        "inline-aes256xts",
        64,
        true,
    ),
    EncryptionMode::new(
        CryptMode::AES_128_XTS,
        "AES-128-XTS",
        "inline-aes128xts",
        32,
        true,
    ),
    EncryptionMode::new(
        CryptMode::AES_256_CTS,
        "AES-256-CTS-CBC",
        "cts(cbc(aes))",
        32,
        false,
    ),
];

/// Find the encryption mode with identifier `mode`.
pub fn find_mode(mode: CryptMode) -> Option<&'static EncryptionMode> {
    AVAILABLE_MODES.iter().find(|m| m.mode == mode)
}

/// Strip the `inline-` prefix from a cipher string.
pub fn inline_cipher_name(cipher_str: &str) -> CryptResult<&str> {
    match cipher_str.strip_prefix(INLINE_PREFIX) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(CryptError::InvalidArgument(format!(
            "cipher string {} is not an inline cipher",
            cipher_str
        ))),
    }
}

/// Keyed crypto context of an encrypted file.
#[derive(Debug)]
pub struct InlineCryptInfo {
    mode: &'static EncryptionMode,
    ctx: CipherContext,
}

impl InlineCryptInfo {
    /// Prepare inline encryption for a file on `device`.
    ///
    /// The first `key_size` bytes of `raw_key` are installed into a new context. The context is
    /// released again if the key can't be installed.
    pub fn prepare(
        manager: &AlgorithmManager,
        device: Option<DeviceId>,
        mode: CryptMode,
        raw_key: &[u8],
    ) -> CryptResult<Self> {
        let mode = find_mode(mode).ok_or_else(|| {
            CryptError::InvalidArgument(format!("unknown encryption mode {}", mode))
        })?;
        if !mode.inline_enc {
            return Err(CryptError::InvalidArgument(format!(
                "{} doesn't support inline encryption",
                mode.friendly_name
            )));
        }
        let cipher = mode.inline_cipher_name()?;
        if raw_key.len() < mode.key_size {
            return Err(CryptError::InvalidArgument(format!(
                "key is too short for {}, got {} bytes, need {}",
                mode.friendly_name,
                raw_key.len(),
                mode.key_size
            )));
        }

        let mut ctx = CipherContext::get(manager, device, cipher).map_err(|e| {
            error!(
                "blk-crypt: failed to get context for cipher {}, {}",
                cipher, e
            );
            e
        })?;
        if let Err(e) = ctx.set_key(&raw_key[..mode.key_size], mode.key_size as u32) {
            error!(
                "blk-crypt: failed to set key for cipher {}, {}",
                cipher, e
            );
            put_context(ctx);
            return Err(e);
        }

        if !mode.logged.swap(true, Ordering::Relaxed) {
            info!(
                "blk-crypt: {} using implementation \"{}\"",
                mode.friendly_name, cipher
            );
        }

        Ok(InlineCryptInfo { mode, ctx })
    }

    pub fn mode(&self) -> &'static EncryptionMode {
        self.mode
    }

    pub fn context(&self) -> &CipherContext {
        &self.ctx
    }

    /// Bind a block IO of the file to the file's crypto context.
    pub fn attach(
        &self,
        io: &mut BlockIo,
        dun: Option<u64>,
        config: &CryptConfig,
    ) -> CryptResult<()> {
        io.bind(&self.ctx, dun, config)
    }

    /// Release the crypto context of the file.
    pub fn release(self) -> CryptResult<()> {
        self.ctx.put()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::algorithm::CipherAlgorithm;
    use crate::device::{is_encrypted, BioFlags};
    use crate::test::MockBackend;

    fn setup() -> (AlgorithmManager, Arc<MockBackend>, Arc<CipherAlgorithm>) {
        let mgr = AlgorithmManager::default();
        let backend = Arc::new(MockBackend::new());
        let alg = mgr
            .register_algorithm(
                Some(DeviceId::new(254, 0)),
                "aes256xts",
                CryptMode::AES_256_XTS,
                backend.clone(),
            )
            .unwrap();
        (mgr, backend, alg)
    }

    #[test]
    fn test_inline_cipher_name() {
        assert_eq!(inline_cipher_name("inline-aes256xts").unwrap(), "aes256xts");
        assert!(inline_cipher_name("inline-").is_err());
        assert!(inline_cipher_name("inline").is_err());
        assert!(inline_cipher_name("xts(aes)").is_err());
        assert!(inline_cipher_name("").is_err());
    }

    #[test]
    fn test_find_mode() {
        let mode = find_mode(CryptMode::AES_256_XTS).unwrap();
        assert_eq!(mode.key_size, 64);
        assert!(mode.inline_enc);
        assert_eq!(mode.inline_cipher_name().unwrap(), "aes256xts");

        let mode = find_mode(CryptMode::AES_128_XTS).unwrap();
        assert_eq!(mode.key_size, 32);
        assert_eq!(mode.inline_cipher_name().unwrap(), "aes128xts");

        let mode = find_mode(CryptMode::AES_256_CTS).unwrap();
        assert!(!mode.inline_enc);
        assert!(mode.inline_cipher_name().is_err());

        assert!(find_mode(CryptMode::PRIVATE).is_none());
    }

    #[test]
    fn test_prepare_inline_crypt_info() {
        let (mgr, backend, alg) = setup();
        let dev = Some(DeviceId::new(254, 0));
        let raw_key: Vec<u8> = (0..80u8).collect();

        let info = InlineCryptInfo::prepare(&mgr, dev, CryptMode::AES_256_XTS, &raw_key).unwrap();
        assert_eq!(info.mode().friendly_name, "AES-256-XTS");
        assert_eq!(alg.ref_count(), 1);
        assert_eq!(info.context().get_key().unwrap().as_slice(), &raw_key[..64]);
        assert_eq!(info.context().key_info().unwrap().size, 64);

        let mut io = BlockIo::new(8, 4096, BioFlags::WRITE);
        info.attach(&mut io, Some(1), mgr.config()).unwrap();
        assert!(is_encrypted(&io));
        assert_eq!(io.cipher_handle(), Some(info.context().handle()));
        assert_eq!(io.start_dun(), Some(1));

        info.release().unwrap();
        assert_eq!(alg.ref_count(), 0);
        assert_eq!(backend.live_states(), 0);
        assert_eq!(backend.clear_keys.load(Ordering::Acquire), 1);

        let info = InlineCryptInfo::prepare(&mgr, dev, CryptMode::AES_256_XTS, &raw_key).unwrap();
        drop(info);
        assert_eq!(alg.ref_count(), 0);
        mgr.unregister_algorithm(&alg).unwrap();
    }

    #[test]
    fn test_prepare_invalid_mode() {
        let (mgr, backend, alg) = setup();
        let dev = Some(DeviceId::new(254, 0));

        for mode in [CryptMode::AES_256_CTS, CryptMode::PRIVATE, CryptMode(77)] {
            assert!(matches!(
                InlineCryptInfo::prepare(&mgr, dev, mode, &[1u8; 64]),
                Err(CryptError::InvalidArgument(_))
            ));
        }
        assert!(matches!(
            InlineCryptInfo::prepare(&mgr, dev, CryptMode::AES_256_XTS, &[1u8; 32]),
            Err(CryptError::InvalidArgument(_))
        ));
        assert!(matches!(
            InlineCryptInfo::prepare(&mgr, dev, CryptMode::AES_128_XTS, &[1u8; 32]),
            Err(CryptError::NotFound)
        ));
        assert_eq!(alg.ref_count(), 0);
        assert_eq!(backend.allocs.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_prepare_key_failure() {
        let (mgr, backend, alg) = setup();
        backend.fail_set_key.store(true, Ordering::Release);

        let err = InlineCryptInfo::prepare(
            &mgr,
            Some(DeviceId::new(254, 0)),
            CryptMode::AES_256_XTS,
            &[7u8; 64],
        )
        .unwrap_err();
        assert_eq!(err.errno(), libc::EKEYREJECTED);
        assert_eq!(alg.ref_count(), 0);
        assert_eq!(backend.live_states(), 0);
        mgr.unregister_algorithm(&alg).unwrap();
    }
}
