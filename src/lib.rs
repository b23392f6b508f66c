// Copyright 2021 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Inline block device encryption management layer.
//!
//! The crate glues the configuration and error types of `blk-crypt-api` with the algorithm
//! registry, crypto contexts and IO merge rules of `blk-crypt-storage`, and provides logging
//! setup for programs embedding the layer.

#[macro_use]
extern crate blk_crypt_api;

pub use blk_crypt_api::{CryptConfig, CryptError, CryptResult, KeyPersistence};
pub use blk_crypt_storage::*;

pub mod logger;

/// Create an algorithm manager from a configuration file, or with default configuration.
pub fn load_manager<P: AsRef<std::path::Path>>(path: Option<P>) -> CryptResult<AlgorithmManager> {
    let config = match path {
        Some(p) => CryptConfig::from_file(p)?,
        None => CryptConfig::default(),
    };
    if !config.validate() {
        return Err(CryptError::InvalidArgument(format!(
            "invalid data unit size {}",
            config.data_unit_size
        )));
    }
    log::info!(
        "blk-crypt: encryption {}, dun tracking {}, data unit size {}",
        if config.enable { "enabled" } else { "disabled" },
        config.dun_tracking,
        config.data_unit_size
    );

    Ok(AlgorithmManager::new(config))
}
