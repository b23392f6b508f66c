// Copyright 2020 Ant Financial. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Error codes and configuration shared by the blk-crypt crates.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

#[macro_use]
pub mod error;
pub mod config;

pub use config::{CryptConfig, KeyPersistence};
pub use error::{CryptError, CryptResult};
