// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Management layer for inline block device encryption.
//!
//! Cipher backends, either inline encryption hardware drivers or software implementations,
//! register cipher algorithms with an [AlgorithmManager]. Filesystems and other IO submitters
//! then create crypto contexts by cipher name, install keys into them and tag block IOs with
//! the context identity and data unit numbers, so that encrypted IOs are only merged when the
//! backend can still derive correct IVs for the merged request.
//!
//! There are several core abstractions:
//! - [CipherBackend](backend/trait.CipherBackend.html): capability table of a cipher backend.
//! - [CipherAlgorithm]: a registered algorithm, reference counted by its live contexts.
//! - [AlgorithmManager]: registry of algorithms with device-bound name resolution.
//! - [CipherContext]: per request binding of an algorithm to backend private state and key.
//! - [BlockIo]: a block IO carrying optional encryption attributes, with the merge rules in
//!   [mergeable()].
#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate blk_crypt_api;

pub mod algorithm;
pub mod backend;
pub mod context;
pub mod device;
pub mod inline;
pub mod key;
pub mod manager;

#[cfg(test)]
pub(crate) mod test;

pub use self::algorithm::{CipherAlgorithm, CryptMode, DeviceId, MAX_CIPHER_NAME_LEN};
pub use self::backend::{CipherBackend, CipherState};
pub use self::context::{get_context, put_context, CipherContext, CipherHandle};
pub use self::device::{is_encrypted, mergeable, BioCrypt, BioFlags, BlockIo, DunRange};
pub use self::inline::{EncryptionMode, InlineCryptInfo};
pub use self::key::{KeyInfo, MAX_KEY_SIZE};
pub use self::manager::{AlgorithmManager, ALGORITHM_MANAGER};
