// Copyright 2022 Alibaba Cloud. All rights reserved.
// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Configuration information for the inline encryption layer.

use std::fmt::{self, Display};
use std::fs;
use std::io::{Error, ErrorKind, Result};
use std::path::Path;
use std::str::FromStr;

/// Minimal size of a data unit, one sector.
pub const MIN_DATA_UNIT_SIZE: u32 = 512;
/// Maximal size of a data unit.
pub const MAX_DATA_UNIT_SIZE: u32 = 65536;

/// How long a key installed into a cipher backend stays valid.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPersistence {
    /// The key is cleared from the backend when the owning context is released.
    #[default]
    Ephemeral,
    /// The key stays programmed into the backend after the context has been released.
    Persistent,
}

impl Display for KeyPersistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPersistence::Ephemeral => write!(f, "ephemeral"),
            KeyPersistence::Persistent => write!(f, "persistent"),
        }
    }
}

impl FromStr for KeyPersistence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ephemeral" => Ok(KeyPersistence::Ephemeral),
            "persistent" => Ok(KeyPersistence::Persistent),
            _ => Err(einval!(format!(
                "key persistence should be ephemeral or persistent, got {}",
                s
            ))),
        }
    }
}

/// Configuration information for the inline encryption layer, based on Json or Toml.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CryptConfig {
    /// Whether inline encryption is enabled. Without it no merge constraint is enforced.
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Whether data unit numbers are tracked on IOs and must be contiguous to merge IOs.
    #[serde(default = "default_true")]
    pub dun_tracking: bool,
    /// Size of a data unit in bytes, the granularity of IV derivation.
    #[serde(default = "default_data_unit_size")]
    pub data_unit_size: u32,
    /// Persistence of keys installed without an explicit persistence.
    #[serde(default)]
    pub default_key_persistence: KeyPersistence,
}

impl Default for CryptConfig {
    fn default() -> Self {
        CryptConfig {
            enable: true,
            dun_tracking: true,
            data_unit_size: default_data_unit_size(),
            default_key_persistence: KeyPersistence::default(),
        }
    }
}

impl CryptConfig {
    /// Read configuration information from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let md = fs::metadata(path.as_ref())?;
        if md.len() > 0x100000 {
            return Err(Error::new(
                ErrorKind::Other,
                "configuration file size is too big",
            ));
        }
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Validate the configuration object.
    pub fn validate(&self) -> bool {
        if !self.data_unit_size.is_power_of_two()
            || self.data_unit_size < MIN_DATA_UNIT_SIZE
            || self.data_unit_size > MAX_DATA_UNIT_SIZE
        {
            return false;
        }

        true
    }

    /// Get number of 512-byte sectors in a data unit.
    pub fn sectors_per_data_unit(&self) -> u64 {
        (self.data_unit_size / MIN_DATA_UNIT_SIZE) as u64
    }
}

impl FromStr for CryptConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<CryptConfig> {
        if let Ok(v) = serde_json::from_str::<CryptConfig>(s) {
            return if v.validate() {
                Ok(v)
            } else {
                Err(Error::new(ErrorKind::InvalidInput, "invalid configuration"))
            };
        }
        if let Ok(v) = toml::from_str::<CryptConfig>(s) {
            return if v.validate() {
                Ok(v)
            } else {
                Err(Error::new(ErrorKind::InvalidInput, "invalid configuration"))
            };
        }
        Err(Error::new(
            ErrorKind::InvalidInput,
            "failed to parse configuration information",
        ))
    }
}

fn default_true() -> bool {
    true
}

fn default_data_unit_size() -> u32 {
    4096
}
