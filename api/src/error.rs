// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::io;

/// Display error messages with line number, file path and optional backtrace.
pub fn make_error(err: io::Error, _raw: impl Debug, _file: &str, _line: u32) -> io::Error {
    #[cfg(feature = "error-backtrace")]
    {
        if let Ok(val) = std::env::var("RUST_BACKTRACE") {
            if val.trim() != "0" {
                error!("Stack:\n{:?}", backtrace::Backtrace::new());
                error!("Error:\n\t{:?}\n\tat {}:{}", _raw, _file, _line);
                return err;
            }
        }
        error!(
            "Error:\n\t{:?}\n\tat {}:{}\n\tnote: enable `RUST_BACKTRACE=1` env to display a backtrace",
            _raw, _file, _line
        );
    }
    err
}

/// Define error macro like `x!()` or `x!(err)`.
/// Note: The `x!()` macro will convert any origin error (Os, Simple, Custom) to Custom error.
macro_rules! define_error_macro {
    ($fn:ident, $err:expr) => {
        #[macro_export]
        macro_rules! $fn {
            () => {
                std::io::Error::new($err.kind(), format!("{}: {}:{}", $err, file!(), line!()))
            };
            ($raw:expr) => {
                $crate::error::make_error($err, &$raw, file!(), line!())
            };
        }
    };
}

/// Define error macro for libc error codes
macro_rules! define_libc_error_macro {
    ($fn:ident, $code:ident) => {
        define_error_macro!($fn, std::io::Error::from_raw_os_error(libc::$code));
    };
}

define_libc_error_macro!(einval, EINVAL);
define_libc_error_macro!(enoent, ENOENT);
define_libc_error_macro!(eexist, EEXIST);
define_libc_error_macro!(ebusy, EBUSY);
define_libc_error_macro!(enomem, ENOMEM);
define_libc_error_macro!(enokey, ENOKEY);
define_libc_error_macro!(eopnotsupp, EOPNOTSUPP);
define_libc_error_macro!(eio, EIO);

/// Return EINVAL error with formatted error message.
#[macro_export]
macro_rules! bail_einval {
    ($($arg:tt)*) => {{
        return Err(einval!(format!($($arg)*)))
    }}
}

/// Return EIO error with formatted error message.
#[macro_export]
macro_rules! bail_eio {
    ($($arg:tt)*) => {{
        return Err(eio!(format!($($arg)*)))
    }}
}

define_error_macro!(eother, std::io::Error::new(std::io::ErrorKind::Other, ""));

/// Error codes of the inline encryption layer.
#[derive(thiserror::Error, Debug)]
pub enum CryptError {
    /// No registered algorithm matches the requested name and device.
    #[error("no cipher algorithm matches the request")]
    NotFound,
    #[error("cipher algorithm conflicts with a registered one")]
    AlreadyExists,
    /// The algorithm is still referenced by live contexts.
    #[error("cipher algorithm is in use")]
    Busy,
    #[error("invalid argument `{0}`")]
    InvalidArgument(String),
    #[error("out of memory")]
    OutOfMemory,
    /// The backend doesn't provide the requested capability.
    #[error("operation not supported by cipher backend")]
    Unsupported,
    /// Opaque failure reported by a cipher backend.
    #[error("cipher backend failed, {0}")]
    Backend(#[source] io::Error),
}

impl CryptError {
    /// Get the errno value equivalent to the error.
    pub fn errno(&self) -> i32 {
        match self {
            CryptError::NotFound => libc::ENOENT,
            CryptError::AlreadyExists => libc::EEXIST,
            CryptError::Busy => libc::EBUSY,
            CryptError::InvalidArgument(_) => libc::EINVAL,
            CryptError::OutOfMemory => libc::ENOMEM,
            CryptError::Unsupported => libc::EOPNOTSUPP,
            CryptError::Backend(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<io::Error> for CryptError {
    fn from(e: io::Error) -> Self {
        match (e.raw_os_error(), e.kind()) {
            (Some(libc::ENOMEM), _) | (_, io::ErrorKind::OutOfMemory) => CryptError::OutOfMemory,
            (Some(libc::EOPNOTSUPP), _) | (_, io::ErrorKind::Unsupported) => {
                CryptError::Unsupported
            }
            _ => CryptError::Backend(e),
        }
    }
}

impl From<CryptError> for io::Error {
    fn from(e: CryptError) -> Self {
        match e {
            CryptError::Backend(e) => e,
            e => io::Error::from_raw_os_error(e.errno()),
        }
    }
}

/// Specialized `Result` for the inline encryption layer.
pub type CryptResult<T> = std::result::Result<T, CryptError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    fn check_size(size: usize) -> std::io::Result<()> {
        if size > 0x1000 {
            return Err(einval!());
        }

        Ok(())
    }

    #[test]
    fn test_einval() {
        assert_eq!(
            check_size(0x2000).unwrap_err().kind(),
            std::io::Error::from_raw_os_error(libc::EINVAL).kind()
        );
    }

    #[test]
    fn test_make_error() {
        let original_error = Error::new(ErrorKind::Other, "test error");
        let result_error = make_error(original_error, "debug information", "test.rs", 42);
        assert_eq!(result_error.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_libc_error_macros() {
        let err = enoent!();
        assert_eq!(err.kind(), Error::from_raw_os_error(libc::ENOENT).kind());

        let err = eexist!();
        assert_eq!(err.kind(), Error::from_raw_os_error(libc::EEXIST).kind());

        let err = enomem!("allocation");
        assert_eq!(err.raw_os_error(), Some(libc::ENOMEM));

        let err = eio!("backend");
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
    }

    fn bail_einval_function() -> std::io::Result<()> {
        bail_einval!("test error message {}", 1);
    }

    #[test]
    fn test_bail_einval() {
        let err = bail_einval_function().unwrap_err();
        assert_eq!(err.kind(), Error::from_raw_os_error(libc::EINVAL).kind());
    }

    #[test]
    fn test_crypt_error_errno() {
        assert_eq!(CryptError::NotFound.errno(), libc::ENOENT);
        assert_eq!(CryptError::AlreadyExists.errno(), libc::EEXIST);
        assert_eq!(CryptError::Busy.errno(), libc::EBUSY);
        assert_eq!(
            CryptError::InvalidArgument("name".to_string()).errno(),
            libc::EINVAL
        );
        assert_eq!(CryptError::OutOfMemory.errno(), libc::ENOMEM);
        assert_eq!(
            CryptError::Backend(Error::from_raw_os_error(libc::ENOKEY)).errno(),
            libc::ENOKEY
        );
        assert_eq!(
            CryptError::Backend(Error::new(ErrorKind::Other, "opaque")).errno(),
            libc::EIO
        );
    }

    #[test]
    fn test_crypt_error_conversion() {
        let e: CryptError = enomem!("allocation").into();
        assert!(matches!(e, CryptError::OutOfMemory));
        let e: CryptError = eopnotsupp!("set_key").into();
        assert!(matches!(e, CryptError::Unsupported));
        let e: CryptError = Error::from_raw_os_error(libc::EKEYREJECTED).into();
        assert!(matches!(e, CryptError::Backend(_)));
        assert_eq!(e.errno(), libc::EKEYREJECTED);

        let e: Error = CryptError::Busy.into();
        assert_eq!(e.raw_os_error(), Some(libc::EBUSY));
        let e: Error = CryptError::Backend(Error::from_raw_os_error(libc::EACCES)).into();
        assert_eq!(e.raw_os_error(), Some(libc::EACCES));
    }
}
