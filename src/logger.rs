// Copyright 2020 Ant Group. All rights reserved.
// Copyright (C) 2021 Alibaba Cloud. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Logging setup for programs embedding the encryption layer.

use std::env::current_dir;
use std::io::Result;
use std::path::{Path, PathBuf};

use flexi_logger::{
    style, Cleanup, Criterion, DeferredNow, FileSpec, Logger, Naming,
    TS_DASHES_BLANK_COLONS_DOT_BLANK,
};
use log::{Level, LevelFilter, Record};

/// Rotation policy of log files.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LogRotation {
    /// Rotate when the log file grows beyond the size in MiB, zero to disable rotation.
    pub size_mb: u64,
    /// Number of rotated files to keep.
    pub backups: usize,
}

// Trim the path of the source file to `<crate>/src/...`.
fn source_file<'a>(record: &'a Record) -> Option<&'a str> {
    record.file().map(|v| match v.rfind("/src/") {
        None => v,
        Some(pos) => match v[..pos].rfind('/') {
            None => v,
            Some(p) => &v[p + 1..],
        },
    })
}

fn plain_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> std::result::Result<(), std::io::Error> {
    let level = record.level();
    let ts = now.format(TS_DASHES_BLANK_COLONS_DOT_BLANK);
    if level == Level::Info {
        write!(w, "[{}] {} {}", ts, level, record.args())
    } else {
        write!(
            w,
            "[{}] {} [{}:{}] {}",
            ts,
            level,
            source_file(record).unwrap_or("<unnamed>"),
            record.line().unwrap_or(0),
            record.args()
        )
    }
}

fn colored_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> std::result::Result<(), std::io::Error> {
    let level = record.level();
    let painter = style(level);
    let ts = now.format(TS_DASHES_BLANK_COLONS_DOT_BLANK).to_string();
    if level == Level::Info {
        write!(
            w,
            "[{}] {} {}",
            painter.paint(ts),
            painter.paint(level.to_string()),
            painter.paint(record.args().to_string())
        )
    } else {
        write!(
            w,
            "[{}] {} [{}:{}] {}",
            painter.paint(ts),
            painter.paint(level.to_string()),
            source_file(record).unwrap_or("<unnamed>"),
            record.line().unwrap_or(0),
            painter.paint(record.args().to_string())
        )
    }
}

/// Split a log file path into directory, basename and optional suffix.
///
/// Relative directories are resolved against the current working directory. `flexi_logger`
/// appends `.log` to files without an explicit suffix.
fn split_log_path(path: &Path) -> Result<(Option<PathBuf>, String, Option<String>)> {
    let basename = path
        .file_stem()
        .and_then(|v| v.to_str())
        .ok_or_else(|| einval!(format!("invalid log file name {:?}", path)))?
        .to_string();
    let suffix = match path.extension() {
        Some(v) => Some(
            v.to_str()
                .ok_or_else(|| einval!(format!("invalid log file extension {:?}", v)))?
                .to_string(),
        ),
        None => None,
    };
    let dir = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => None,
        Some(p) if p.has_root() => Some(p.to_path_buf()),
        Some(p) => Some(current_dir()?.join(p)),
        None => None,
    };

    Ok((dir, basename, suffix))
}

/// Setup logging for the process.
///
/// Records go to `log_file` if given, otherwise to stderr with colors. The `log` macros filter
/// by `level`, `flexi_logger` itself is left at trace so that the level may be raised later
/// with `log::set_max_level()`. Panics are logged with their backtrace.
pub fn setup_logging(
    log_file: Option<&Path>,
    level: LevelFilter,
    rotation: LogRotation,
) -> Result<()> {
    let logger = Logger::try_with_env_or_str("trace").map_err(|e| eother!(e))?;
    let logger = match log_file {
        Some(path) => {
            let (dir, basename, suffix) = split_log_path(path)?;
            let mut spec = FileSpec::default().suppress_timestamp().basename(basename);
            if let Some(suffix) = suffix {
                spec = spec.suffix(suffix);
            }
            if let Some(dir) = dir {
                spec = spec.directory(dir);
            }
            let mut logger = logger.log_to_file(spec).append().format(plain_format);
            if rotation.size_mb > 0 {
                logger = logger.rotate(
                    Criterion::Size(rotation.size_mb * 1024 * 1024),
                    Naming::Timestamps,
                    Cleanup::KeepCompressedFiles(rotation.backups),
                );
            }
            logger
        }
        None => logger.format(colored_format),
    };
    logger.start().map_err(|e| {
        eprintln!("failed to start logger, {:?}", e);
        eother!(e)
    })?;

    log::set_max_level(level);
    log_panics::Config::new()
        .backtrace_mode(log_panics::BacktraceMode::Resolved)
        .install_panic_hook();

    Ok(())
}
