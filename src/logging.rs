//! Structured logging setup.
//!
//! One `fern` dispatch per process: stdout always, plus a log file when the
//! config enables one. The line format carries timestamp, level, target,
//! pid and tid so interleaved broker/delivery activity stays attributable.

use crate::config::LoggingConfig;
use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::{path::Path, process, thread};

/// Configure global logging as requested in the `[logging]` table.
/// `dir` anchors a relative log-file name.
pub fn init(dir: &Path, cfg: &LoggingConfig) -> Result<(), fern::InitError> {
    let level = match cfg.level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let log_path = cfg
        .enable
        .then(|| dir.join(cfg.file.as_deref().unwrap_or("volmgr.log")));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}
