use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use anyhow::Context;

use crate::prelude::*;

// pub const LOG_DIR: &'static str = "/var/log/terway-attach/";
pub const LOG_DIR: &str = "/tmp/log/terway-attach/";

/// Initializes the process-wide logger. Mutating kernel calls log at `info!`,
/// list/lookup calls at `debug!` (see SPEC_FULL.md §1.1).
pub fn init(log_name: impl AsRef<Path>) -> CniResult<()> {
    let config = {
        let mut builder = ConfigBuilder::new();
        builder.set_thread_level(LevelFilter::Info);
        builder.set_target_level(LevelFilter::Info);
        builder.build()
    };
    let _term_logger = TermLogger::new(
        LevelFilter::Info,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Never,
    );
    let log_dir = PathBuf::from_str(LOG_DIR).context("invalid log dir")?;
    let log_file = log_dir.join(log_name);
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir).context("create log dir")?;
    }
    let file_logger = WriteLogger::new(
        LevelFilter::Debug,
        config.clone(),
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(log_file)
            .context("open log file")?,
    );
    CombinedLogger::init(vec![
        // term_logger,
        file_logger,
    ])
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(())
}
