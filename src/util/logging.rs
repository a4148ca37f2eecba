use std::path::PathBuf;

use flexi_logger::{Age, Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<LoggerHandle> = OnceCell::new();

pub fn init() -> anyhow::Result<()> {
    LOGGER.get_or_try_init(|| -> anyhow::Result<LoggerHandle> {
        let log_dir = log_dir();
        std::fs::create_dir_all(&log_dir)?;
        let handle = Logger::try_with_env_or_str("info")?
            .duplicate_to_stderr(Duplicate::Info)
            .log_to_file(
                FileSpec::default()
                    .directory(&log_dir)
                    .basename("voxlegere"),
            )
            .rotate(
                Criterion::AgeOrSize(Age::Day, 10_000_000),
                Naming::Numbers,
                Cleanup::KeepLogFiles(7),
            )
            .start()?;
        Ok(handle)
    })?;
    Ok(())
}

fn log_dir() -> PathBuf {
    PathBuf::from("logs")
}
