//! Tag-filtered logger
//!
//! Each record's target is its tag. A tag logs when the record's level is
//! within the tag's threshold, which is either a per-tag override or the
//! default. Setting the `*` tag changes the default and drops all overrides.
//!
//! Output goes to stderr as `L (ms) tag: message`, where `ms` counts from
//! logger creation.

use std::collections::HashMap;
use std::io::Write;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::levels;
use crate::config::LoggingConfig;

/// Tag that addresses every tag at once.
pub const ALL_TAGS: &str = "*";

/// Per-tag thresholds.
#[derive(Debug, Clone)]
pub struct LevelTable {
    default: LevelFilter,
    tags: HashMap<String, LevelFilter>,
}

impl LevelTable {
    pub fn new(default: LevelFilter) -> Self {
        Self {
            default,
            tags: HashMap::new(),
        }
    }

    pub fn set(&mut self, tag: &str, level: LevelFilter) {
        if tag == ALL_TAGS {
            self.default = level;
            self.tags.clear();
        } else {
            self.tags.insert(tag.to_string(), level);
        }
    }

    pub fn threshold(&self, tag: &str) -> LevelFilter {
        self.tags.get(tag).copied().unwrap_or(self.default)
    }

    pub fn default_level(&self) -> LevelFilter {
        self.default
    }

    pub fn enabled(&self, tag: &str, level: Level) -> bool {
        level <= self.threshold(tag)
    }
}

impl Default for LevelTable {
    fn default() -> Self {
        Self::new(LevelFilter::Info)
    }
}

pub struct TagLogger {
    levels: RwLock<LevelTable>,
    start: Instant,
}

impl TagLogger {
    fn new() -> Self {
        Self {
            levels: RwLock::new(LevelTable::default()),
            start: Instant::now(),
        }
    }
}

fn level_letter(level: Level) -> char {
    match level {
        Level::Error => 'E',
        Level::Warn => 'W',
        Level::Info => 'I',
        Level::Debug => 'D',
        Level::Trace => 'V',
    }
}

impl Log for TagLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.levels
            .read()
            .enabled(metadata.target(), metadata.level())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let elapsed = self.start.elapsed().as_millis();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "{} ({}) {}: {}",
            level_letter(record.level()),
            elapsed,
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: Lazy<TagLogger> = Lazy::new(TagLogger::new);

/// Apply `config` and install the logger as the `log` backend.
///
/// Thresholds are applied even if another logger is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), SetLoggerError> {
    {
        let mut table = LOGGER.levels.write();
        match levels::resolve(&config.default_level) {
            Some(level) => table.set(ALL_TAGS, level),
            None => eprintln!(
                "Warning: unknown default log level '{}', keeping '{}'",
                config.default_level,
                levels::name_of(table.default_level())
            ),
        }
        for (tag, name) in &config.tags {
            if let Some(level) = levels::resolve(name) {
                table.set(tag, level);
            }
        }
    }
    log::set_logger(&*LOGGER)?;
    log::set_max_level(LevelFilter::Trace);
    Ok(())
}

/// Change the threshold for `tag` (or every tag, with `*`).
pub fn set_level(tag: &str, level: LevelFilter) {
    LOGGER.levels.write().set(tag, level);
}

/// Current threshold for `tag`.
pub fn threshold(tag: &str) -> LevelFilter {
    LOGGER.levels.read().threshold(tag)
}

/// Snapshot of the live threshold table.
pub fn levels() -> LevelTable {
    LOGGER.levels.read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_override() {
        let mut table = LevelTable::new(LevelFilter::Warn);
        table.set("wifi", LevelFilter::Debug);
        assert_eq!(table.threshold("wifi"), LevelFilter::Debug);
        assert_eq!(table.threshold("gpio"), LevelFilter::Warn);
        assert!(table.enabled("wifi", Level::Debug));
        assert!(!table.enabled("gpio", Level::Info));
    }

    #[test]
    fn test_all_tags_clears_overrides() {
        let mut table = LevelTable::new(LevelFilter::Warn);
        table.set("wifi", LevelFilter::Debug);
        table.set(ALL_TAGS, LevelFilter::Error);
        assert_eq!(table.threshold("wifi"), LevelFilter::Error);
        assert_eq!(table.default_level(), LevelFilter::Error);
    }

    #[test]
    fn test_off_disables_errors() {
        let mut table = LevelTable::default();
        table.set("quiet", LevelFilter::Off);
        assert!(!table.enabled("quiet", Level::Error));
    }
}
