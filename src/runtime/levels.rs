//! Severity names
//!
//! Maps the level names scripts use to log thresholds.

use log::LevelFilter;

/// A script-visible severity name and the threshold it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelMapping {
    pub name: &'static str,
    pub level: LevelFilter,
}

/// Known names in lookup order.
pub const LEVELS: &[LevelMapping] = &[
    LevelMapping { name: "none", level: LevelFilter::Off },
    LevelMapping { name: "error", level: LevelFilter::Error },
    LevelMapping { name: "warn", level: LevelFilter::Warn },
    LevelMapping { name: "info", level: LevelFilter::Info },
    LevelMapping { name: "debug", level: LevelFilter::Debug },
    LevelMapping { name: "verbose", level: LevelFilter::Trace },
];

/// Resolve a severity name. Matching is exact and case-sensitive.
pub fn resolve(name: &str) -> Option<LevelFilter> {
    LEVELS.iter().find(|m| m.name == name).map(|m| m.level)
}

/// Script-visible name of a threshold.
pub fn name_of(level: LevelFilter) -> &'static str {
    LEVELS
        .iter()
        .find(|m| m.level == level)
        .map(|m| m.name)
        .unwrap_or("verbose")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_names() {
        assert_eq!(resolve("none"), Some(LevelFilter::Off));
        assert_eq!(resolve("error"), Some(LevelFilter::Error));
        assert_eq!(resolve("warn"), Some(LevelFilter::Warn));
        assert_eq!(resolve("info"), Some(LevelFilter::Info));
        assert_eq!(resolve("debug"), Some(LevelFilter::Debug));
        assert_eq!(resolve("verbose"), Some(LevelFilter::Trace));
    }

    #[test]
    fn test_resolve_rejects_everything_else() {
        for name in ["", "INFO", "Info", "warning", "trace", " info", "info "] {
            assert_eq!(resolve(name), None, "{:?} should not resolve", name);
        }
    }

    #[test]
    fn test_name_of_round_trips() {
        for mapping in LEVELS {
            assert_eq!(name_of(mapping.level), mapping.name);
        }
    }
}
