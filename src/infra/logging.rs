// ============================================================
// Layer 6 — Logging Configuration
// ============================================================
// The subscriber is configured from an explicit LogConfig that
// the CLI builds from the training arguments. Rank awareness is
// a plain field: replicas in a distributed run only report
// warnings unless a level was requested explicitly.
//
// RUST_LOG still works and is layered underneath the crate
// directive, e.g. RUST_LOG=burn=debug.

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;

use crate::cli::args::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    pub level:           LogLevel,
    pub is_main_process: bool,
}

impl LogConfig {
    pub fn new(level: LogLevel, is_main_process: bool) -> Self {
        Self { level, is_main_process }
    }

    /// Effective verbosity for this process.
    pub fn effective_level(&self) -> Level {
        match self.level {
            LogLevel::Debug   => Level::DEBUG,
            LogLevel::Info    => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error   => Level::ERROR,
            LogLevel::Passive if self.is_main_process => Level::INFO,
            LogLevel::Passive => Level::WARN,
        }
    }

    /// Directive applied to this crate's targets.
    pub fn directive(&self) -> String {
        format!(
            "imagecap_finetune={}",
            self.effective_level().as_str().to_lowercase()
        )
    }

    /// Install the global subscriber. Safe to call more than once;
    /// later calls are ignored.
    pub fn init(&self) {
        let filter = tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(
                self.directive()
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            );

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passive_follows_rank() {
        assert_eq!(LogConfig::new(LogLevel::Passive, true).effective_level(), Level::INFO);
        assert_eq!(LogConfig::new(LogLevel::Passive, false).effective_level(), Level::WARN);
    }

    #[test]
    fn test_explicit_level_wins() {
        let cfg = LogConfig::new(LogLevel::Debug, false);
        assert_eq!(cfg.directive(), "imagecap_finetune=debug");
    }
}
