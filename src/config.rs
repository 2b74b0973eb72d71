// Cb execution core: runtime configuration (ambient stack, spec.md
// §6 "Input"/"Host responsibilities"). RON-deserialized the same way
// the teacher's dashboard `Config` is loaded, widened from gauge
// layout to the handful of knobs a host embedding the core actually
// needs to flip.

use serde::Deserialize;

/// How many async `spawn` tasks the event loop will run in a single
/// `drain` before giving up and treating the program as stalled.
/// `None` means unbounded (the teacher's dashboard config has no
/// analogous "refuse to run forever" knob, but a runtime embedding a
/// user-authored program needs one).
#[derive(Debug, Clone, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default = "default_max_scheduled_tasks")]
    pub max_scheduled_tasks: Option<u64>,
    #[serde(default)]
    pub warn_on_unsigned_clamp: bool,
    #[serde(default = "default_timer_granularity_ms")]
    pub timer_granularity_ms: u64,
}

fn default_max_scheduled_tasks() -> Option<u64> {
    Some(100_000)
}

fn default_timer_granularity_ms() -> u64 {
    1
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            max_scheduled_tasks: default_max_scheduled_tasks(),
            warn_on_unsigned_clamp: false,
            timer_granularity_ms: default_timer_granularity_ms(),
        }
    }
}

impl InterpreterConfig {
    pub fn from_ron_str(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = InterpreterConfig::default();
        assert_eq!(cfg.timer_granularity_ms, 1);
        assert_eq!(cfg.max_scheduled_tasks, Some(100_000));
    }

    #[test]
    fn parses_partial_ron_with_defaults() {
        let cfg = InterpreterConfig::from_ron_str("(timer_granularity_ms: 5)").unwrap();
        assert_eq!(cfg.timer_granularity_ms, 5);
        assert_eq!(cfg.max_scheduled_tasks, Some(100_000));
    }
}
