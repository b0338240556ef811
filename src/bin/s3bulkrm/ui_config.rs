// Decides which progress output the CLI shows.

use s3bulkrm_rs::config::Config;

/// Whether to show the live-updating progress line.
///
/// Returns `false` when:
/// - `show_no_progress` is set
/// - verbosity is above Warn (progress events are logged instead)
/// - JSON logging is enabled
pub fn is_progress_indicator_needed(config: &Config) -> bool {
    if config.show_no_progress {
        return false;
    }

    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return true;
    };

    if log::Level::Warn < tracing_config.tracing_level {
        return false;
    }

    !tracing_config.json_tracing
}

/// Whether to show the final summary line.
pub fn is_show_result_needed(config: &Config) -> bool {
    if config.show_no_progress {
        return false;
    }

    config
        .tracing_config
        .as_ref()
        .is_none_or(|tracing_config| !tracing_config.json_tracing)
}
