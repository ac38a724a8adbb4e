//! Tracing subscriber setup.

use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

const CRATES: [&str; 5] = [
    "gantry_cli",
    "gantry_core",
    "gantry_scheduler",
    "gantry_runner",
    "gantry_report",
];

/// Directives used when `RUST_LOG` is unset.
fn default_directives(verbose: u8) -> String {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let mut directives = vec!["warn".to_string()];
    directives.extend(CRATES.iter().map(|krate| format!("{}={}", krate, level)));
    directives.join(",")
}

/// Install the global subscriber. Logs go to stderr; stdout is for results.
pub fn init(verbose: u8, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    let (text, json) = match format {
        LogFormat::Text => (
            Some(fmt::layer().with_target(true).with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text)
        .with(json)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives(0),
            "warn,gantry_cli=info,gantry_core=info,gantry_scheduler=info,gantry_runner=info,gantry_report=info"
        );
        assert!(default_directives(2).contains("gantry_scheduler=trace"));
    }
}
