//! provides logging helpers

use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Output encoding of the log stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per event, for log collectors
    Json,
}

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber
pub fn init(format: LogFormat) {
    match format {
        LogFormat::Text => {
            let fmt_layer = layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(env_filter());
            registry().with(fmt_layer).init();
        }
        LogFormat::Json => {
            let fmt_layer = layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_filter(env_filter());
            registry().with(fmt_layer).init();
        }
    }
}
