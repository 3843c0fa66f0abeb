//! Diagnostics for the CLI.
//!
//! Everything goes to stderr: in shim mode stdout belongs to the package
//! manager being run, and `--json` output has to stay parseable. A shim
//! stays silent below warnings unless asked otherwise.

use pmshim_core::config::LOG_ENV;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose events `-v` turns up.
const OWN_CRATES: [&str; 3] = ["pmshim", "pmshim_core", "pmshim_util"];

fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// `PMSHIM_LOG` when set and valid, otherwise our crates at the `-v` level
/// and everything else at warnings.
fn filter(verbosity: u8, env: Option<&str>) -> EnvFilter {
    if let Some(directives) = env.map(str::trim).filter(|d| !d.is_empty()) {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return filter,
            Err(e) => eprintln!("warning: ignoring {LOG_ENV}: {e}"),
        }
    }

    let level = level_for(verbosity);
    OWN_CRATES
        .iter()
        .fold(EnvFilter::new("warn"), |filter, krate| {
            match format!("{krate}={level}").parse() {
                Ok(directive) => filter.add_directive(directive),
                Err(_) => filter,
            }
        })
}

/// Install the global subscriber. `json` switches to JSON lines.
///
/// A subscriber installed earlier is left in place.
pub fn init(verbosity: u8, json: bool) {
    let env = std::env::var(LOG_ENV).ok();
    let registry = tracing_subscriber::registry().with(filter(verbosity, env.as_deref()));

    let installed = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .without_time()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    if installed.is_err() {
        tracing::debug!("Subscriber already installed");
    }
}
