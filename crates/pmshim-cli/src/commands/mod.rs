pub mod cache;
pub mod enable;
pub mod prepare;
pub mod shim;
pub mod version;

use miette::{IntoDiagnostic, Result};
use pmshim_core::pm::{Definitions, Engine, ErrorKind, PmError, RegistryClient};
use pmshim_core::Config;

/// Exit code for every reported failure.
const EXIT_FAILURE: i32 = 1;

/// Load definitions and build the engine for `config`.
pub fn load_engine(config: &Config) -> Result<Engine<RegistryClient>> {
    let definitions = Definitions::from_config(config).into_diagnostic()?;
    Engine::from_config(config, definitions).into_diagnostic()
}

/// Report `err` and exit.
///
/// Internal errors carry a hint that the failure is a bug rather than bad
/// input, and the stack where they were raised on stderr.
pub fn fail(err: &PmError, json: bool) -> ! {
    if json {
        let error_json = serde_json::json!({
            "ok": false,
            "error": {
                "code": err.code(),
                "message": err.message(),
            }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&error_json).unwrap_or_default()
        );
    } else {
        eprintln!("error: {}", err.message());
        if err.kind() == ErrorKind::Internal {
            eprintln!(
                "hint: this is a bug in pmshim or its definitions ({})",
                err.code()
            );
        }
    }
    if let Some(backtrace) = err.backtrace() {
        eprintln!("stack backtrace:\n{backtrace}");
    }
    std::process::exit(EXIT_FAILURE);
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}
