//! Shim-run mode: resolve a package manager for the project and run it.
//!
//! Entered either as `pmshim <bin>[@range] [args…]` or through a link named
//! after one of the binaries (argv0 mode).

use super::{fail, load_engine};
use miette::{IntoDiagnostic, Result};
use pmshim_core::pm::{
    dispatch, Definitions, Descriptor, Engine, IoContext, PmError, ProcessSupervisor,
    RegistryClient, ResolveOptions,
};
use pmshim_core::Config;
use tracing::debug;

/// The tool providing `bin`, if pmshim should handle an invocation through
/// a link with that name.
pub fn tool_for_link(config: &Config, bin: &str) -> Result<Option<String>> {
    let definitions = Definitions::from_config(config).into_diagnostic()?;
    Ok(definitions.tool_for_bin(bin).map(str::to_string))
}

/// `pmshim <bin>[@range] [args…]`.
pub fn run(config: &Config, args: &[String], json: bool) -> Result<()> {
    let Some((first, rest)) = args.split_first() else {
        fail(&PmError::spec_invalid("No package manager specified"), json);
    };

    let (bin, range) = match Descriptor::parse(first) {
        Ok(parsed) => parsed,
        Err(e) => fail(&e, json),
    };

    let Some(tool) = tool_for_link(config, &bin)? else {
        fail(&PmError::unsupported_tool(&bin), json);
    };

    run_bin(config, &tool, &bin, range, rest, json)
}

/// Run binary `bin` of `tool` with `args` and exit with its code.
///
/// An explicit `range` skips the project lookup.
pub fn run_bin(
    config: &Config,
    tool: &str,
    bin: &str,
    range: Option<String>,
    args: &[String],
    json: bool,
) -> Result<()> {
    let engine = load_engine(config)?;
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;

    let result = runtime.block_on(shim(&engine, config, tool, bin, range, args));
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => fail(&e, json),
    }
}

async fn shim(
    engine: &Engine<RegistryClient>,
    config: &Config,
    tool: &str,
    bin: &str,
    range: Option<String>,
    args: &[String],
) -> Result<i32, PmError> {
    let descriptor = match range {
        Some(range) => Descriptor::new(tool, range),
        None => {
            let transparent = engine.definition(tool)?.is_transparent_command(bin, args);
            engine.find_project_spec(&config.cwd, tool, transparent)?
        }
    };

    let options = ResolveOptions {
        allow_tags: true,
        ..ResolveOptions::default()
    };
    let locator = engine
        .resolve_descriptor(&descriptor, options)
        .await?
        .ok_or_else(|| PmError::version_not_found(&descriptor.name, &descriptor.range))?;

    let installed = engine.ensure_package_manager(&locator).await?;
    debug!(locator = %locator, bin, "Dispatching");

    let supervisor = ProcessSupervisor::new();
    dispatch::run(
        &supervisor,
        &installed,
        &locator,
        bin,
        args,
        IoContext::inherit().with_cwd(config.cwd.clone()),
    )
    .await
}
