//! `pmshim prepare` command implementation.

use super::{fail, load_engine, print_json};
use miette::{IntoDiagnostic, Result};
use pmshim_core::pm::{
    find_package_manager_field, parse_pin, Descriptor, Engine, Locator, PmError, RegistryClient,
    ResolveOptions,
};
use pmshim_core::Config;
use serde::Serialize;
use std::path::PathBuf;

/// Arguments of `pmshim prepare`.
#[derive(Debug, Clone)]
pub struct PrepareAction {
    pub specs: Vec<String>,
    pub all: bool,
    pub activate: bool,
}

#[derive(Debug, Serialize)]
struct PreparedItem {
    name: String,
    version: String,
    location: PathBuf,
    activated: bool,
}

pub fn run(config: &Config, action: &PrepareAction, json: bool) -> Result<()> {
    let engine = load_engine(config)?;

    let descriptors = match requested_descriptors(config, &engine, action) {
        Ok(descriptors) => descriptors,
        Err(e) => fail(&e, json),
    };

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let mut prepared = Vec::with_capacity(descriptors.len());

    for descriptor in &descriptors {
        let result = runtime.block_on(prepare_one(&engine, descriptor, action.activate));
        match result {
            Ok(item) => {
                if !json {
                    print_item(&item);
                }
                prepared.push(item);
            }
            Err(e) => fail(&e, json),
        }
    }

    if json {
        print_json(&serde_json::json!({
            "ok": true,
            "prepared": prepared,
        }))?;
    }

    Ok(())
}

/// Descriptors named on the command line, every tool for `--all`, or the
/// project pin when nothing is named.
fn requested_descriptors(
    config: &Config,
    engine: &Engine<RegistryClient>,
    action: &PrepareAction,
) -> Result<Vec<Descriptor>, PmError> {
    if action.all {
        return engine
            .supported_tools()
            .into_iter()
            .map(|name| Ok(Descriptor::new(name, engine.get_default_version(name)?)))
            .collect();
    }

    if action.specs.is_empty() {
        let Some((_, raw)) = find_package_manager_field(&config.cwd)? else {
            return Err(PmError::spec_invalid(
                "No package manager specified; pass name@range or add a \"packageManager\" field to package.json",
            ));
        };
        return Ok(vec![parse_pin(&raw)?]);
    }

    action
        .specs
        .iter()
        .map(|spec| {
            let (name, range) = Descriptor::parse(spec)?;
            let range = match range {
                Some(range) => range,
                None => engine.get_default_version(&name)?,
            };
            Ok(Descriptor::new(name, range))
        })
        .collect()
}

async fn prepare_one(
    engine: &Engine<RegistryClient>,
    descriptor: &Descriptor,
    activate: bool,
) -> Result<PreparedItem, PmError> {
    let options = ResolveOptions {
        allow_tags: true,
        ..ResolveOptions::default()
    };

    let locator: Locator = engine
        .resolve_descriptor(descriptor, options)
        .await?
        .ok_or_else(|| PmError::version_not_found(&descriptor.name, &descriptor.range))?;

    let installed = engine.ensure_package_manager(&locator).await?;

    if activate {
        engine.activate_package_manager(&locator)?;
    }

    Ok(PreparedItem {
        name: locator.name,
        version: locator.reference,
        location: installed.location,
        activated: activate,
    })
}

fn print_item(item: &PreparedItem) {
    let suffix = if item.activated { " (activated)" } else { "" };
    println!(
        "Prepared {}@{} at {}{suffix}",
        item.name,
        item.version,
        item.location.display()
    );
}
