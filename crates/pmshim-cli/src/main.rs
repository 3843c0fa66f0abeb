#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use pmshim_core::Config;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "pmshim")]
#[command(author, version, about = "Run the package manager version your project pins", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Download package managers into the cache ahead of time
    Prepare {
        /// Also make each prepared version the default from now on
        #[arg(long)]
        activate: bool,

        /// Prepare the default version of every supported package manager
        #[arg(long, conflicts_with = "specs")]
        all: bool,

        /// Package managers to prepare (e.g., "yarn@3.2.0", "pnpm@^8", "npm")
        specs: Vec<String>,
    },

    /// Link package manager binaries to pmshim
    Enable {
        /// Directory to create the links in (defaults to pmshim's own)
        #[arg(long, value_name = "DIR")]
        install_directory: Option<PathBuf>,

        /// Package managers to enable (defaults to all)
        names: Vec<String>,
    },

    /// Remove package manager links created by `enable`
    Disable {
        /// Directory to remove the links from (defaults to pmshim's own)
        #[arg(long, value_name = "DIR")]
        install_directory: Option<PathBuf>,

        /// Package managers to disable (defaults to all)
        names: Vec<String>,
    },

    /// Inspect or clear the install cache
    Cache {
        #[command(subcommand)]
        cache_cmd: CacheCommands,
    },

    /// Run a package manager (e.g., `pmshim yarn@3.2.0 install`)
    #[command(external_subcommand)]
    Shim(Vec<String>),
}

#[derive(clap::Subcommand, Debug)]
enum CacheCommands {
    /// List installed package manager versions
    Ls,

    /// Remove every installed version
    Clean,
}

fn main() -> Result<()> {
    // Invoked through a link named after a package manager binary
    if let Some(bin) = argv0_name() {
        if bin != "pmshim" {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            let config = Config::from_env(cwd);
            if let Some(tool) = commands::shim::tool_for_link(&config, &bin)? {
                logging::init(0, false);
                let args: Vec<String> = std::env::args().skip(1).collect();
                return commands::shim::run_bin(&config, &tool, &bin, None, &args, false);
            }
        }
    }

    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    // Build config
    let config = Config::from_env(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(cli.json),
        Some(Commands::Prepare {
            activate,
            all,
            specs,
        }) => {
            let span = tracing::info_span!("prepare", cmd = "prepare", cwd = %cwd.display());
            let _guard = span.enter();
            let action = commands::prepare::PrepareAction {
                specs,
                all,
                activate,
            };
            commands::prepare::run(&config, &action, cli.json)
        }
        Some(Commands::Enable {
            install_directory,
            names,
        }) => commands::enable::enable(&config, install_directory, &names, cli.json),
        Some(Commands::Disable {
            install_directory,
            names,
        }) => commands::enable::disable(&config, install_directory, &names, cli.json),
        Some(Commands::Cache { cache_cmd }) => match cache_cmd {
            CacheCommands::Ls => commands::cache::list(&config, cli.json),
            CacheCommands::Clean => commands::cache::clean(&config, cli.json),
        },
        Some(Commands::Shim(args)) => commands::shim::run(&config, &args, cli.json),
    }
}

/// File stem of the path this process was started through.
fn argv0_name() -> Option<String> {
    let argv0 = std::env::args_os().next()?;
    Path::new(&argv0)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}
