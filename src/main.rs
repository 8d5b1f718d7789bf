//! lacona - Main entry point.
//!
//! Manages addons for the Lacona launcher.
//!
//! Usage: lacona [OPTIONS] <COMMAND>
//!
//! Commands:
//!   ls, list               List installed addons
//!   install [package]      Install a package from npm, or the current directory
//!   uninstall [package]    Uninstall a package, or the current directory's package
//!   link                   Symlink the current directory for development
//!   logs                   Show recent lacona-addons log lines

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use lacona_addons::VERSION;
use lacona_addons::addons::{
    AddonError, AddonManager, AddonStore, InstallSource, NpmRegistry, OperationContext,
    SystemHost, UninstallOutcome, render_listing,
};
use lacona_addons::config::{Config, ConfigOverrides, ENV_ADDONS_DIR, ENV_CONFIG, ENV_REGISTRY};
use lacona_addons::logging;

/// Default number of lines shown by `logs`.
const DEFAULT_LOG_LINES: usize = 200;

#[derive(Parser)]
#[command(name = "lacona", version = VERSION, about = "Manage Lacona addons")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default ~/.lacona/addons.toml).
    #[arg(long, global = true, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Addons folder (overrides config value).
    #[arg(long, global = true, env = ENV_ADDONS_DIR)]
    addons_dir: Option<PathBuf>,

    /// Registry base URL (overrides config value).
    #[arg(long, global = true, env = ENV_REGISTRY)]
    registry: Option<String>,

    /// Print more diagnostics to stderr (repeatable).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed addons.
    #[command(alias = "list")]
    Ls {
        /// Also show link state and directories that are not addons.
        #[arg(long)]
        all: bool,
    },
    /// Install the specified package (or the current directory).
    Install {
        /// npm package name.
        package: Option<String>,
    },
    /// Uninstall the specified package (or the current directory).
    Uninstall {
        /// Installed package name.
        package: Option<String>,
    },
    /// Install dependencies and symlink the current directory into the addons folder.
    Link,
    /// Show recent lacona-addons log lines.
    Logs {
        /// Number of lines to show.
        #[arg(short = 'n', long, default_value_t = DEFAULT_LOG_LINES)]
        lines: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        addons_dir: cli.addons_dir.clone(),
        registry_url: cli.registry.clone(),
    };
    let config = match Config::load(cli.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => return report(&e),
    };

    // Logging is best effort; the command still runs without it.
    let _guard = match logging::init(&config.log_config, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("warning: file logging disabled: {}", e);
            None
        }
    };

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

/// Prints an error and converts it to the process exit code.
fn report(e: &AddonError) -> ExitCode {
    error!("{}", e);
    eprintln!("error: {}", e);
    ExitCode::from(e.exit_code())
}

fn run(command: Commands, config: &Config) -> Result<(), AddonError> {
    if let Commands::Logs { lines } = command {
        for line in logging::tail_logs(&logging::log_directory(), lines)? {
            println!("{}", line);
        }
        return Ok(());
    }

    let registry = NpmRegistry::new(&config.registry_url, config.http_timeout, &config.user_agent)?;
    let manager = AddonManager::new(
        AddonStore::new(config.addons_dir.clone()),
        registry,
        SystemHost::new(),
    )
    .with_extra_ignores(config.extra_ignores.clone());
    let ctx = OperationContext::from_process()?;

    match command {
        Commands::Ls { all } => {
            let listing = manager.list()?;
            for line in render_listing(&listing, all) {
                println!("{}", line);
            }
        }
        Commands::Install { package } => {
            let outcome = manager.install(&ctx, package.as_deref())?;
            match outcome.source {
                InstallSource::Local(_) => println!(
                    "Installed {}@{} into {} ({} files)",
                    outcome.descriptor.name,
                    outcome.descriptor.version,
                    manager.store().slot_path(&outcome.slot).display(),
                    outcome.files
                ),
                InstallSource::Registry { .. } => println!(
                    "{} installed successfully ({})",
                    outcome.slot, outcome.descriptor.version
                ),
            }
        }
        Commands::Uninstall { package } => match manager.uninstall(&ctx, package.as_deref())? {
            UninstallOutcome::Removed(slot) => println!("Uninstalled addon {}", slot),
            UninstallOutcome::AlreadyAbsent(slot) => println!("{} is not installed", slot),
        },
        Commands::Link => {
            println!("Installing dependencies");
            let outcome = manager.link(&ctx)?;
            if outcome.replaced {
                println!("Replaced existing link {}", outcome.slot_path.display());
            }
            println!(
                "Symlinked {} to {}",
                outcome.slot_path.display(),
                outcome.target.display()
            );
            println!("Reloading addons");
        }
        Commands::Logs { .. } => {}
    }

    Ok(())
}
