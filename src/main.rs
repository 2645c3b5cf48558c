use anyhow::Result;
use clap::Parser;
use nupm::commands::{self, Options};
use nupm::framework::RuntimeProfile;
use nupm::source::{SearchQuery, UpdateOptions};
use std::path::PathBuf;

/// nupm - NuGet packages for game-engine projects
///
/// Installs NuGet packages into `<project>/Assets/Packages`, keeping only
/// the library variant that fits the project's scripting runtime, and
/// records them in `Assets/packages.json`.
///
/// Examples:
///   nupm install Newtonsoft.Json            # Latest version
///   nupm install "Serilog@[2.10,3.0)"       # Highest version in a range
///   nupm restore                            # Install everything recorded
#[derive(Parser, Debug)]
#[command(author, version = env!("NUPM_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (defaults to the current directory; also via NUPM_PROJECT)
    #[arg(
        long = "project",
        short = 'p',
        env = "NUPM_PROJECT",
        value_name = "PATH",
        global = true
    )]
    project: Option<PathBuf>,

    /// Configuration file (defaults to <project>/nupm.json; also via NUPM_CONFIG)
    #[arg(long = "config", env = "NUPM_CONFIG", value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Extra package source: a v3 feed URL or a local directory (repeatable)
    #[arg(long = "source", short = 's', value_name = "URL_OR_PATH", global = true)]
    sources: Vec<String>,

    /// Runtime profile used to pick library variants (modern or full)
    #[arg(long = "profile", value_name = "PROFILE", global = true)]
    profile: Option<RuntimeProfile>,

    /// Do not install from the package cache
    #[arg(long = "no-cache", global = true)]
    no_cache: bool,

    /// Show progress information
    #[arg(long = "verbose", short = 'v', global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install a package and its dependencies
    Install(InstallArgs),

    /// Uninstall a package
    Uninstall(UninstallArgs),

    /// Install every package recorded in the manifest
    Restore,

    /// List installed packages
    List,

    /// Search the package sources
    Search(SearchArgs),

    /// Update installed packages to their newest versions
    Update(UpdateArgs),

    /// Manage the package cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
enum CacheCommands {
    /// Delete every cached package archive
    Clear,
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// Package id, optionally with a version or range: "Id@1.2.3", "Id@[1.0,2.0)"
    #[arg(value_name = "ID[@VERSION]")]
    package: String,

    /// Install even if the host already provides the package
    #[arg(long)]
    force: bool,
}

#[derive(clap::Args, Debug)]
struct UninstallArgs {
    /// Package id
    #[arg(value_name = "ID", required_unless_present = "all")]
    id: Option<String>,

    /// Uninstall every installed package
    #[arg(long, conflicts_with = "id")]
    all: bool,
}

#[derive(clap::Args, Debug)]
struct SearchArgs {
    /// Search term
    #[arg(value_name = "TERM", default_value = "")]
    term: String,

    /// List every version instead of the latest
    #[arg(long = "all-versions")]
    all_versions: bool,

    /// Include pre-release versions
    #[arg(long)]
    prerelease: bool,

    /// Maximum number of results
    #[arg(long, default_value_t = 20)]
    take: usize,

    /// Number of results to skip
    #[arg(long, default_value_t = 0)]
    skip: usize,
}

#[derive(clap::Args, Debug)]
struct UpdateArgs {
    /// Only update this package
    #[arg(value_name = "ID")]
    id: Option<String>,

    /// Include pre-release versions
    #[arg(long)]
    prerelease: bool,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            project: self.project.clone(),
            config: self.config.clone(),
            sources: self.sources.clone(),
            profile: self.profile,
            no_cache: self.no_cache,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let runtime = nupm::runtime::RealRuntime;
    let options = cli.options();

    match cli.command {
        Commands::Install(args) => {
            commands::install(runtime, &options, &args.package, args.force).await?
        }
        Commands::Uninstall(args) => {
            commands::uninstall(runtime, &options, args.id.as_deref(), args.all)?
        }
        Commands::Restore => commands::restore(runtime, &options).await?,
        Commands::List => commands::list(runtime, &options)?,
        Commands::Search(args) => {
            let query = SearchQuery {
                term: args.term,
                include_all_versions: args.all_versions,
                include_prerelease: args.prerelease,
                take: args.take,
                skip: args.skip,
            };
            commands::search(runtime, &options, &query).await?
        }
        Commands::Update(args) => {
            let update = UpdateOptions {
                include_prerelease: args.prerelease,
                ..Default::default()
            };
            commands::update(runtime, &options, args.id.as_deref(), &update).await?
        }
        Commands::Cache {
            command: CacheCommands::Clear,
        } => commands::clear_cache(runtime, &options)?,
    }
    Ok(())
}
