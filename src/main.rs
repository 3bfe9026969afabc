use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;

use kegrun::commands::{self, Paths};
use kegrun::http::HttpClient;
use kegrun::process::SystemRunner;
use kegrun::runtime::RealRuntime;

/// kegrun - versioned keg build and link coordinator
///
/// Builds formulas from source into per-version kegs and links them into a
/// shared prefix so co-installed versions agree on one runtime layout.
///
/// Examples:
///   kegrun install postgresql@16    # Build and link the engine
///   kegrun install postgis@16      # Build the extension against it
///   kegrun test --all              # Smoke-test everything installed
#[derive(Parser, Debug)]
#[command(author, version = env!("KEGRUN_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Global prefix shared by all packages (also via KEGRUN_PREFIX)
    #[arg(long, env = "KEGRUN_PREFIX", value_name = "PATH", global = true)]
    pub prefix: Option<PathBuf>,

    /// Cellar directory holding the kegs (also via KEGRUN_CELLAR)
    #[arg(long, env = "KEGRUN_CELLAR", value_name = "PATH", global = true)]
    pub cellar: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build a formula from source and link it into the prefix
    Install(InstallArgs),

    /// (Re-)link an installed keg into the prefix
    Link(FormulaArg),

    /// Run post-install smoke tests
    Test(TestArgs),

    /// Download and verify a formula's source archive
    Fetch(FormulaArg),

    /// Show a formula's metadata
    Info(InfoArgs),

    /// Check upstream for newer versions
    Livecheck(FormulaArg),
}

#[derive(clap::Args, Debug)]
struct FormulaArg {
    /// Formula name in the form family@major
    #[arg(value_name = "FORMULA")]
    formula: String,
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// Formula name in the form family@major
    #[arg(value_name = "FORMULA")]
    formula: String,

    /// Use an already-staged source tree instead of fetching
    #[arg(long, value_name = "PATH")]
    build_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct TestArgs {
    /// Formula name in the form family@major
    #[arg(value_name = "FORMULA", required_unless_present = "all")]
    formula: Option<String>,

    /// Test every known formula
    #[arg(long, conflicts_with = "formula")]
    all: bool,
}

#[derive(clap::Args, Debug)]
struct InfoArgs {
    /// Formula name in the form family@major
    #[arg(value_name = "FORMULA")]
    formula: String,

    /// Emit machine-readable JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;
    let runner = SystemRunner;
    let paths = Paths::resolve(&runtime, cli.prefix, cli.cellar)?;

    match cli.command {
        Commands::Install(args) => {
            let client = HttpClient::default_client()?;
            commands::install(
                &runtime,
                &runner,
                &client,
                &paths,
                &args.formula,
                args.build_dir,
            )
            .await?
        }
        Commands::Link(args) => {
            let created = commands::link(&runtime, &paths, &args.formula)?;
            println!("Created {created} symlink(s)");
        }
        Commands::Test(args) => {
            let names: Vec<String> = if args.all {
                kegrun::formulae::all()
                    .iter()
                    .map(|f| f.metadata().name.to_string())
                    .collect()
            } else {
                match args.formula {
                    Some(name) => vec![name],
                    None => bail!("A formula name or --all is required"),
                }
            };
            commands::check(&runtime, &runner, &paths, &names)?
        }
        Commands::Fetch(args) => {
            let client = HttpClient::default_client()?;
            let archive = commands::fetch(&runtime, &client, &paths, &args.formula).await?;
            println!("{}", archive.display());
        }
        Commands::Info(args) => {
            print!(
                "{}",
                commands::info(&runtime, &paths, &args.formula, args.json)?
            );
        }
        Commands::Livecheck(args) => {
            let client = HttpClient::default_client()?;
            println!("{}", commands::livecheck(&client, &args.formula).await?);
        }
    }
    Ok(())
}
