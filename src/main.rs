use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use morlock::api::HttpFetcher;
use morlock::config::{Config, Context};
use morlock::error::MorlockError;
use morlock::{colors, commands, reporter};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "morlock")]
#[command(author, version, about = "Installs developer tools from GitHub-hosted install scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages: app, owner/repo, owner/repo/app or a GitHub URL,
    /// optionally followed by @version
    Install {
        #[arg(required = true)]
        packages: Vec<String>,

        /// Refetch the install script and release list
        #[arg(long)]
        refresh: bool,
    },

    /// Uninstall a package, or one version with name@version (exact, or the
    /// single installed version it matches)
    Uninstall {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Point the launcher at an installed version
    Link {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Remove the launcher, keeping installed versions
    Unlink {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// List installed packages
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Install the newest release of one or all installed packages
    Update {
        /// Package (or all if omitted)
        package: Option<String>,
    },

    /// Install morlock and its toolchain into MORLOCK_HOME
    Bootstrap,

    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    if std::env::var("RUST_LOG").is_err() {
        let level = if cli.verbose { "debug" } else { "warn" };
        unsafe {
            std::env::set_var("RUST_LOG", level);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    colors::init_colors();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            if let Some(output) = e.diagnostics() {
                eprintln!("{}", "build output:".dimmed());
                eprintln!("{}", output.trim_end());
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), MorlockError> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "morlock", &mut std::io::stdout());
        return Ok(());
    }

    let config = Config::from_env();
    tracing::debug!("MORLOCK_HOME={}", config.home.display());
    let fetcher = HttpFetcher::new(&config.api_url, config.github_token.clone())?;
    let ctx = Context::new(config, Arc::new(fetcher), reporter::for_terminal(cli.quiet));

    let work = async {
        match &cli.command {
            Commands::Install { packages, refresh } => {
                commands::install(&ctx, packages, *refresh).await
            }
            Commands::Uninstall { packages } => commands::uninstall(&ctx, packages),
            Commands::Link { packages } => commands::link(&ctx, packages),
            Commands::Unlink { packages } => commands::unlink(&ctx, packages),
            Commands::List { json } => commands::list(&ctx, *json),
            Commands::Update { package } => commands::update(&ctx, package.as_deref()).await,
            Commands::Bootstrap => commands::bootstrap(&ctx).await,
            Commands::Completions { .. } => Ok(()),
        }
    };

    // Dropping `work` unwinds staging guards and locks before exit
    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => Err(MorlockError::Interrupted),
    }
}
