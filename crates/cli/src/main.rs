use clap::{Parser, Subcommand};
use kgate::command;
use kgate::policy::{tokenize, Policy};

#[derive(Parser)]
#[command(name = "kgate")]
#[command(about = "Chat-driven kubectl gateway for Mattermost", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Write a default configuration file (Mattermost settings must then be filled in).
    Init {
        /// Config file path (default: KGATE_CONFIG_PATH or ~/.kgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Connect to Mattermost and answer commands in the monitored channel until interrupted.
    Run {
        /// Config file path (default: KGATE_CONFIG_PATH or ~/.kgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Show what the policy does with a message, without running anything.
    Check {
        /// Config file path (default: KGATE_CONFIG_PATH or ~/.kgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Message text, e.g. `!k prod get pods`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        message: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("kgate {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run_bot(config).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config, message }) => match run_check(config, &message.join(" ")) {
            Ok(true) => {}
            Ok(false) => std::process::exit(2),
            Err(e) => {
                log::error!("check failed: {:#}", e);
                std::process::exit(1);
            }
        },
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(kgate::config::default_config_path);
    if kgate::init::init_config_file(&path)? {
        println!("wrote default configuration to {}", path.display());
    } else {
        println!("configuration already exists at {}", path.display());
    }
    Ok(())
}

async fn run_bot(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = kgate::config::load_config(config_path)?;
    log::info!("loaded configuration from {}", path.display());
    kgate::gateway::run_gateway(config).await
}

/// Prints the verdict. Returns false when the message would be rejected.
fn run_check(config_path: Option<std::path::PathBuf>, text: &str) -> anyhow::Result<bool> {
    let (config, _) = kgate::config::load_config(config_path)?;
    let policy = Policy::from_config(&config.policy)?;
    let tokens = tokenize(text);
    match policy.validate(&tokens) {
        Ok(Some(cmd)) => {
            println!("allowed: {}", command::build(&policy, &cmd).display());
            Ok(true)
        }
        Ok(None) => {
            println!(
                "not a command (first token is not {})",
                policy.trigger_prefix()
            );
            Ok(true)
        }
        Err(rejection) => {
            println!("rejected: {}", rejection);
            Ok(false)
        }
    }
}
