use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tutorcall_appcore::CallService;
use tutorcall_core::{AppConfig, CharacterId};

mod session;

#[derive(Parser, Debug)]
#[command(name = "tutorcall", author, version, about = "Voice calls with a tutor character")]
struct Cli {
    /// Config file (defaults to the per-user config directory).
    #[arg(long, env = "TUTORCALL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Session token; overrides the one stored by `login`.
    #[arg(long, env = "TUTORCALL_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a voice call. Type `m` + Enter to toggle mute, `q` + Enter to hang up.
    Call {
        #[arg(long, short = 'c')]
        character: i64,
    },
    /// Store a session token in the OS keyring.
    Login { token: String },
    /// Remove the stored session token.
    Logout,
    /// List microphones.
    Devices,
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective config as JSON.
    Show,
    /// Print the config file location.
    Path,
    /// Write the default config, keeping an existing file unless `--force`.
    Init {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Pick the microphone used for calls. Omit the name to use the system default.
    SetDevice { name: Option<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(tutorcall_runtime::defaults::default_config_path);
    let svc = CallService::new(config_path, cli.token);

    match cli.command {
        Command::Call { character } => {
            let navigator = Arc::new(session::PrintNavigator);
            let handle = svc.start_call(CharacterId(character), navigator).await?;
            session::drive(handle).await?;
        }
        Command::Login { token } => {
            if token.trim().is_empty() {
                anyhow::bail!("token is empty");
            }
            svc.set_session_token(&token)?;
            println!("Session token saved.");
        }
        Command::Logout => {
            svc.clear_session_token()?;
            println!("Session token removed.");
        }
        Command::Devices => {
            let cfg = svc.load_config()?;
            let selected = cfg.capture.microphone_device.as_deref();
            let names = svc.list_microphones()?;
            if names.is_empty() {
                println!("No microphones found.");
            }
            for name in names {
                let mark = if Some(name.as_str()) == selected { "*" } else { " " };
                println!("{mark} {name}");
            }
        }
        Command::Config(cmd) => run_config(&svc, cmd)?,
    }

    Ok(())
}

fn run_config(svc: &CallService, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show => {
            let cfg = svc.load_config()?;
            let json = serde_json::to_string_pretty(&cfg).context("encode config JSON")?;
            println!("{json}");
        }
        ConfigCommand::Path => println!("{}", svc.config_path().display()),
        ConfigCommand::Init { force } => {
            if svc.config_path().exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    svc.config_path().display()
                );
            }
            svc.save_config(&AppConfig::default())?;
            println!("Wrote {}", svc.config_path().display());
        }
        ConfigCommand::SetDevice { name } => {
            let mut cfg = svc.load_config()?;
            cfg.capture.microphone_device = name.filter(|n| !n.trim().is_empty());
            svc.save_config(&cfg)?;
        }
    }
    Ok(())
}
