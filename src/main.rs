use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use labclient::auth;
use labclient::config::{BuildValues, Config, ConfigSources};
use labclient::host::Host;
use labclient::notify::TracingNotifier;
use labclient::poller::{Outcome, PollerOptions, StartOutcome, TaskPoller};
use labclient::store::{DEFAULT_STORE_PATH, KvStore, TomlFileStore, keys};
use labclient::transport::Requester;

#[derive(Parser)]
#[command(name = "labclient", version, about = "Client for the lab plot-generation service")]
struct Cli {
    /// Persistent override store (API_BASE, APP_ENV, CLOUD_*, token).
    #[arg(long, env = "LAB_STORE_PATH", default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or edit runtime overrides.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Exchange a login code for a token and store it.
    Login {
        #[arg(long)]
        code: String,
    },
    /// Remove the stored token.
    Logout,
    /// Check that the service is reachable.
    Ping,
    /// Start a plot job and wait for its images.
    Generate {
        /// Start endpoint, e.g. /api/plots/fiber.
        #[arg(long)]
        start_url: String,
        /// JSON payload file, or `-` for stdin.
        #[arg(long)]
        payload: String,
        /// Delay between status polls, in milliseconds.
        #[arg(long, default_value_t = 1500, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: u64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration.
    Show,
    Set { key: String, value: String },
    Unset { key: String },
}

fn known_key(key: &str) -> anyhow::Result<&'static str> {
    keys::ALL
        .iter()
        .copied()
        .find(|k| *k == key)
        .with_context(|| format!("unknown key {key}, expected one of {}", keys::ALL.join(", ")))
}

fn read_payload(source: &str) -> anyhow::Result<serde_json::Value> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("failed to read {source}"))?
    };
    serde_json::from_str(&text).context("payload is not valid JSON")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // Deploy-time values may come from a .env next to the working directory.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let store = Arc::new(TomlFileStore::new(&cli.store));
    let host = Host::standard();

    let config = Config::resolve(&ConfigSources {
        runtime: &*store,
        build: BuildValues::from_env(),
        host: host.kind(),
    });

    let requester = Requester::from_config(&config, &host, store.clone(), Arc::new(TracingNotifier))?;

    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Show => {
                let mut view = serde_json::to_value(&config)?;
                view["transport"] = serde_json::to_value(requester.transport_kind())?;
                view["token"] = match store.get_non_empty(keys::TOKEN) {
                    Some(_) => "[set]".into(),
                    None => "[unset]".into(),
                };
                view["store"] = store.path().display().to_string().into();
                println!("{}", serde_json::to_string_pretty(&view)?);
            }
            ConfigAction::Set { key, value } => {
                let key = known_key(&key)?;
                store.set(key, &value)?;
                tracing::info!(key, "override stored, applies from the next run");
            }
            ConfigAction::Unset { key } => {
                let key = known_key(&key)?;
                store.remove(key)?;
            }
        },
        Command::Login { code } => {
            let login = auth::login(&requester, &code).await?;
            println!("{}", serde_json::to_string_pretty(&login.user)?);
        }
        Command::Logout => auth::logout(&requester)?,
        Command::Ping => {
            let reply = auth::ping(&requester).await?;
            println!("{reply}");
        }
        Command::Generate {
            start_url,
            payload,
            interval_ms,
        } => {
            let payload = read_payload(&payload)?;
            let options = PollerOptions {
                interval: Duration::from_millis(interval_ms),
                ..PollerOptions::default()
            };
            let poller = TaskPoller::with_options(requester, host, options);

            match poller.start_generation(&start_url, payload).await {
                StartOutcome::Started { task_id } => {
                    tracing::info!(task_id, "waiting for task");
                }
                other => bail!("generation did not start: {other:?}"),
            }

            let state = tokio::select! {
                state = poller.wait_until_idle() => state,
                _ = tokio::signal::ctrl_c() => {
                    poller.cancel();
                    poller.state()
                }
            };

            match state.outcome {
                Some(Outcome::Completed { images }) => {
                    println!("{}", serde_json::to_string_pretty(&images)?);
                }
                Some(Outcome::Failed { message }) => bail!("generation failed: {message}"),
                Some(Outcome::Cancelled) | None => bail!("generation cancelled"),
            }
        }
    }

    Ok(())
}
