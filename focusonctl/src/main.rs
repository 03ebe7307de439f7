mod agent;
mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use focuson::config::{self, Config};
use focuson::store::{JsonFileStore, KeyValueStore, MemoryStore, POPUP_STORE_FILE, SHARED_STORE_FILE};
use focuson_ipc::{Client, Diagnostics, Failure, Outbound, SenderTab, SessionKind, TabStatus};
use tracing_subscriber::EnvFilter;

use crate::agent::{Outcome, PageAgent, TerminalPage};
use crate::sync::SyncClient;

/// How long `visit` waits for the daemon to inject the agent.
const INJECT_WAIT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "focusonctl")]
#[command(about = "Control the FocusOn timer and block list", long_about = None)]
struct Cli {
    /// Socket to talk to instead of the configured one
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current session
    Status,
    /// Start or resume the timer
    Start,
    /// Pause the timer
    Stop,
    /// Switch session kind (focus, short-break, long-break)
    Switch { kind: SessionKind },
    /// Edit the blocked sites
    Block {
        #[command(subcommand)]
        action: BlockAction,
    },
    /// Ask whether a URL would be intercepted right now
    Check { url: String },
    /// Open a URL in a terminal "tab" and go through interception
    Visit {
        url: String,
        #[arg(long, default_value_t = 1)]
        tab: u32,
        /// Entries in the tab's history, including this page
        #[arg(long, default_value_t = 1)]
        history: usize,
    },
    /// Show a desktop notification through the daemon
    Notify { title: String, message: String },
}

#[derive(Subcommand)]
enum BlockAction {
    Add { site: String },
    Remove { site: String },
    Edit { old: String, new: String },
    List,
}

fn open_store(dir: Option<&Path>, file: &str) -> Result<Arc<dyn KeyValueStore>> {
    match dir {
        Some(dir) => {
            let store = JsonFileStore::open(dir.join(file))
                .with_context(|| format!("Failed to open {}", dir.join(file).display()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let config = config::load_config()?;
    let socket = cli
        .socket
        .unwrap_or_else(|| config.daemon.socket_path.clone());

    if let Commands::Visit { url, tab, history } = cli.command {
        return visit(&socket, &config, url, tab, history).await;
    }

    let data_dir = config::data_dir().ok();
    let diagnostics = Arc::new(Diagnostics::new());
    let client = Client::new(&socket).with_diagnostics(diagnostics.clone());
    let mut popup = SyncClient::new(
        client,
        open_store(data_dir.as_deref(), POPUP_STORE_FILE)?,
        open_store(data_dir.as_deref(), SHARED_STORE_FILE)?,
        config.durations,
        diagnostics.clone(),
    );
    popup.mount().await;

    match cli.command {
        Commands::Status => {
            let session = popup.session();
            let state = if session.is_running { "running" } else { "paused" };
            println!("{}  {}  {}", session.kind, session.remaining, state);
        }
        Commands::Start => {
            if !popup.start().await {
                println!("Already running");
            }
        }
        Commands::Stop => {
            if !popup.stop().await {
                println!("Not running");
            }
        }
        Commands::Switch { kind } => {
            popup.switch_kind(kind).await?;
            println!("{}  {}", kind, popup.session().remaining);
        }
        Commands::Block { action } => match action {
            BlockAction::Add { site } => {
                if !popup.block_site(&site).await? {
                    println!("Already blocked or empty: {site}");
                }
            }
            BlockAction::Remove { site } => {
                if !popup.unblock_site(&site).await? {
                    println!("Not blocked: {site}");
                }
            }
            BlockAction::Edit { old, new } => {
                if !popup.edit_site(&old, &new).await? {
                    println!("Not blocked: {old}");
                }
            }
            BlockAction::List => {
                for site in popup.blocked_sites()?.entries() {
                    println!("{site}");
                }
            }
        },
        Commands::Check { url } => match popup.check(&url).await {
            Some(true) => println!("blocked"),
            Some(false) => println!("allowed"),
            None => bail!("focuson did not answer"),
        },
        Commands::Notify { title, message } => {
            if !popup.notify(&title, &message).await {
                bail!("focuson did not answer");
            }
        }
        Commands::Visit { .. } => unreachable!("handled above"),
    }

    if diagnostics.count(Failure::Messaging) > 0 {
        eprintln!("focuson is not answering; showing cached state");
    }
    Ok(())
}

/// Play the browser: report the navigation, and if the daemon injects the
/// agent into this tab, run it against a terminal page.
async fn visit(socket: &Path, config: &Config, url: String, tab: u32, history: usize) -> Result<()> {
    let mut host = Client::new(socket);
    host.subscribe().await.context("Failed to reach focuson")?;
    host.tab_updated(tab, TabStatus::Complete, url.clone()).await?;

    let injected = tokio::time::timeout(INJECT_WAIT, async {
        loop {
            if let Outbound::Inject { tab_id, .. } = host.next_notice().await? {
                if tab_id == tab {
                    return Ok::<_, focuson_ipc::IpcError>(());
                }
            }
        }
    })
    .await;

    match injected {
        Ok(result) => result?,
        Err(_) => {
            println!("Opened {url}");
            return Ok(());
        }
    }

    let client = Client::new(socket).with_sender(SenderTab {
        tab_id: tab,
        url: url.clone(),
    });
    let mut agent = PageAgent::new(client, config.interception.neutral_page.clone());
    let stdin = std::io::stdin();
    let mut page = TerminalPage::new(url.clone(), history, stdin.lock(), std::io::stdout());

    match agent.run(&mut page).await {
        Outcome::Continued | Outcome::Untouched | Outcome::Skipped => println!("Opened {url}"),
        Outcome::WentBack => {}
    }
    Ok(())
}
