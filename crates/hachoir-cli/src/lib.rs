#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use hachoir_client_core::config::{resolve_base_url, resolve_state_file};
use hachoir_client_core::cookie::CookieLookup;
use hachoir_client_core::options::{OPT_HEX, OPT_RAW, OPT_REL, PayloadEncoding};
use hachoir_client_core::store::FileStore;
use hachoir_http_client::{
    DownloadKind, UpdateOutcome, ViewerClient, ViewerClientConfig, ViewerSession,
};

mod terminal;

pub use terminal::TerminalPage;

#[derive(Parser, Debug)]
#[command(name = "hachoir-view")]
#[command(about = "Browse a file through a hachoir web viewer from the terminal")]
pub struct ViewerCli {
    /// Viewer base URL. Defaults to HACHOIR_BASE_URL, then http://127.0.0.1:8000.
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    /// Where viewer cookies are kept between runs.
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,
    /// Form-encode option values instead of sending them verbatim.
    #[arg(long, global = true)]
    pub encode_payload: bool,
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,
    /// Do not print the busy line and progress to stderr.
    #[arg(long, short, global = true)]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Upload a file and open it in a new viewer session
    Upload { file: PathBuf },
    /// Render the current view
    Show,
    /// Point the selected stream at a path
    Goto { path: String },
    /// Switch a display toggle on or off
    Toggle { name: Toggle, state: Switch },
    /// Parse the sub-stream at a path as a new stream
    AddStream { path: String },
    /// Drop a stream by index
    DelStream { index: usize },
    /// Select a stream by index
    Stream { index: usize },
    /// Save a field of the selected stream to disk
    Download {
        field: String,
        /// Save the sub-stream the field carries instead of its raw bytes.
        #[arg(long)]
        substream: bool,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toggle {
    Raw,
    Hex,
    Rel,
}

impl Toggle {
    pub fn option_name(self) -> &'static str {
        match self {
            Self::Raw => OPT_RAW,
            Self::Hex => OPT_HEX,
            Self::Rel => OPT_REL,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

type TerminalSession = ViewerSession<FileStore, TerminalPage>;

pub async fn run(cli: ViewerCli) -> Result<()> {
    let session = open_session(&cli)?;

    session.restore_options().context("restore viewer options")?;
    let outcome = match cli.command {
        Commands::Upload { file } => {
            session
                .upload_file(&file)
                .await
                .with_context(|| format!("upload {}", file.display()))?;
            session.init().await.context("render uploaded file")?
        }
        Commands::Show => session.trigger_update().await?,
        Commands::Goto { path } => session.navigate_to(&path).await?,
        Commands::Toggle { name, state } => {
            session
                .set_toggle(name.option_name(), state == Switch::On)
                .await?
        }
        Commands::AddStream { path } => session.add_stream(&path).await?,
        Commands::DelStream { index } => session.remove_stream(index).await?,
        Commands::Stream { index } => session.select_stream(index).await?,
        Commands::Download {
            field,
            substream,
            output,
        } => {
            let kind = if substream {
                DownloadKind::Substream
            } else {
                DownloadKind::Raw
            };
            let download = session.download_field(&field, kind).await?;
            let target = output.unwrap_or_else(|| {
                PathBuf::from(download.filename.clone().unwrap_or_else(|| field.clone()))
            });
            tokio::fs::write(&target, &download.bytes)
                .await
                .with_context(|| format!("write {}", target.display()))?;
            if !cli.quiet {
                eprintln!("saved {} bytes to {}", download.bytes.len(), target.display());
            }
            return Ok(());
        }
    };
    render(&session, &outcome)
}

fn open_session(cli: &ViewerCli) -> Result<TerminalSession> {
    let resolved = resolve_base_url(cli.base_url.as_deref())?;
    tracing::debug!(
        base_url = %resolved.base_url,
        source = resolved.source,
        "resolved viewer base url"
    );
    let state_file = resolve_state_file(cli.state_file.clone())?;
    let store = FileStore::open(&state_file, CookieLookup::Exact)
        .with_context(|| format!("open state file {}", state_file.display()))?;

    let mut config = ViewerClientConfig::new(resolved.base_url);
    config.timeout_ms = cli.timeout_ms;
    if cli.encode_payload {
        config.payload_encoding = PayloadEncoding::Form;
    }
    let client = ViewerClient::new(config)?;
    Ok(ViewerSession::new(client, store, TerminalPage::new(!cli.quiet)))
}

fn render(session: &TerminalSession, outcome: &UpdateOutcome) -> Result<()> {
    println!("{}", session.view().content());
    if !outcome.completed() {
        bail!("viewer answered with status {}", outcome.status);
    }
    let toggles = session.view().enabled_toggles();
    tracing::debug!(
        hpath = %session.options().current_path().unwrap_or_default(),
        toggles = %toggles,
        "view rendered"
    );
    Ok(())
}
