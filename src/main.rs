use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;
use uuid::Uuid;

use ferry_artifact::UploadFile;
use ferry_config::{ClientConfig, TokenConstraints};
use ferry_orchestrator::{
  CompletionOutcome, DELEGATED_DOWNLOAD_FILENAME, DownloadOptions, DownloadSummary, FlowError,
  TransferEvent, TransferNotifier, TransferOrchestrator, TransferState, UploadOptions,
};
use ferry_transfer::TransferControl;

/// Ferry - upload and download artifacts through token-gated presigned URLs
#[derive(Parser)]
#[command(name = "ferry")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the config file (default: ~/.ferry/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Base URL of the artifact service, overriding the config file
  #[arg(long, global = true)]
  base_url: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Upload a file, requesting an upload token first
  Upload {
    file: PathBuf,

    /// Content type to declare (default: application/octet-stream)
    #[arg(long)]
    content_type: Option<String>,

    #[command(flatten)]
    constraints: ConstraintArgs,
  },

  /// Upload a file through an upload URL issued by someone else
  UploadWithUrl {
    upload_url: Url,

    file: PathBuf,

    #[arg(long)]
    content_type: Option<String>,
  },

  /// Download an artifact, requesting a download token first
  Download {
    artifact_id: Uuid,

    /// Where to write the bytes (default: the artifact id)
    #[arg(long, short)]
    output: Option<PathBuf>,

    #[command(flatten)]
    constraints: ConstraintArgs,
  },

  /// Download through a presigned URL issued by someone else
  DownloadWithUrl {
    presigned_url: Url,

    #[arg(long, short)]
    output: Option<PathBuf>,
  },

  /// Issue a token without transferring anything
  Token {
    #[command(subcommand)]
    scope: TokenTarget,
  },

  /// Show one artifact
  Info { artifact_id: Uuid },

  /// List all artifacts
  List,
}

#[derive(Subcommand)]
enum TokenTarget {
  /// Issue an upload token and print its upload URL
  Upload {
    #[command(flatten)]
    constraints: ConstraintArgs,
  },

  /// Issue a download token and print its presigned URL
  Download {
    artifact_id: Uuid,

    #[command(flatten)]
    constraints: ConstraintArgs,
  },
}

#[derive(Args)]
struct ConstraintArgs {
  /// How many times the token may be used
  #[arg(long, default_value_t = 1)]
  max_uses: u32,

  /// Start of the validity window (RFC 3339)
  #[arg(long)]
  valid_from: Option<DateTime<Utc>>,

  /// End of the validity window (RFC 3339)
  #[arg(long)]
  valid_to: Option<DateTime<Utc>>,

  /// Network range allowed to use the token, e.g. 192.168.1.0/24
  #[arg(long)]
  allowed_cidr: Option<String>,
}

impl ConstraintArgs {
  fn into_constraints(self) -> TokenConstraints {
    let mut constraints = TokenConstraints::default().max_uses(self.max_uses);
    if let Some(at) = self.valid_from {
      constraints = constraints.valid_from(at);
    }
    if let Some(at) = self.valid_to {
      constraints = constraints.valid_to(at);
    }
    if let Some(cidr) = self.allowed_cidr {
      constraints = constraints.allowed_cidr(cidr);
    }
    constraints
  }
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();

  let Some(command) = cli.command else {
    println!("ferry - use --help to see available commands");
    return Ok(());
  };

  let config = load_config(cli.config, cli.base_url)?;
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_until_interrupted(command, config).await })
}

fn load_config(path: Option<PathBuf>, base_url: Option<String>) -> Result<ClientConfig> {
  let explicit = path.is_some();
  let path = path.or_else(|| dirs::home_dir().map(|home| home.join(".ferry").join("config.json")));

  let from_file = match path {
    Some(path) if path.exists() => {
      let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
      let config = ClientConfig::from_json(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
      Some(config)
    }
    Some(path) if explicit => bail!("config file not found: {}", path.display()),
    _ => None,
  };

  match (from_file, base_url) {
    (Some(mut config), Some(base_url)) => {
      config.base_url = ClientConfig::new(&base_url)
        .with_context(|| format!("invalid base url: {base_url}"))?
        .base_url;
      Ok(config)
    }
    (None, Some(base_url)) => {
      ClientConfig::new(&base_url).with_context(|| format!("invalid base url: {base_url}"))
    }
    (Some(config), None) => Ok(config),
    (None, None) => bail!("no artifact service configured: pass --base-url or create ~/.ferry/config.json"),
  }
}

/// Publishes the flow's current state to a watch channel.
struct StateWatch(watch::Sender<TransferState>);

impl TransferNotifier for StateWatch {
  fn notify(&self, event: TransferEvent) {
    if let TransferEvent::StateChanged { to, .. } = event {
      self.0.send_replace(to);
    }
  }
}

/// Run a command until it finishes or Ctrl-C arrives.
///
/// Ctrl-C during a byte transfer cancels it and waits for the flow to report
/// the cancellation. Anywhere else, or on a second Ctrl-C, the command is
/// abandoned.
async fn run_until_interrupted(command: Commands, config: ClientConfig) -> Result<()> {
  tracing::debug!(base_url = %config.base_url, "config_loaded");

  let (state_tx, state_rx) = watch::channel(TransferState::Idle);
  let orchestrator = TransferOrchestrator::new(config)
    .context("failed to create http client")?
    .with_notifier(StateWatch(state_tx));
  let cancel = CancellationToken::new();

  let run = run(command, &orchestrator, &cancel);
  tokio::pin!(run);

  tokio::select! {
    result = &mut run => return result,
    Ok(()) = tokio::signal::ctrl_c() => {}
  }

  if !interrupt_cancels(*state_rx.borrow()) {
    eprintln!();
    bail!("interrupted");
  }

  cancel.cancel();
  tokio::select! {
    result = &mut run => result,
    Ok(()) = tokio::signal::ctrl_c() => bail!("interrupted"),
  }
}

/// Whether Ctrl-C in `state` is handed to the flow as a cancellation.
fn interrupt_cancels(state: TransferState) -> bool {
  state == TransferState::Transferring
}

async fn run(command: Commands, orchestrator: &TransferOrchestrator, cancel: &CancellationToken) -> Result<()> {
  match command {
    Commands::Upload {
      file,
      content_type,
      constraints,
    } => {
      let file = open_upload(&file, content_type.as_deref()).await?;
      let options = UploadOptions::default()
        .with_constraints(constraints.into_constraints())
        .with_control(transfer_control(cancel));
      let receipt = orchestrator
        .upload(file, options)
        .await
        .map_err(flow_failed)?;

      if let CompletionOutcome::Warning(warning) = &receipt.completion {
        eprintln!("warning: upload not acknowledged: {warning}");
      }
      println!("{}", serde_json::to_string_pretty(&receipt)?);
    }
    Commands::UploadWithUrl {
      upload_url,
      file,
      content_type,
    } => {
      let file = open_upload(&file, content_type.as_deref()).await?;
      let receipt = orchestrator
        .upload_with_token_url(&upload_url, file, transfer_control(cancel))
        .await
        .map_err(flow_failed)?;

      if let CompletionOutcome::Warning(warning) = &receipt.completion {
        eprintln!("warning: upload not acknowledged: {warning}");
      }
      println!("{}", serde_json::to_string_pretty(&receipt)?);
    }
    Commands::Download {
      artifact_id,
      output,
      constraints,
    } => {
      let path = output.unwrap_or_else(|| PathBuf::from(artifact_id.to_string()));
      let mut partial = PartialFile::create(&path)?;
      let options = DownloadOptions::default()
        .with_constraints(constraints.into_constraints())
        .with_control(transfer_control(cancel));
      let summary = orchestrator
        .download_to(artifact_id, options, &mut partial.file)
        .await
        .map_err(flow_failed)?;
      report_download(&partial.persist()?, &summary)?;
    }
    Commands::DownloadWithUrl {
      presigned_url,
      output,
    } => {
      let path = output.unwrap_or_else(|| PathBuf::from(DELEGATED_DOWNLOAD_FILENAME));
      let mut partial = PartialFile::create(&path)?;
      let summary = orchestrator
        .download_with_token_url_to(&presigned_url, transfer_control(cancel), &mut partial.file)
        .await
        .map_err(flow_failed)?;
      report_download(&partial.persist()?, &summary)?;
    }
    Commands::Token { scope } => {
      let token = match scope {
        TokenTarget::Upload { constraints } => orchestrator
          .create_upload_token(&constraints.into_constraints())
          .await
          .context("failed to issue upload token")?,
        TokenTarget::Download {
          artifact_id,
          constraints,
        } => orchestrator
          .create_download_token(artifact_id, &constraints.into_constraints())
          .await
          .context("failed to issue download token")?,
      };

      let output = serde_json::json!({
        "token": token.value,
        "scope": token.scope.as_str(),
        "url": token.follow_up_url.as_str(),
        "type": token.kind,
      });
      println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Commands::Info { artifact_id } => {
      let artifact = orchestrator
        .get_artifact(artifact_id)
        .await
        .with_context(|| format!("failed to look up artifact {artifact_id}"))?;
      println!("{}", serde_json::to_string_pretty(&artifact)?);
    }
    Commands::List => {
      let artifacts = orchestrator
        .list_artifacts()
        .await
        .context("failed to list artifacts")?;
      println!("{}", serde_json::to_string_pretty(&artifacts)?);
    }
  }

  Ok(())
}

async fn open_upload(path: &Path, content_type: Option<&str>) -> Result<UploadFile> {
  UploadFile::from_path(path, content_type)
    .await
    .with_context(|| format!("failed to open {}", path.display()))
}

/// Progress on stderr, cancelled through `cancel`.
fn transfer_control(cancel: &CancellationToken) -> TransferControl {
  TransferControl::default()
    .with_cancel(cancel.clone())
    .with_progress(|percent: u8| {
      eprint!("\rprogress: {percent:>3}%");
      if percent == 100 {
        eprintln!();
      }
    })
}

fn flow_failed(err: FlowError) -> anyhow::Error {
  if err.is_cancelled() {
    eprintln!();
    anyhow::anyhow!("transfer cancelled")
  } else {
    anyhow::Error::new(err)
  }
}

/// A download written next to its destination and renamed into place once
/// complete. Dropping it unfinished deletes the partial bytes.
struct PartialFile {
  temp: NamedTempFile,
  file: tokio::fs::File,
  path: PathBuf,
}

impl PartialFile {
  fn create(path: &Path) -> Result<Self> {
    let dir = path
      .parent()
      .filter(|dir| !dir.as_os_str().is_empty())
      .unwrap_or(Path::new("."));
    let temp = tempfile::Builder::new()
      .prefix(".ferry-")
      .suffix(".part")
      .tempfile_in(dir)
      .with_context(|| format!("failed to create a file in {}", dir.display()))?;
    let file = tokio::fs::File::from_std(temp.reopen()?);

    Ok(Self {
      temp,
      file,
      path: path.to_path_buf(),
    })
  }

  fn persist(self) -> Result<PathBuf> {
    let Self { temp, file, path } = self;
    drop(file);
    temp
      .persist(&path)
      .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
  }
}

fn report_download(path: &Path, summary: &DownloadSummary) -> Result<()> {
  eprintln!("Saved {} bytes to {}", summary.size, path.display());
  let output = serde_json::json!({
    "path": path.display().to_string(),
    "size": summary.size,
    "content_type": summary.content_type,
  });
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}
