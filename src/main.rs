use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uplift::config::Config;
use uplift::upload::command::Request;
use uplift::utils::format_record;
use uplift::{
    JsonFileStore, SessionClient, StaticToken, UploadEvent, UploadId, UploadManager, UploadManagerHandle,
    UploadStatus,
};

#[derive(Parser, Debug)]
#[command(name = "uplift", version, about = "Resumable chunked uploads")]
struct Cli {
    /// Config file
    #[arg(short, long, default_value = "uplift.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file, Ctrl-C pauses it
    Upload {
        file: PathBuf,
        /// Destination folder id
        #[arg(long)]
        folder: Option<String>,
    },
    /// Resume a paused or interrupted upload from the same file
    Resume { id: UploadId, file: PathBuf },
    /// List known uploads
    List,
    /// Cancel an upload and delete its remote session
    Cancel { id: UploadId },
    /// Forget completed and failed uploads
    Clear,
    /// Speak the JSON command protocol on stdin/stdout
    Serve,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("uplift=info")))
        .with_writer(std::io::stderr)
        .init();
}

fn start_manager(config: &Config) -> anyhow::Result<UploadManagerHandle> {
    let client = SessionClient::new(config.client_config()).context("Failed to build HTTP client")?;
    let tokens = match config.resolve_token() {
        Some(token) => StaticToken::new(token),
        None => {
            warn!("no token configured, uploads will fail to authenticate");
            StaticToken::none()
        }
    };
    let store = JsonFileStore::new(&config.state_file);

    Ok(UploadManager::new(client, Arc::new(tokens), Arc::new(store), config.upload_config()))
}

/// Print progress for `id` until it stops; Ctrl-C requests a pause.
async fn follow(
    manager: &UploadManager,
    id: UploadId,
    mut events: broadcast::Receiver<UploadEvent>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(UploadEvent::Updated { upload }) if upload.id == id => {
                    println!("{}", format_record(&upload));
                    if matches!(upload.status, UploadStatus::Completed | UploadStatus::Error | UploadStatus::Paused) {
                        return Ok(());
                    }
                }
                Ok(UploadEvent::Removed { id: removed }) if removed == id => return Ok(()),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!(upload_id = %id, "interrupted, pausing");
                if !manager.pause_upload(id).await? {
                    return Ok(());
                }
            }
        }
    }
}

async fn serve(manager: &UploadManager) -> anyhow::Result<()> {
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

    let mut events = manager.subscribe_events();
    let event_tx = line_tx.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let line = serde_json::json!({ "event": event }).to_string();
                    if event_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = line_rx.recv().await {
            if stdout.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => serde_json::to_string(&manager.dispatch(request).await)?,
            Err(err) => serde_json::json!({ "error": format!("Invalid request: {}", err) }).to_string(),
        };
        let _ = line_tx.send(response);
    }

    drop(line_tx);
    writer.abort();
    Ok(())
}

async fn run(command: Command, manager: &UploadManager) -> anyhow::Result<()> {
    match command {
        Command::Upload { file, folder } => {
            let events = manager.subscribe_events();
            let id = manager
                .start_upload_path(&file, folder)
                .await
                .with_context(|| format!("Failed to start upload of {}", file.display()))?;
            println!("{}", id);
            follow(manager, id, events).await
        }
        Command::Resume { id, file } => {
            let events = manager.subscribe_events();
            if !manager.resume_upload_path(id, &file).await? {
                bail!("Upload {} can't be resumed", id);
            }
            follow(manager, id, events).await
        }
        Command::List => {
            for record in manager.list_uploads().await? {
                println!("{}", format_record(&record));
            }
            Ok(())
        }
        Command::Cancel { id } => {
            if !manager.cancel_upload(id).await? {
                bail!("Upload {} not found", id);
            }
            Ok(())
        }
        Command::Clear => {
            let removed = manager.clear_finished().await?;
            println!("removed {} uploads", removed);
            Ok(())
        }
        Command::Serve => serve(manager).await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;

    let handle = start_manager(&config)?;
    let manager = handle.manager.clone();

    let result = run(cli.command, &manager).await;

    drop(manager);
    handle.shutdown().await.context("Failed to stop upload manager")?;

    result
}
