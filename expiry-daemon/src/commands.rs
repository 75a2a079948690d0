use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use expiry_config::ExpiryConfig;
use expiry_core::{
    ExpiryError, MetadataStore, Notifier, TracingNotifier, WatchSupervisor, metadata::format_instant,
    remaining_label,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::{FolderAction, When};

fn metadata(config: &ExpiryConfig) -> Arc<MetadataStore> {
    Arc::new(MetadataStore::new(config.storage.metadata_mode))
}

async fn supervisor(config: ExpiryConfig) -> Result<WatchSupervisor> {
    let store = metadata(&config);
    WatchSupervisor::start(config.into_supervisor_config(), store)
        .await
        .context("failed to start watch supervisor")
}

/// Foreground daemon: deliver every event until Ctrl-C.
pub async fn run(config: ExpiryConfig) -> Result<()> {
    let supervisor = supervisor(config).await?;
    let mut events = supervisor.subscribe();
    let notifier = TracingNotifier;

    for folder in supervisor.list_folders() {
        info!(folder = %folder.path.display(), name = %folder.display_name, "watching");
    }

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for shutdown signal");
                }
                info!("shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => notifier.deliver(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification consumer fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

pub async fn set(config: &ExpiryConfig, file: &Path, when: &When) -> Result<()> {
    let instant = when.resolve(Utc::now())?;
    let store = metadata(config);
    let path = file.to_path_buf();
    tokio::task::spawn_blocking(move || store.set(&path, instant))
        .await?
        .with_context(|| format!("failed to set expiration of {}", file.display()))?;
    println!("{}\t{}", file.display(), format_instant(instant));
    Ok(())
}

pub async fn clear(config: &ExpiryConfig, file: &Path) -> Result<()> {
    let store = metadata(config);
    let path = file.to_path_buf();
    tokio::task::spawn_blocking(move || store.remove(&path))
        .await?
        .with_context(|| format!("failed to clear expiration of {}", file.display()))?;
    println!("{}\tcleared", file.display());
    Ok(())
}

pub async fn show(config: &ExpiryConfig, file: &Path) -> Result<()> {
    if !file.is_file() {
        return Err(ExpiryError::FileNotFound(file.to_path_buf()).into());
    }
    let store = metadata(config);
    let path = file.to_path_buf();
    let expiration = tokio::task::spawn_blocking(move || store.get(&path)).await?;
    match expiration {
        Some(instant) => println!(
            "{}\t{}\t{}",
            file.display(),
            format_instant(instant),
            remaining_label(instant - Utc::now())
        ),
        None => println!("{}\tno expiration", file.display()),
    }
    Ok(())
}

pub async fn files(config: ExpiryConfig, folder: &Path) -> Result<()> {
    let store = metadata(&config);
    let folder = folder.to_path_buf();
    let listed = folder.clone();
    let entries = tokio::task::spawn_blocking(move || {
        expiry_core::fs::list_regular_files(&listed, expiry_core::fs::HiddenFiles::Skip)
            .map(|paths| {
                paths
                    .into_iter()
                    .map(|path| {
                        let expiration = store.get(&path);
                        (path, expiration)
                    })
                    .collect::<Vec<_>>()
            })
    })
    .await?
    .with_context(|| format!("failed to list {}", folder.display()))?;

    let now = Utc::now();
    for (path, expiration) in entries {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        match expiration {
            Some(instant) => println!(
                "{}\t{}\t{}",
                name,
                format_instant(instant),
                remaining_label(instant - now)
            ),
            None => println!("{name}\t-"),
        }
    }
    Ok(())
}

pub async fn expiring(
    config: ExpiryConfig,
    folder: Option<&Path>,
    limit: Option<usize>,
) -> Result<()> {
    let supervisor = supervisor(config).await?;
    supervisor.run_sweep().await.context("expiration sweep failed")?;

    let folders: Vec<_> = match folder {
        Some(folder) => vec![std::path::absolute(folder)?],
        None => supervisor
            .list_folders()
            .into_iter()
            .map(|folder| folder.path)
            .collect(),
    };

    let now = Utc::now();
    for folder in folders {
        let files = supervisor.get_expiring_files(&folder, limit);
        println!("{}", folder.display());
        if files.is_empty() {
            println!("  (no tracked files)");
        }
        for file in files {
            println!(
                "  {}\t{}\t{}",
                file.file_name,
                format_instant(file.expiration),
                file.time_remaining_label(now)
            );
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

pub async fn folders(config: ExpiryConfig, action: FolderAction) -> Result<()> {
    let mut supervisor = supervisor(config).await?;
    let outcome = match action {
        FolderAction::List => {
            for folder in supervisor.list_folders() {
                println!("{}\t{}", folder.display_name, folder.path.display());
            }
            Ok(())
        }
        FolderAction::Add { path } => match supervisor.add_folder(&path).await {
            Ok(folder) => {
                println!("added {}\t{}", folder.display_name, folder.path.display());
                Ok(())
            }
            Err(err) => Err(err).context("failed to add folder"),
        },
        FolderAction::Remove { path } => match supervisor.remove_folder(&path).await {
            Ok(true) => {
                println!("removed {}", path.display());
                Ok(())
            }
            Ok(false) => {
                println!("{} is not watched", path.display());
                Ok(())
            }
            Err(err) => Err(err).context("failed to remove folder"),
        },
    };
    supervisor.shutdown().await;
    outcome
}

pub fn print_config(config: &ExpiryConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
