use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, SubsecRound, Utc};
use expiry_core::{
    ExpiryEvent, MetadataMode, MetadataStore, SupervisorConfig, SweeperConfig, WatchStrategy,
    WatchSupervisor, WatcherConfig,
};
use tempfile::{TempDir, tempdir};
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn quiet_config(root: &Path) -> SupervisorConfig {
    SupervisorConfig {
        watcher: WatcherConfig {
            strategy: WatchStrategy::Polling,
            debounce_window: Duration::from_millis(20),
            poll_interval: Duration::from_secs(3600),
        },
        sweeper: SweeperConfig {
            interval: Duration::from_secs(3600),
            initial_delay: Duration::from_secs(3600),
            ..SweeperConfig::default()
        },
        watch_list_path: Some(root.join("state").join("watched_folders.json")),
        default_folder: Some(root.join("downloads")),
        ..SupervisorConfig::default()
    }
}

/// Watchers react on their own: short ticks, short debounce.
fn live_config(root: &Path, strategy: WatchStrategy) -> SupervisorConfig {
    let mut config = quiet_config(root);
    config.watcher = WatcherConfig {
        strategy,
        debounce_window: Duration::from_millis(300),
        poll_interval: Duration::from_millis(100),
    };
    config
}

async fn setup() -> (TempDir, WatchSupervisor) {
    setup_with(quiet_config).await
}

async fn setup_with<F>(config: F) -> (TempDir, WatchSupervisor)
where
    F: FnOnce(&Path) -> SupervisorConfig,
{
    let root = tempdir().unwrap();
    fs::create_dir(root.path().join("downloads")).unwrap();
    let store = Arc::new(MetadataStore::new(MetadataMode::Auto));
    let supervisor = WatchSupervisor::start(config(root.path()), store)
        .await
        .unwrap();
    (root, supervisor)
}

/// Every `NewFilesDetected` file list seen for `folder` within `window`.
async fn detections_for(
    rx: &mut broadcast::Receiver<ExpiryEvent>,
    folder: &Path,
    window: Duration,
) -> Vec<Vec<PathBuf>> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        if let ExpiryEvent::NewFilesDetected { folder_path, files } = event
            && folder_path == folder
        {
            seen.push(files);
        }
    }
    seen
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<ExpiryEvent>, mut pred: F) -> ExpiryEvent
where
    F: FnMut(&ExpiryEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_file_is_announced_once_then_absorbed_after_recording() {
    let (root, supervisor) = setup().await;
    let downloads = root.path().join("downloads");
    let mut events = supervisor.subscribe();

    let report = downloads.join("report.pdf");
    fs::write(&report, b"%PDF").unwrap();
    assert!(supervisor.rescan_folder(&downloads));

    let event = next_matching(&mut events, |event| {
        matches!(event, ExpiryEvent::NewFilesDetected { .. })
    })
    .await;
    assert_eq!(
        event,
        ExpiryEvent::NewFilesDetected {
            folder_path: downloads.clone(),
            files: vec![report.clone()],
        }
    );

    let expires = supervisor
        .set_expiration_preset(&report, expiry_core::ExpirationPreset::OneDay)
        .await
        .unwrap();
    assert_eq!(
        supervisor.expiration_of(&report).await.unwrap(),
        Some(expires.trunc_subsecs(0))
    );

    // The known file is not announced again; a later file is.
    let notes = downloads.join("notes.txt");
    fs::write(&notes, b"hi").unwrap();
    assert!(supervisor.rescan_folder(&downloads));
    let event = next_matching(&mut events, |event| {
        matches!(event, ExpiryEvent::NewFilesDetected { .. })
    })
    .await;
    assert_eq!(
        event,
        ExpiryEvent::NewFilesDetected {
            folder_path: downloads.clone(),
            files: vec![notes],
        }
    );

    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_file_is_reported_on_every_sweep() {
    let (root, supervisor) = setup().await;
    let downloads = root.path().join("downloads");
    let stale = downloads.join("stale.iso");
    fs::write(&stale, b"x").unwrap();
    supervisor
        .set_expiration(&stale, Utc::now() - ChronoDuration::days(1))
        .await
        .unwrap();

    let mut events = supervisor.subscribe();
    for _ in 0..2 {
        let snapshot = supervisor.run_sweep().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        let event = next_matching(&mut events, |event| {
            matches!(event, ExpiryEvent::FileExpired { .. })
        })
        .await;
        match event {
            ExpiryEvent::FileExpired {
                file_path,
                folder_path,
                ..
            } => {
                assert_eq!(file_path, stale);
                assert_eq!(folder_path, downloads);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    let top = supervisor.get_expiring_files(&downloads, None);
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].file_name, "stale.iso");

    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn polling_tick_announces_new_file() {
    let (root, mut supervisor) =
        setup_with(|root| live_config(root, WatchStrategy::Polling)).await;
    let inbox = root.path().join("inbox");
    fs::create_dir(&inbox).unwrap();
    let mut events = supervisor.subscribe();
    supervisor.add_folder(&inbox).await.unwrap();

    let file = inbox.join("x.bin");
    fs::write(&file, b"payload").unwrap();

    let event = next_matching(&mut events, |event| {
        matches!(event, ExpiryEvent::NewFilesDetected { folder_path, .. } if *folder_path == inbox)
    })
    .await;
    assert_eq!(
        event,
        ExpiryEvent::NewFilesDetected {
            folder_path: inbox.clone(),
            files: vec![file],
        }
    );

    // Later ticks find nothing new.
    assert!(
        detections_for(&mut events, &inbox, Duration::from_millis(500))
            .await
            .is_empty()
    );
    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn native_burst_is_announced_once_after_debounce() {
    let (root, mut supervisor) =
        setup_with(|root| live_config(root, WatchStrategy::Native)).await;
    let inbox = root.path().join("inbox");
    fs::create_dir(&inbox).unwrap();
    let mut events = supervisor.subscribe();
    supervisor.add_folder(&inbox).await.unwrap();

    // A download landing as a partial file and renamed into place.
    let partial = inbox.join("x.part");
    let finished = inbox.join("x.bin");
    fs::write(&partial, b"half").unwrap();
    fs::write(&partial, b"half and the rest").unwrap();
    fs::rename(&partial, &finished).unwrap();

    let detections = detections_for(&mut events, &inbox, Duration::from_secs(2)).await;
    assert_eq!(detections, vec![vec![finished]]);
    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removed_folder_goes_silent() {
    let (root, mut supervisor) =
        setup_with(|root| live_config(root, WatchStrategy::Polling)).await;
    let projects = root.path().join("projects");
    fs::create_dir(&projects).unwrap();

    // A tracked file in the folder so a sweep would have something to say.
    let tracked = projects.join("build.tar");
    fs::write(&tracked, b"x").unwrap();
    supervisor
        .set_expiration(&tracked, Utc::now() - ChronoDuration::minutes(1))
        .await
        .unwrap();

    let mut events = supervisor.subscribe();
    let added = supervisor.add_folder(&projects).await.unwrap();
    assert_eq!(added.display_name, "projects");
    next_matching(&mut events, |event| *event == ExpiryEvent::WatchListChanged).await;
    assert_eq!(supervisor.list_folders().len(), 2);

    // While watched, the poller picks files up on its own.
    let early = projects.join("early.bin");
    fs::write(&early, b"x").unwrap();
    let event = next_matching(&mut events, |event| {
        matches!(event, ExpiryEvent::NewFilesDetected { folder_path, .. } if *folder_path == projects)
    })
    .await;
    assert_eq!(
        event,
        ExpiryEvent::NewFilesDetected {
            folder_path: projects.clone(),
            files: vec![early],
        }
    );

    assert!(supervisor.remove_folder(&projects).await.unwrap());
    next_matching(&mut events, |event| *event == ExpiryEvent::WatchListChanged).await;
    assert!(!supervisor.rescan_folder(&projects));

    fs::write(projects.join("late.bin"), b"x").unwrap();
    let snapshot = supervisor.run_sweep().await.unwrap();
    assert!(snapshot.is_empty());

    // Several poll intervals pass without a word about the folder.
    tokio::time::sleep(Duration::from_millis(500)).await;
    while let Ok(event) = events.try_recv() {
        assert_ne!(event.folder_path(), Some(projects.as_path()), "{event:?}");
    }

    // Persisted list reflects the removal across restarts.
    let folders = supervisor.list_folders();
    supervisor.shutdown().await;
    let store = Arc::new(MetadataStore::new(MetadataMode::Auto));
    let restarted = WatchSupervisor::start(quiet_config(root.path()), store)
        .await
        .unwrap();
    let reloaded: Vec<_> = restarted
        .list_folders()
        .into_iter()
        .map(|folder| folder.path)
        .collect();
    assert_eq!(
        reloaded,
        folders.into_iter().map(|folder| folder.path).collect::<Vec<_>>()
    );
    restarted.shutdown().await;
}
