//! Filesystem watcher: detects new video files under the watch directory
//! and waits for them to stop growing before enqueuing them.
//!
//! Uses `notify`'s native backend where available, falling back to the
//! poll watcher on network filesystems where inotify events are
//! unreliable.

use crate::config::Config;
use crate::queue::PgQueueStore;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Tracks consecutive stable size/mtime observations for a candidate path.
#[derive(Debug, Clone, Copy)]
struct Observation {
    size: u64,
    modified: std::time::SystemTime,
    stable_count: u32,
}

pub struct StabilityChecker {
    store: Arc<PgQueueStore>,
    config: Arc<Config>,
    observations: HashMap<PathBuf, Observation>,
}

impl StabilityChecker {
    pub fn new(store: Arc<PgQueueStore>, config: Arc<Config>) -> Self {
        Self {
            store,
            config,
            observations: HashMap::new(),
        }
    }

    /// Run the watch + stability loop until `shutdown` resolves.
    pub async fn run(&mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watch_dir = self.config.watch_dir.clone();

        let mut watcher = match spawn_watcher(&watch_dir, tx) {
            Ok(w) => w,
            Err(err) => {
                error!(error = %err, "failed to start filesystem watcher");
                return;
            }
        };

        // Seed with anything already sitting in the directory at startup.
        if let Ok(entries) = std::fs::read_dir(&watch_dir) {
            for entry in entries.flatten() {
                self.observe(entry.path());
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("stability checker shutting down");
                        let _ = watcher.unwatch(&watch_dir);
                        return;
                    }
                }
                Some(event) = rx.recv() => {
                    self.handle_event(event);
                }
                _ = tokio::time::sleep(self.config.stability.check_interval) => {
                    if let Err(err) = self.sweep().await {
                        error!(error = %err, "stability sweep failed");
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        for path in event.paths {
            if self.is_candidate(&path) {
                self.observe(path);
            }
        }
    }

    fn is_candidate(&self, path: &Path) -> bool {
        is_video_file(path, &self.config.video_extensions)
    }

    fn observe(&mut self, path: PathBuf) {
        if !self.is_candidate(&path) {
            return;
        }
        let Ok(metadata) = std::fs::metadata(&path) else {
            self.observations.remove(&path);
            return;
        };
        let size = metadata.len();
        let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);

        self.observations
            .entry(path.clone())
            .and_modify(|obs| {
                if obs.size == size && obs.modified == modified {
                    obs.stable_count += 1;
                } else {
                    obs.size = size;
                    obs.modified = modified;
                    obs.stable_count = 0;
                }
            })
            .or_insert(Observation {
                size,
                modified,
                stable_count: 0,
            });
    }

    /// Re-stat every tracked candidate; enqueue any that have reached the
    /// configured number of consecutive stable checks.
    async fn sweep(&mut self) -> crate::error::Result<()> {
        let mut ready = Vec::new();

        for (path, _) in self.observations.clone() {
            self.observe(path.clone());
            if let Some(obs) = self.observations.get(&path) {
                if obs.stable_count + 1 >= self.config.stability.min_stable_checks {
                    ready.push(path);
                }
            }
        }

        for path in ready {
            self.observations.remove(&path);
            if !path.exists() {
                continue;
            }
            let path_str = path.to_string_lossy().to_string();
            debug!(path = %path_str, "file reached stability threshold, enqueuing");
            match self.store.add(&path_str).await {
                Ok(item) => info!(id = %item.id, path = %path_str, "enqueued"),
                Err(err) => warn!(path = %path_str, error = %err, "failed to enqueue stable file"),
            }
        }

        Ok(())
    }
}

fn is_video_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn spawn_watcher(
    watch_dir: &Path,
    tx: mpsc::UnboundedSender<Event>,
) -> notify::Result<RecommendedWatcher> {
    let poll_fallback = is_network_filesystem(watch_dir);

    let mut watcher = if poll_fallback {
        warn!(dir = %watch_dir.display(), "watch directory looks like a network filesystem, using poll watcher");
        RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(5)),
        )?
    } else {
        RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            NotifyConfig::default(),
        )?
    };

    watcher.watch(watch_dir, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Heuristic: NFS and CIFS mounts under Linux show up in `/proc/mounts`
/// with a recognizable filesystem type; inotify does not reliably report
/// events on them, so such directories fall back to the poll watcher.
fn is_network_filesystem(path: &Path) -> bool {
    #[cfg(target_os = "linux")]
    {
        let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
            return false;
        };
        let path = path.to_string_lossy();
        for line in mounts.lines() {
            let mut parts = line.split_whitespace();
            let (Some(_device), Some(mount_point), Some(fs_type)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            if path.starts_with(mount_point) && matches!(fs_type, "nfs" | "nfs4" | "cifs" | "smbfs") {
                return true;
            }
        }
        false
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = path;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_video_extensions() {
        let extensions = vec!["mp4".to_string(), "mkv".to_string()];
        assert!(!is_video_file(Path::new("note.txt"), &extensions));
        assert!(is_video_file(Path::new("movie.mp4"), &extensions));
        assert!(is_video_file(Path::new("movie.MKV"), &extensions));
    }
}
