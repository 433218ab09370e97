use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pipeline_common::{BoxError, CancellationToken, Source};
use tracing::{debug, error, info, warn};

use super::{StageServices, require_dirs};
use crate::status::StatusCode;
use crate::task::Task;
use crate::utils::fs::{claim_into_dir, ensure_dir_all_sync_with_op, move_into_dir};
use crate::{Error, Result};

/// Polls the monitor directory for job descriptors.
///
/// A descriptor is claimed by moving it into the work directory, so a file
/// is never picked up twice. Descriptors that cannot be turned into a task are
/// moved to `<monitor>/recycle`.
pub struct JobDiscovery {
    services: StageServices,
}

impl JobDiscovery {
    pub fn new(services: StageServices) -> Self {
        Self { services }
    }

    async fn candidates(&self) -> Result<Vec<PathBuf>> {
        let monitor = &self.services.dirs.monitor;
        let mut entries = tokio::fs::read_dir(monitor)
            .await
            .map_err(|e| Error::io_path("reading monitor directory", monitor, e))?;

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io_path("reading monitor directory", monitor, e))?
        {
            let path = entry.path();
            let is_json = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if is_json && entry.file_type().await.is_ok_and(|t| t.is_file()) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    /// Parse a claimed descriptor and reject sources that are already in flight.
    async fn load(&self, claimed: &Path) -> Result<Task> {
        let mut task = Task::from_json_file(claimed).await?;
        if self.services.registry.is_live(task.src()) {
            return Err(Error::descriptor(
                claimed,
                format!("{} is already being processed", task.src()),
            ));
        }
        task.task_file = Some(claimed.to_path_buf());
        Ok(task)
    }

    async fn quarantine(&self, claimed: &Path) {
        match move_into_dir(claimed, &self.services.dirs.recycle()).await {
            Ok(moved) => warn!(path = %moved.display(), "Descriptor quarantined"),
            Err(e) => error!(path = %claimed.display(), error = %e, "Failed to quarantine descriptor"),
        }
    }
}

#[async_trait]
impl Source<Task> for JobDiscovery {
    fn kind(&self) -> &'static str {
        "discovery"
    }

    fn check_ready(&self) -> std::result::Result<(), BoxError> {
        let dirs = &self.services.dirs;
        require_dirs(&[&dirs.monitor, &dirs.work])?;
        ensure_dir_all_sync_with_op("creating recycle directory", &dirs.recycle())?;
        Ok(())
    }

    async fn poll_next(&self, token: &CancellationToken) -> Option<Task> {
        let candidates = match self.candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to scan monitor directory");
                return None;
            }
        };

        for candidate in candidates {
            if token.is_cancelled() {
                return None;
            }

            let claimed = match claim_into_dir(&candidate, &self.services.dirs.work).await {
                Ok(claimed) => claimed,
                Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                    warn!(
                        path = %candidate.display(),
                        "Monitor and work directories are on different filesystems, descriptor skipped"
                    );
                    continue;
                }
                Err(e) => {
                    debug!(path = %candidate.display(), error = %e, "Could not claim descriptor");
                    continue;
                }
            };

            match self.load(&claimed).await {
                Ok(task) => {
                    info!(src = %task.src(), descriptor = %claimed.display(), "New task");
                    self.services
                        .registry
                        .set_status(task.src(), StatusCode::Wait, "waiting");
                    return Some(task);
                }
                Err(e) => {
                    warn!(descriptor = %claimed.display(), error = %e, "Invalid task descriptor");
                    self.quarantine(&claimed).await;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::Fixture;

    fn drop_descriptor(fixture: &Fixture, name: &str, body: &str) {
        std::fs::write(fixture.services.dirs.monitor.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn claims_one_descriptor_per_poll() {
        let fixture = Fixture::new();
        let discovery = JobDiscovery::new(fixture.services.clone());
        discovery.check_ready().unwrap();
        drop_descriptor(&fixture, "a.json", r#"{"src":"a.mkv","video":"hevc"}"#);
        drop_descriptor(&fixture, "b.json", r#"{"src":"b.mkv","video":"hevc"}"#);
        drop_descriptor(&fixture, "notes.txt", "ignored");

        let first = discovery.poll_next(&fixture.token).await.unwrap();
        assert_eq!(first.src(), "a.mkv");
        assert_eq!(
            first.task_file.as_deref(),
            Some(fixture.services.dirs.work.join("a.json").as_path())
        );
        let status = fixture.services.registry.get("a.mkv").unwrap();
        assert_eq!((status.code, status.desc.as_str()), (StatusCode::Wait, "waiting"));

        let second = discovery.poll_next(&fixture.token).await.unwrap();
        assert_eq!(second.src(), "b.mkv");
        assert!(discovery.poll_next(&fixture.token).await.is_none());
        assert!(fixture.services.dirs.monitor.join("notes.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unclaimable_descriptor_stays_in_monitor_dir() {
        let fixture = Fixture::new();
        let discovery = JobDiscovery::new(fixture.services.clone());
        discovery.check_ready().unwrap();
        std::fs::create_dir_all(fixture.services.dirs.work.join("a.json").join("x")).unwrap();
        drop_descriptor(&fixture, "a.json", r#"{"src":"a.mkv"}"#);
        drop_descriptor(&fixture, "b.json", r#"{"src":"b.mkv"}"#);

        let task = discovery.poll_next(&fixture.token).await.unwrap();
        assert_eq!(task.src(), "b.mkv");
        assert!(fixture.services.dirs.monitor.join("a.json").is_file());
        assert!(fixture.services.dirs.work.join("a.json").is_dir());
        assert!(fixture.services.registry.get("a.mkv").is_none());
    }

    #[tokio::test]
    async fn malformed_descriptor_is_quarantined() {
        let fixture = Fixture::new();
        let discovery = JobDiscovery::new(fixture.services.clone());
        discovery.check_ready().unwrap();
        drop_descriptor(&fixture, "a.json", "{broken");
        drop_descriptor(&fixture, "b.json", r#"{"src":"b.mkv"}"#);

        let task = discovery.poll_next(&fixture.token).await.unwrap();
        assert_eq!(task.src(), "b.mkv");
        assert!(fixture.services.dirs.recycle().join("a.json").is_file());
        assert!(!fixture.services.dirs.work.join("a.json").exists());
    }

    #[tokio::test]
    async fn live_source_is_quarantined() {
        let fixture = Fixture::new();
        let discovery = JobDiscovery::new(fixture.services.clone());
        discovery.check_ready().unwrap();
        fixture
            .services
            .registry
            .set_status("a.mkv", StatusCode::Video, "indexing");
        drop_descriptor(&fixture, "again.json", r#"{"src":"a.mkv"}"#);

        assert!(discovery.poll_next(&fixture.token).await.is_none());
        assert!(fixture.services.dirs.recycle().join("again.json").is_file());

        // finished sources may be submitted again
        fixture
            .services
            .registry
            .set_status("a.mkv", StatusCode::Done, "everything is finished");
        drop_descriptor(&fixture, "again.json", r#"{"src":"a.mkv"}"#);
        assert!(discovery.poll_next(&fixture.token).await.is_some());
    }

    #[tokio::test]
    async fn missing_monitor_dir_is_not_ready() {
        let fixture = Fixture::new();
        std::fs::remove_dir_all(&fixture.services.dirs.monitor).unwrap();
        let discovery = JobDiscovery::new(fixture.services.clone());
        assert!(discovery.check_ready().is_err());
    }
}
