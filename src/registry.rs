use crate::capabilities::Capabilities;
use crate::error::{Result, ServiceError};
use crate::handle::{DaemonHandle, DaemonInfo};
use crate::options::ServiceOptions;
use crate::port::PortLease;
use crate::teardown::TeardownReport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

enum Entry {
    /// Reserved while the daemon is being started
    Starting,
    Running(DaemonHandle),
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, Entry>> {
    entries.lock().expect("ServiceRegistry lock poisoned")
}

/// A `Starting` entry that is released again unless the start completes,
/// including when the starting future is dropped.
struct Reservation {
    entries: Entries,
    tag: String,
    held: bool,
}

impl Reservation {
    fn promote(mut self, handle: DaemonHandle) {
        lock(&self.entries).insert(self.tag.clone(), Entry::Running(handle));
        self.held = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if matches!(entries.get(&self.tag), Some(Entry::Starting)) {
            entries.remove(&self.tag);
            debug!("Released reservation for service tag '{}'", self.tag);
        }
    }
}

/// Running dockerd instances, keyed by service tag.
///
/// The map lock is never held across an await; a start runs against a
/// `Starting` reservation instead.
pub struct ServiceRegistry {
    caps: Capabilities,
    entries: Entries,
}

impl ServiceRegistry {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn reserve(&self, tag: &str) -> Result<Reservation> {
        let mut entries = lock(&self.entries);
        if entries.contains_key(tag) {
            error!("dockerd with service tag '{}' already executing", tag);
            return Err(ServiceError::AlreadyRunning(tag.to_string()));
        }
        entries.insert(tag.to_string(), Entry::Starting);
        Ok(Reservation {
            entries: Arc::clone(&self.entries),
            tag: tag.to_string(),
            held: true,
        })
    }

    /// Start a daemon for `options.tag`.
    ///
    /// The tag is reserved for the duration of the start so a second `create`
    /// for it fails fast instead of waiting for the first one's readiness poll.
    pub async fn create(
        &self,
        options: &ServiceOptions,
        lease: Option<&dyn PortLease>,
    ) -> Result<DaemonInfo> {
        let reservation = self.reserve(&options.tag)?;

        match DaemonHandle::start(options, &self.caps, lease).await {
            Ok(handle) => {
                let info = handle.info();
                reservation.promote(handle);
                Ok(info)
            }
            Err(e) => {
                drop(reservation);
                error!("The dockerd service could not be started: {}", e);
                Err(e)
            }
        }
    }

    /// Stop and forget the daemon for `tag`. `None` if there was nothing to stop.
    pub async fn dispose(&self, tag: &str) -> Option<TeardownReport> {
        let handle = {
            let mut entries = lock(&self.entries);
            match entries.remove(tag) {
                Some(Entry::Running(handle)) => handle,
                Some(Entry::Starting) => {
                    entries.insert(tag.to_string(), Entry::Starting);
                    // the pending start owns the tag
                    debug!("dockerd '{}' is still starting, nothing to dispose", tag);
                    return None;
                }
                None => {
                    debug!("No dockerd with service tag '{}'", tag);
                    return None;
                }
            }
        };

        info!("Stopping dockerd with service tag '{}'", tag);
        let report = handle.stop().await;
        if !report.is_clean() {
            warn!("dockerd '{}' did not shut down cleanly", tag);
        }
        Some(report)
    }

    /// Whether `tag` is taken, counting starts still in progress.
    pub async fn has_provider(&self, tag: &str) -> bool {
        lock(&self.entries).contains_key(tag)
    }

    /// Stop every running daemon.
    pub async fn dispose_all(&self) -> Vec<(String, TeardownReport)> {
        let tags: Vec<String> = lock(&self.entries)
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Running(_)))
            .map(|(tag, _)| tag.clone())
            .collect();

        let mut reports = Vec::new();
        for tag in tags {
            if let Some(report) = self.dispose(&tag).await {
                reports.push((tag, report));
            }
        }
        reports
    }

    pub async fn list(&self) -> Vec<DaemonInfo> {
        let mut infos: Vec<DaemonInfo> = lock(&self.entries)
            .values()
            .filter_map(|entry| match entry {
                Entry::Running(handle) => Some(handle.info()),
                Entry::Starting => None,
            })
            .collect();
        infos.sort_by(|a, b| a.tag.cmp(&b.tag));
        infos
    }
}
