use crate::error::{Result, ServiceError};
use crate::executor::CommandExecutor;
use crate::paths::BindMountRecord;
use crate::teardown::{TeardownReport, TeardownStep};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Filesystem operations needed for bind mounts.
#[async_trait]
pub trait BindMounter: Send + Sync {
    /// Create `path` and any missing parents.
    async fn create_dir(&self, path: &Path) -> io::Result<()>;

    async fn bind(&self, real: &Path, mount_point: &Path) -> io::Result<()>;

    /// Detach the mount at `mount_point`, lazily if it is busy.
    async fn unmount(&self, mount_point: &Path) -> io::Result<()>;

    /// Remove an empty directory.
    async fn remove_dir(&self, path: &Path) -> io::Result<()>;
}

/// [`BindMounter`] backed by `mount`/`umount` through the executor.
pub struct SystemBindMounter {
    executor: CommandExecutor,
}

impl SystemBindMounter {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[async_trait]
impl BindMounter for SystemBindMounter {
    async fn create_dir(&self, path: &Path) -> io::Result<()> {
        self.executor
            .sudo_check("mkdir", &["-p".to_string(), path_arg(path)])
            .await
            .map(|_| ())
    }

    async fn bind(&self, real: &Path, mount_point: &Path) -> io::Result<()> {
        self.executor
            .sudo_check(
                "mount",
                &["--bind".to_string(), path_arg(real), path_arg(mount_point)],
            )
            .await
            .map(|_| ())
    }

    async fn unmount(&self, mount_point: &Path) -> io::Result<()> {
        self.executor
            .sudo_check("umount", &["-l".to_string(), path_arg(mount_point)])
            .await
            .map(|_| ())
    }

    async fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.executor
            .sudo_check("rmdir", &[path_arg(path)])
            .await
            .map(|_| ())
    }
}

/// Applies bind records strictly and reverses them best-effort.
#[derive(Clone)]
pub struct MountManager {
    mounter: Arc<dyn BindMounter>,
}

impl MountManager {
    pub fn new(mounter: Arc<dyn BindMounter>) -> Self {
        Self { mounter }
    }

    /// Apply every record or none: on the first failure the binds already made
    /// are reversed before the error is returned.
    pub async fn apply(&self, records: &[BindMountRecord]) -> Result<()> {
        for (applied, record) in records.iter().enumerate() {
            if let Err(e) = self.apply_one(record).await {
                warn!(
                    "Bind mount {} -> {} failed, reversing {} applied bind(s)",
                    record.real.display(),
                    record.mount_point.display(),
                    applied
                );
                // the failed record's own mount point, created by apply_one
                if let Err(e) = self.mounter.remove_dir(&record.mount_point).await {
                    debug!("Left {} in place: {}", record.mount_point.display(), e);
                }
                let report = self.reverse(&records[..applied]).await;
                if !report.is_clean() {
                    warn!("Rollback after failed bind left residue");
                }
                return Err(ServiceError::MountFailure {
                    real: record.real.clone(),
                    mount_point: record.mount_point.clone(),
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn apply_one(&self, record: &BindMountRecord) -> io::Result<()> {
        self.mounter.create_dir(&record.mount_point).await?;
        self.mounter.create_dir(&record.real).await?;
        self.mounter.bind(&record.real, &record.mount_point).await?;
        info!(
            real = %record.real.display(),
            mount_point = %record.mount_point.display(),
            "Bind mount applied"
        );
        Ok(())
    }

    /// Undo `records` in reverse order. Never fails; every step is attempted
    /// and its outcome recorded.
    pub async fn reverse(&self, records: &[BindMountRecord]) -> TeardownReport {
        let mut report = TeardownReport::new();

        for record in records.iter().rev() {
            let mount_point = &record.mount_point;
            report.record(
                TeardownStep::Unmount(mount_point.clone()),
                self.mounter.unmount(mount_point).await,
            );
            report.record(
                TeardownStep::RemoveDir(mount_point.clone()),
                self.mounter.remove_dir(mount_point).await,
            );

            // The shared parent goes too once the last tag is gone; it is
            // normal for it to still hold other tags.
            if let Some(parent) = mount_point.parent() {
                match self.mounter.remove_dir(parent).await {
                    Ok(()) => debug!("Removed {}", parent.display()),
                    Err(e) => debug!("Left {} in place: {}", parent.display(), e),
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMounter, MountCall};
    use std::path::PathBuf;

    fn record(n: usize) -> BindMountRecord {
        BindMountRecord {
            real: PathBuf::from(format!("/chroot/real{}", n)),
            mount_point: PathBuf::from(format!("/home/u/.cs-docker/t{}", n)),
        }
    }

    #[tokio::test]
    async fn test_apply_binds_all_records() {
        let mounter = Arc::new(FakeMounter::default());
        let manager = MountManager::new(mounter.clone());

        manager.apply(&[record(1), record(2)]).await.unwrap();

        assert_eq!(mounter.mounted(), vec![record(1).mount_point, record(2).mount_point]);
    }

    #[tokio::test]
    async fn test_failed_bind_reverses_earlier_binds() {
        let mounter = Arc::new(FakeMounter::default().fail_bind_at(&record(3).mount_point));
        let manager = MountManager::new(mounter.clone());

        let err = manager
            .apply(&[record(1), record(2), record(3), record(4)])
            .await
            .unwrap_err();

        match err {
            ServiceError::MountFailure { mount_point, .. } => {
                assert_eq!(mount_point, record(3).mount_point)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(mounter.mounted().is_empty());
        let calls = mounter.calls();
        // bind 4 is never attempted
        assert!(!calls.contains(&MountCall::Bind(record(4).mount_point)));
        // binds 2 then 1 are undone
        let unmounts: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                MountCall::Unmount(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(unmounts, vec![record(2).mount_point, record(1).mount_point]);
        // the directory made for the failed bind is removed too, and never unmounted
        assert!(calls.contains(&MountCall::RemoveDir(record(3).mount_point)));
        assert!(!calls.contains(&MountCall::Unmount(record(3).mount_point)));
    }

    #[tokio::test]
    async fn test_reverse_continues_past_failures() {
        let mounter = Arc::new(FakeMounter::default().fail_unmount_at(&record(2).mount_point));
        let manager = MountManager::new(mounter.clone());
        manager.apply(&[record(1), record(2)]).await.unwrap();

        let report = manager.reverse(&[record(1), record(2)]).await;

        assert!(!report.is_clean());
        let failures: Vec<_> = report.failures().map(|(step, _)| step.clone()).collect();
        assert_eq!(failures, vec![TeardownStep::Unmount(record(2).mount_point)]);
        // record 1 was still processed after record 2 failed
        assert!(!mounter.mounted().contains(&record(1).mount_point));
        assert!(mounter
            .calls()
            .contains(&MountCall::RemoveDir(record(1).mount_point)));
    }

    #[tokio::test]
    async fn test_reverse_of_nothing_is_clean() {
        let manager = MountManager::new(Arc::new(FakeMounter::default()));
        let report = manager.reverse(&[]).await;
        assert!(report.is_clean());
        assert!(report.steps().is_empty());
    }
}
