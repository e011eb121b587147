use crate::error::{Result, ServiceError};
use crate::options::PortRange;
use async_trait::async_trait;
use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, trace};

/// A claimed network address for a daemon listener.
///
/// While the lease is bound a placeholder listener occupies the port. The
/// supervisor unbinds it right before spawning the daemon, under `lock`, so
/// two starts sharing an allocator cannot race for the same port.
#[async_trait]
pub trait PortLease: Send + Sync {
    fn address(&self) -> (String, u16);
    async fn lock(&self);
    fn unlock(&self);
    fn bind(&self) -> io::Result<()>;
    fn unbind(&self);
}

/// Holds a lease's lock until dropped.
pub struct LeaseLock<'a> {
    lease: &'a dyn PortLease,
}

impl<'a> LeaseLock<'a> {
    pub async fn acquire(lease: &'a dyn PortLease) -> LeaseLock<'a> {
        lease.lock().await;
        trace!("Port lease locked");
        LeaseLock { lease }
    }
}

impl Drop for LeaseLock<'_> {
    fn drop(&mut self) {
        self.lease.unlock();
        trace!("Port lease unlocked");
    }
}

/// Hands out TCP port leases that share one lock.
#[derive(Clone)]
pub struct PortAllocator {
    gate: Arc<Semaphore>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(1)),
        }
    }

    /// Lease `port` on `host`, or the first free port in `range`.
    pub fn lease(&self, host: &str, port: Option<u16>, range: PortRange) -> Result<TcpPortLease> {
        let candidates: Vec<u16> = match port {
            Some(port) => vec![port],
            None => range.iter().collect(),
        };

        let mut last_error = None;
        for candidate in candidates {
            match TcpListener::bind((host, candidate)) {
                Ok(listener) => {
                    let port = listener.local_addr()?.port();
                    debug!("Leased port {}:{}", host, port);
                    return Ok(TcpPortLease {
                        host: host.to_string(),
                        port,
                        placeholder: Mutex::new(Some(listener)),
                        gate: Arc::clone(&self.gate),
                        held: AtomicBool::new(false),
                    });
                }
                Err(e) => {
                    trace!("Port {}:{} unavailable: {}", host, candidate, e);
                    last_error = Some(e);
                }
            }
        }

        Err(ServiceError::PortLease(match (port, last_error) {
            (Some(port), Some(e)) => format!("port {} on {} unavailable: {}", port, host, e),
            (_, e) => format!(
                "no free port on {} in {}{}",
                host,
                range,
                e.map(|e| format!(" (last error: {})", e)).unwrap_or_default()
            ),
        }))
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TcpPortLease {
    host: String,
    port: u16,
    placeholder: Mutex<Option<TcpListener>>,
    gate: Arc<Semaphore>,
    held: AtomicBool,
}

impl TcpPortLease {
    pub fn is_bound(&self) -> bool {
        self.placeholder
            .lock()
            .map(|listener| listener.is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl PortLease for TcpPortLease {
    fn address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    async fn lock(&self) {
        // The semaphore is never closed, so acquire only fails on a bug.
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
            self.held.store(true, Ordering::SeqCst);
        }
    }

    fn unlock(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            self.gate.add_permits(1);
        }
    }

    fn bind(&self) -> io::Result<()> {
        let mut placeholder = self
            .placeholder
            .lock()
            .map_err(|_| io::Error::other("port lease lock poisoned"))?;
        if placeholder.is_none() {
            *placeholder = Some(TcpListener::bind((self.host.as_str(), self.port))?);
        }
        Ok(())
    }

    fn unbind(&self) {
        if let Ok(mut placeholder) = self.placeholder.lock() {
            if placeholder.take().is_some() {
                debug!("Released placeholder on {}:{}", self.host, self.port);
            }
        }
    }
}

impl Drop for TcpPortLease {
    fn drop(&mut self) {
        self.unlock();
    }
}
