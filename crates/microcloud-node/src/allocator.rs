use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use tokio::net::TcpStream;

/// Ports handed out to workloads.
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 10000..=11500;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10_000;
pub const DEFAULT_CREDENTIAL_LENGTH: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("could not find {wanted} free ports in {start}-{end} after {attempts} attempts")]
    Exhausted {
        wanted: usize,
        start: u16,
        end: u16,
        attempts: u32,
    },

    #[error("port probe failed on port {port}: {source}")]
    Probe {
        port: u16,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub range: RangeInclusive<u16>,
    pub max_attempts: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            range: DEFAULT_PORT_RANGE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Checks whether a port is currently bound on this host.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// `Ok(true)` when nothing answers on the port. `Err` only when the probe
    /// itself could not be carried out.
    async fn is_free(&self, port: u16) -> io::Result<bool>;
}

/// Probes by attempting a TCP connection to the loopback interface.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    pub host: IpAddr,
    pub timeout: Duration,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timeout: Duration::from_millis(250),
        }
    }
}

#[async_trait]
impl PortProbe for TcpProbe {
    async fn is_free(&self, port: u16) -> io::Result<bool> {
        match tokio::time::timeout(self.timeout, TcpStream::connect((self.host, port))).await {
            Ok(Ok(_stream)) => Ok(false),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(true),
            Ok(Err(e)) => Err(e),
            // nothing accepted the connection in time
            Err(_) => Ok(true),
        }
    }
}

type Reservations = Arc<Mutex<HashSet<u16>>>;

fn lock(set: &Reservations) -> std::sync::MutexGuard<'_, HashSet<u16>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Hands out ports that are neither reserved by another in-flight allocation
/// in this process nor bound on the host.
///
/// A port is claimed in the reservation set before it is probed, so two
/// concurrent callers can never both receive it. Reservations last as long as
/// the returned [`PortLease`].
pub struct PortAllocator {
    cfg: AllocatorConfig,
    probe: Arc<dyn PortProbe>,
    reserved: Reservations,
}

impl PortAllocator {
    pub fn new(cfg: AllocatorConfig, probe: Arc<dyn PortProbe>) -> Self {
        Self {
            cfg,
            probe,
            reserved: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Ports currently held by live leases.
    pub fn reserved_count(&self) -> usize {
        lock(&self.reserved).len()
    }

    pub async fn allocate(&self, count: usize) -> Result<PortLease, AllocationError> {
        let start = *self.cfg.range.start();
        let end = *self.cfg.range.end();
        let exhausted = |attempts| AllocationError::Exhausted {
            wanted: count,
            start,
            end,
            attempts,
        };

        let span = usize::from(end.saturating_sub(start)) + 1;
        if start > end || count > span {
            return Err(exhausted(0));
        }

        let mut lease = PortLease {
            ports: Vec::with_capacity(count),
            reserved: self.reserved.clone(),
        };
        let mut attempts = 0u32;

        while lease.ports.len() < count {
            if attempts >= self.cfg.max_attempts {
                return Err(exhausted(attempts));
            }
            attempts += 1;

            let port = rand::thread_rng().gen_range(self.cfg.range.clone());
            if !lock(&self.reserved).insert(port) {
                continue;
            }

            match self.probe.is_free(port).await {
                Ok(true) => lease.ports.push(port),
                Ok(false) => {
                    lock(&self.reserved).remove(&port);
                }
                Err(source) => {
                    lock(&self.reserved).remove(&port);
                    return Err(AllocationError::Probe { port, source });
                }
            }
        }

        tracing::debug!(ports = ?lease.ports, attempts, "allocated ports");
        Ok(lease)
    }
}

/// A set of distinct ports reserved for one provisioning attempt. Dropping the
/// lease returns the ports to the pool.
#[derive(Debug)]
pub struct PortLease {
    ports: Vec<u16>,
    reserved: Reservations,
}

impl PortLease {
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        let mut set = lock(&self.reserved);
        for port in &self.ports {
            set.remove(port);
        }
    }
}

/// Random alphanumeric secret drawn from the operating system's CSPRNG.
pub fn generate_credential(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
