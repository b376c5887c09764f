//! Cover traffic: idleness tracking and the MEANINGLESS record ticker
//!
//! While no real client request is in flight, the ticker opens short-lived
//! tunnel sessions carrying MEANINGLESS records so an observer sees steady
//! traffic to the remote endpoint regardless of actual use.

use super::tunnel::TunnelClient;
use crate::common::net::Address;
use crate::common::pipe::read_all;
use crate::tunnel::Traffic;
use crate::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// How long a cover exchange waits on the response before giving up
const COVER_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Bounded count of in-flight client requests, used by the ticker to detect
/// idle periods. `begin` fails when the tracker is full so callers degrade
/// to untracked operation instead of blocking.
pub struct ActiveRequests {
    count: AtomicUsize,
    capacity: usize,
}

impl ActiveRequests {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(ActiveRequests {
            count: AtomicUsize::new(0),
            capacity,
        })
    }

    pub fn begin(self: &Arc<Self>) -> Result<ActiveGuard> {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return Err(Error::connection("request tracker is full"));
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(ActiveGuard {
                        tracker: self.clone(),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.len() == 0
    }
}

/// Marks one in-flight request; dropping it releases the slot
pub struct ActiveGuard {
    tracker: Arc<ActiveRequests>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.tracker.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Canned innocuous request carried as the MEANINGLESS payload
pub fn cover_payload(domain: &str) -> Vec<u8> {
    format!(
        "GET / HTTP/1.1\r\nHost: {}\r\nConnection: Close\r\nUser-Agent: Mozilla/5.0 (Macintosh; Intel Mac OS X 10_11_6)\r\n\r\n",
        domain
    )
    .into_bytes()
}

/// Emits one cover exchange per second of idle time
pub struct CoverTicker {
    client: Arc<TunnelClient>,
    active: Arc<ActiveRequests>,
    domain: String,
    port: u16,
    shutdown: watch::Receiver<bool>,
}

impl CoverTicker {
    pub fn new(
        client: Arc<TunnelClient>,
        active: Arc<ActiveRequests>,
        domain: String,
        port: u16,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        CoverTicker {
            client,
            active,
            domain,
            port,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.active.is_idle() {
                        continue;
                    }
                    let client = self.client.clone();
                    let domain = self.domain.clone();
                    let port = self.port;
                    // Best effort: each exchange runs on its own and its
                    // failures are swallowed after logging.
                    tokio::spawn(async move {
                        if let Err(e) = cover_exchange(&client, &domain, port).await {
                            debug!("cover exchange failed: {}", e);
                        }
                    });
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("cover ticker stopped");
    }
}

async fn cover_exchange(client: &TunnelClient, domain: &str, port: u16) -> Result<()> {
    let addr = Address::from(domain.to_string()).to_bytes(port);
    let record = Traffic::meaningless(addr, cover_payload(domain));
    let conn = client.open(&record).await?;
    let response = read_all(conn, COVER_READ_TIMEOUT).await;
    debug!(bytes = response.len(), "cover exchange complete");
    Ok(())
}
