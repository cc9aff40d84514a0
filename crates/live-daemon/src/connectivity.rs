//! Connectivity probe.
//!
//! Periodically checks whether the relay host is reachable and publishes
//! online/offline transitions on a watch channel. Offline is a valid
//! steady state: folders keep working against local persistence and the
//! probe keeps trying.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info};

const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct NetworkStatus {
    relay: String,
    tx: watch::Sender<bool>,
}

impl NetworkStatus {
    pub fn new(relay: String) -> Self {
        Self {
            relay,
            tx: watch::Sender::new(false),
        }
    }

    /// Subscribe to online/offline transitions. The current value is
    /// `false` until the first successful probe.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Probe loop; runs until every receiver is dropped.
    pub async fn run(self) {
        loop {
            let online = probe(&self.relay).await;
            self.tx.send_if_modified(|current| {
                if *current != online {
                    if online {
                        info!("Relay {} reachable; going online", self.relay);
                    } else {
                        info!("Relay {} unreachable; going offline", self.relay);
                    }
                    *current = online;
                    true
                } else {
                    false
                }
            });
            if self.tx.is_closed() {
                return;
            }
            time::sleep(PROBE_INTERVAL).await;
        }
    }
}

async fn probe(relay: &str) -> bool {
    match time::timeout(PROBE_TIMEOUT, TcpStream::connect(relay)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("Probe of {} failed: {}", relay, e);
            false
        }
        Err(_) => {
            debug!("Probe of {} timed out", relay);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_reachable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(probe(&addr.to_string()).await);
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        // Bind then drop to get a port nothing is listening on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        assert!(!probe(&addr.to_string()).await);
    }
}
