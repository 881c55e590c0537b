//! Client registry
//!
//! Maps remote IP addresses to logical clients. The IP alone is the
//! identity: keying by (IP, port) turns NAT port churn into spurious new
//! clients and duplicated greetings. There is at most one LogicalClient
//! per IP at any time.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::client::{ClientBuilder, LogicalClient};

/// Result of observing a datagram source address
pub enum Observed {
    /// First packet from this IP
    Created(Arc<LogicalClient>),
    /// Known IP on a new source port; identity preserved
    Migrated {
        client: Arc<LogicalClient>,
        old_port: u16,
    },
    /// Known IP, unchanged port
    Existing(Arc<LogicalClient>),
    /// Unknown IP while the registry is at its soft cap
    Rejected,
}

/// IP-keyed client map with an idle reaper
pub struct ClientRegistry {
    clients: RwLock<HashMap<IpAddr, Arc<LogicalClient>>>,
    builder: ClientBuilder,
    max_clients: usize,
    reap_idle: Duration,
}

impl ClientRegistry {
    pub fn new(builder: ClientBuilder, max_clients: usize, reap_idle: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            builder,
            max_clients,
            reap_idle,
        }
    }

    /// Resolve a source address to its logical client, creating or
    /// migrating as needed. The registry lock is never held beyond the
    /// map operation itself.
    pub fn observe(&self, addr: SocketAddr) -> Observed {
        if let Some(client) = self.clients.read().get(&addr.ip()).cloned() {
            return match client.migrate(addr) {
                Some(old_port) => Observed::Migrated { client, old_port },
                None => Observed::Existing(client),
            };
        }

        let mut clients = self.clients.write();
        // Raced creation: another packet from the same IP got here first
        if let Some(client) = clients.get(&addr.ip()).cloned() {
            drop(clients);
            return match client.migrate(addr) {
                Some(old_port) => Observed::Migrated { client, old_port },
                None => Observed::Existing(client),
            };
        }

        if clients.len() >= self.max_clients {
            return Observed::Rejected;
        }

        let client = LogicalClient::new(addr, &self.builder);
        clients.insert(addr.ip(), client.clone());
        Observed::Created(client)
    }

    pub fn get(&self, ip: IpAddr) -> Option<Arc<LogicalClient>> {
        self.clients.read().get(&ip).cloned()
    }

    /// Remove every client idle past the window; the removed clients are
    /// returned so the caller can abort their tasks and emit events.
    pub fn reap(&self, now: Instant) -> Vec<Arc<LogicalClient>> {
        let mut clients = self.clients.write();
        let expired: Vec<IpAddr> = clients
            .iter()
            .filter(|(_, client)| client.idle_for(now) > self.reap_idle)
            .map(|(ip, _)| *ip)
            .collect();

        expired
            .into_iter()
            .filter_map(|ip| clients.remove(&ip))
            .collect()
    }

    /// Destroy one client record outright (administrative reset)
    pub fn remove(&self, ip: IpAddr) -> Option<Arc<LogicalClient>> {
        self.clients.write().remove(&ip)
    }

    pub fn count(&self) -> usize {
        self.clients.read().len()
    }
}
