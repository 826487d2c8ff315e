//! Server directory fed by discovery announcements
//!
//! The directory itself is transport-agnostic: whatever browses the network
//! (an mDNS responder, a static config list, a test) feeds it
//! [`DiscoveryEvent`]s, and clients look up a server address by its
//! advertised name. Re-announcing an existing name replaces its endpoint,
//! since a server that moved hosts keeps its name.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;

/// One directory entry: where a named server can be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub address: IpAddr,
    pub port: u16,
}

/// Announcement from a discovery backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A server appeared (or re-announced itself)
    Added {
        name: String,
        address: IpAddr,
        port: u16,
    },
    /// A previously announced server went away
    Removed { name: String },
}

/// Name-to-endpoint directory of announced servers
pub struct ServerDirectory {
    entries: Mutex<HashMap<String, ServerEndpoint>>,
}

impl ServerDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        ServerDirectory {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Apply one announcement
    pub fn apply(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Added {
                name,
                address,
                port,
            } => {
                log::info!("Discovered server '{}' at {}:{}", name, address, port);
                self.entries
                    .lock()
                    .insert(name, ServerEndpoint { address, port });
            }
            DiscoveryEvent::Removed { name } => {
                if self.entries.lock().remove(&name).is_some() {
                    log::info!("Server '{}' left the network", name);
                }
            }
        }
    }

    /// Look up a server by its advertised name
    pub fn get(&self, name: &str) -> Option<ServerEndpoint> {
        self.entries.lock().get(name).copied()
    }

    /// Names of all currently known servers, sorted for stable display
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of known servers
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing has been discovered yet
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for ServerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn added(name: &str, last_octet: u8, port: u16) -> DiscoveryEvent {
        DiscoveryEvent::Added {
            name: name.to_string(),
            address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet)),
            port,
        }
    }

    #[test]
    fn test_added_then_lookup() {
        let directory = ServerDirectory::new();
        directory.apply(added("workshop", 10, 5555));
        let endpoint = directory.get("workshop").unwrap();
        assert_eq!(endpoint.address, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(endpoint.port, 5555);
        assert!(directory.get("garage").is_none());
    }

    #[test]
    fn test_reannounce_replaces_endpoint() {
        let directory = ServerDirectory::new();
        directory.apply(added("workshop", 10, 5555));
        directory.apply(added("workshop", 20, 6000));
        assert_eq!(directory.len(), 1);
        let endpoint = directory.get("workshop").unwrap();
        assert_eq!(endpoint.address, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(endpoint.port, 6000);
    }

    #[test]
    fn test_removed_clears_entry() {
        let directory = ServerDirectory::new();
        directory.apply(added("workshop", 10, 5555));
        directory.apply(DiscoveryEvent::Removed {
            name: "workshop".to_string(),
        });
        assert!(directory.is_empty());
        // Removing an unknown name is harmless
        directory.apply(DiscoveryEvent::Removed {
            name: "garage".to_string(),
        });
    }

    #[test]
    fn test_names_are_sorted() {
        let directory = ServerDirectory::new();
        directory.apply(added("zeta", 3, 5555));
        directory.apply(added("alpha", 1, 5555));
        directory.apply(added("mike", 2, 5555));
        assert_eq!(directory.names(), vec!["alpha", "mike", "zeta"]);
    }
}
