//! Client registry: by ID and by learned UDP address.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use crate::client::ClientEntry;
use crate::ids::IdPool;
use crate::ClientId;

#[derive(Debug, Default)]
pub struct ClientRegistry {
    by_id: HashMap<ClientId, ClientEntry>,
    /// The IP a client's frames must originate from to accept its datagrams,
    /// learned once at TCP accept time and never updated.
    tcp_ip: HashMap<ClientId, IpAddr>,
    /// Maps a client's learned UDP address back to its ID, for reverse lookups.
    by_udp_addr: HashMap<SocketAddr, ClientId>,
    ids: IdPool,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted TCP connection and returns its assigned ID.
    pub fn accept(&mut self, tcp_ip: IpAddr) -> ClientId {
        let id = self.ids.alloc().expect("client ID space exhausted");
        self.by_id.insert(id, ClientEntry::new());
        self.tcp_ip.insert(id, tcp_ip);
        id
    }

    pub fn get(&self, id: ClientId) -> Option<&ClientEntry> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut ClientEntry> {
        self.by_id.get_mut(&id)
    }

    pub fn tcp_ip(&self, id: ClientId) -> Option<IpAddr> {
        self.tcp_ip.get(&id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &ClientEntry)> {
        self.by_id.iter()
    }

    /// Snapshot of currently connected client IDs, stable against concurrent
    /// removal during fan-out.
    pub fn snapshot_ids(&self) -> Vec<ClientId> {
        self.by_id.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Records a client's learned UDP address, replacing any stale reverse mapping.
    pub fn set_udp_addr(&mut self, id: ClientId, addr: SocketAddr) {
        if let Some(entry) = self.by_id.get_mut(&id) {
            if let Some(old) = entry.udp_addr {
                self.by_udp_addr.remove(&old);
            }
            entry.udp_addr = Some(addr);
            self.by_udp_addr.insert(addr, id);
        }
    }

    pub fn by_udp_addr(&self, addr: SocketAddr) -> Option<ClientId> {
        self.by_udp_addr.get(&addr).copied()
    }

    /// Releases a client's ID and all registry entries for it.
    pub fn remove(&mut self, id: ClientId) -> Option<ClientEntry> {
        self.tcp_ip.remove(&id);
        let entry = self.by_id.remove(&id);
        if let Some(e) = &entry {
            if let Some(addr) = e.udp_addr {
                self.by_udp_addr.remove(&addr);
            }
        }
        self.ids.free(id);
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn accept_assigns_smallest_free_id() {
        let mut reg = ClientRegistry::new();
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(reg.accept(ip), 0);
        assert_eq!(reg.accept(ip), 1);
    }

    #[test]
    fn udp_addr_round_trips_to_id() {
        let mut reg = ClientRegistry::new();
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let id = reg.accept(ip);
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        reg.set_udp_addr(id, addr);
        assert_eq!(reg.by_udp_addr(addr), Some(id));
    }

    #[test]
    fn remove_releases_id_and_udp_mapping() {
        let mut reg = ClientRegistry::new();
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let id = reg.accept(ip);
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        reg.set_udp_addr(id, addr);
        reg.remove(id);
        assert!(reg.get(id).is_none());
        assert_eq!(reg.by_udp_addr(addr), None);
        assert_eq!(reg.accept(ip), id);
    }
}
