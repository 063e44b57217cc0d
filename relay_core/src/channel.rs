//! Channel registry.
//!
//! Structured after the teacher's lobby manager (a `HashMap`-backed registry
//! with a typed error enum and ordered member list), but with different
//! ownership semantics: a channel's master becomes `null` on departure
//! instead of auto-transferring to the next member, unless `auto_close`
//! destroys the channel outright.

use std::collections::HashMap;

use crate::ids::IdPool;
use crate::ClientId;

pub type ChannelId = crate::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Empty,
    AutoClose,
    Explicit,
}

/// Outcome of removing a client from a channel.
pub struct RemoveOutcome {
    /// `Some(reason)` if the channel was destroyed as a result.
    pub closed: Option<CloseReason>,
    /// When `closed` is `None`: the remaining members, to send a Peer leave
    /// notification to. When `closed` is `Some(AutoClose)`: the remaining
    /// members, to send a LeaveChannel-success response to (and to strip
    /// this channel from). Empty when `closed` is `Some(Empty)` — there is
    /// no one left to notify.
    pub notify_leave: Vec<ClientId>,
}

#[derive(Debug, Clone)]
pub struct ChannelEntry {
    pub id: ChannelId,
    pub name: String,
    pub clients: Vec<ClientId>,
    pub master: Option<ClientId>,
    pub hidden: bool,
    pub auto_close: bool,
}

impl ChannelEntry {
    pub fn member_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_member(&self, client: ClientId) -> bool {
        self.clients.contains(&client)
    }
}

/// Live channels keyed by ID and by case-insensitive name.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    by_id: HashMap<ChannelId, ChannelEntry>,
    name_to_id: HashMap<String, ChannelId>,
    ids: IdPool,
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ChannelEntry> {
        self.name_to_id.get(&fold(name)).and_then(|id| self.by_id.get(id))
    }

    pub fn get(&self, id: ChannelId) -> Option<&ChannelEntry> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut ChannelEntry> {
        self.by_id.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelEntry> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Creates and publishes a new channel with `master` as its sole member.
    ///
    /// Caller is responsible for having already verified the name is free.
    pub fn create(
        &mut self,
        name: String,
        master: ClientId,
        hidden: bool,
        auto_close: bool,
    ) -> ChannelId {
        let id = self.ids.alloc().expect("channel ID space exhausted");
        let key = fold(&name);
        self.by_id.insert(
            id,
            ChannelEntry {
                id,
                name,
                clients: vec![master],
                master: Some(master),
                hidden,
                auto_close,
            },
        );
        self.name_to_id.insert(key, id);
        id
    }

    /// Adds `client` to an existing channel's member list (join order).
    pub fn add_member(&mut self, channel: ChannelId, client: ClientId) {
        if let Some(ch) = self.by_id.get_mut(&channel) {
            ch.clients.push(client);
        }
    }

    /// Implements the RemoveClient procedure.
    ///
    /// Does not touch the departing client's own `channels` list; the
    /// caller (dispatcher) does that.
    pub fn remove_client(&mut self, channel: ChannelId, client: ClientId) -> RemoveOutcome {
        let Some(ch) = self.by_id.get_mut(&channel) else {
            return RemoveOutcome {
                closed: None,
                notify_leave: Vec::new(),
            };
        };
        ch.clients.retain(|&c| c != client);

        if ch.clients.is_empty() {
            self.destroy(channel);
            return RemoveOutcome {
                closed: Some(CloseReason::Empty),
                notify_leave: Vec::new(),
            };
        }

        let was_master = ch.master == Some(client);
        if was_master && ch.auto_close {
            let remaining = ch.clients.clone();
            self.destroy(channel);
            return RemoveOutcome {
                closed: Some(CloseReason::AutoClose),
                notify_leave: remaining,
            };
        }

        if was_master {
            ch.master = None;
        }
        let remaining = ch.clients.clone();
        RemoveOutcome {
            closed: None,
            notify_leave: remaining,
        }
    }

    /// Implements Channel.Close(): returns the members to notify (the full
    /// member list at the moment of closing) and tears down the registry
    /// entry. Caller removes the channel from each member's own list.
    pub fn close(&mut self, channel: ChannelId) -> Vec<ClientId> {
        let members = self
            .by_id
            .get(&channel)
            .map(|ch| ch.clients.clone())
            .unwrap_or_default();
        self.destroy(channel);
        members
    }

    fn destroy(&mut self, channel: ChannelId) {
        if let Some(ch) = self.by_id.remove(&channel) {
            self.name_to_id.remove(&fold(&ch.name));
            self.ids.free(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_lookup_by_name_is_case_insensitive() {
        let mut reg = ChannelRegistry::new();
        let id = reg.create("Room".into(), 1, false, false);
        assert_eq!(reg.find_by_name("room").unwrap().id, id);
        assert_eq!(reg.find_by_name("ROOM").unwrap().id, id);
    }

    #[test]
    fn removing_last_member_closes_channel() {
        let mut reg = ChannelRegistry::new();
        let id = reg.create("room".into(), 1, false, false);
        let outcome = reg.remove_client(id, 1);
        assert_eq!(outcome.closed, Some(CloseReason::Empty));
        assert!(reg.get(id).is_none());
        assert!(reg.find_by_name("room").is_none());
    }

    #[test]
    fn master_leaving_without_auto_close_nulls_master_and_notifies_rest() {
        let mut reg = ChannelRegistry::new();
        let id = reg.create("room".into(), 1, false, false);
        reg.add_member(id, 2);
        let outcome = reg.remove_client(id, 1);
        assert_eq!(outcome.closed, None);
        assert_eq!(outcome.notify_leave, vec![2]);
        assert_eq!(reg.get(id).unwrap().master, None);
    }

    #[test]
    fn master_leaving_with_auto_close_destroys_channel_even_with_members_left() {
        let mut reg = ChannelRegistry::new();
        let id = reg.create("room".into(), 1, false, true);
        reg.add_member(id, 2);
        let outcome = reg.remove_client(id, 1);
        assert_eq!(outcome.closed, Some(CloseReason::AutoClose));
        assert_eq!(outcome.notify_leave, vec![2]);
        assert!(reg.get(id).is_none());
    }

    #[test]
    fn freed_id_may_be_reissued_to_a_fresh_channel() {
        let mut reg = ChannelRegistry::new();
        let id = reg.create("room".into(), 1, false, false);
        reg.remove_client(id, 1);
        let id2 = reg.create("room".into(), 2, false, false);
        assert_eq!(id2, id);
        assert_eq!(reg.get(id2).unwrap().master, Some(2));
    }

    #[test]
    fn close_returns_full_member_list_and_tears_down() {
        let mut reg = ChannelRegistry::new();
        let id = reg.create("room".into(), 1, false, false);
        reg.add_member(id, 2);
        reg.add_member(id, 3);
        let mut members = reg.close(id);
        members.sort();
        assert_eq!(members, vec![1, 2, 3]);
        assert!(reg.get(id).is_none());
    }
}
