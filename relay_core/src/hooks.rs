//! Hook contract.
//!
//! Hooks are synchronous closures invoked on the dispatch thread. Predicate
//! hooks return `bool` (accept/deny); notification hooks return `()`.
//! An unset predicate hook defaults to accept.

use crate::{ChannelId, ClientId};

/// The full set of hooks a `Server` may have registered.
#[derive(Default)]
pub struct Hooks {
    pub on_connect: Option<Box<dyn Fn(ClientId) -> bool + Send + Sync>>,
    pub on_set_name: Option<Box<dyn Fn(ClientId, &str) -> bool + Send + Sync>>,
    /// `channel_id` is `None` when the client is creating a new channel.
    pub on_join_channel: Option<Box<dyn Fn(ClientId, Option<ChannelId>, &str) -> bool + Send + Sync>>,
    pub on_leave_channel: Option<Box<dyn Fn(ClientId, ChannelId) -> bool + Send + Sync>>,
    pub on_channel_message:
        Option<Box<dyn Fn(ClientId, ChannelId, u8, &[u8]) -> bool + Send + Sync>>,
    pub on_peer_message:
        Option<Box<dyn Fn(ClientId, ClientId, ChannelId, u8, &[u8]) -> bool + Send + Sync>>,
    pub on_server_message: Option<Box<dyn Fn(ClientId, bool, u8, &[u8], u8) + Send + Sync>>,
    pub on_disconnect: Option<Box<dyn Fn(ClientId) + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl Hooks {
    pub(crate) fn allow_connect(&self, client: ClientId) -> bool {
        self.on_connect.as_ref().map_or(true, |f| f(client))
    }

    pub(crate) fn allow_set_name(&self, client: ClientId, name: &str) -> bool {
        self.on_set_name.as_ref().map_or(true, |f| f(client, name))
    }

    pub(crate) fn allow_join_channel(
        &self,
        client: ClientId,
        channel: Option<ChannelId>,
        name: &str,
    ) -> bool {
        self.on_join_channel
            .as_ref()
            .map_or(true, |f| f(client, channel, name))
    }

    pub(crate) fn allow_leave_channel(&self, client: ClientId, channel: ChannelId) -> bool {
        self.on_leave_channel
            .as_ref()
            .map_or(true, |f| f(client, channel))
    }

    pub(crate) fn allow_channel_message(
        &self,
        sender: ClientId,
        channel: ChannelId,
        subchannel: u8,
        body: &[u8],
    ) -> bool {
        self.on_channel_message
            .as_ref()
            .map_or(true, |f| f(sender, channel, subchannel, body))
    }

    pub(crate) fn allow_peer_message(
        &self,
        sender: ClientId,
        peer: ClientId,
        channel: ChannelId,
        subchannel: u8,
        body: &[u8],
    ) -> bool {
        self.on_peer_message
            .as_ref()
            .map_or(true, |f| f(sender, peer, channel, subchannel, body))
    }

    pub(crate) fn notify_server_message(
        &self,
        client: ClientId,
        blasted: bool,
        subchannel: u8,
        body: &[u8],
        variant: u8,
    ) {
        if let Some(f) = &self.on_server_message {
            f(client, blasted, subchannel, body, variant);
        }
    }

    pub(crate) fn notify_disconnect(&self, client: ClientId) {
        if let Some(f) = &self.on_disconnect {
            f(client);
        }
    }

    pub(crate) fn notify_error(&self, context: &str) {
        if let Some(f) = &self.on_error {
            f(context);
        }
        tracing::warn!(%context, "relay error");
    }
}
