// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Cross-consumer broadcast of progressive results.
//!
//! Every logical request has a deterministic channel name derived from its
//! URL path and normalized parameters. Progressive snapshots are published
//! as tagged messages so that duplicate logical requests — including ones
//! issued by other consumers — observe the same stream without re-issuing
//! any work.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use url::Url;

/// Buffered messages per channel before slow receivers start lagging
const CHANNEL_CAPACITY: usize = 32;

/// One tagged message on a result channel.
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    /// A progressive (possibly partial) result snapshot.
    Result(Value),
    /// The request failed; the stream ends after this message.
    Error(String),
    /// Terminal marker: no further messages will be published.
    Done,
}

/// Derive the deterministic channel name for a request: URL path plus
/// parameters sorted by name.
pub fn channel_name(url: &Url, params: &[(String, String)]) -> String {
    let mut pairs: Vec<&(String, String)> = params.iter().collect();
    pairs.sort();
    let query = pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{query}", url.path())
}

/// Registry of named broadcast channels.
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, broadcast::Sender<ChannelMessage>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a named channel, creating it if needed.
    pub fn subscribe(&self, name: &str) -> broadcast::Receiver<ChannelMessage> {
        self.sender(name).subscribe()
    }

    /// Publish a message to a named channel. Messages published with no
    /// subscribers are dropped; terminal [`ChannelMessage::Done`] also
    /// prunes a channel nobody is listening to.
    pub(crate) fn publish(&self, name: &str, message: ChannelMessage) {
        let terminal = matches!(message, ChannelMessage::Done);
        let sender = self.sender(name);
        if sender.send(message).is_err() {
            debug!(channel = name, "published to channel with no subscribers");
        }
        if terminal && sender.receiver_count() == 0 {
            self.channels
                .lock()
                .expect("channel registry poisoned")
                .remove(name);
        }
    }

    fn sender(&self, name: &str) -> broadcast::Sender<ChannelMessage> {
        let mut channels = self.channels.lock().expect("channel registry poisoned");
        channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}
