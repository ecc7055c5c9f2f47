//! Named pub/sub fabric connecting frame ingest, inference and HTTP streams.
//!
use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};

use crate::{BroadcastReceiver, BroadcastSender};

/// Buffered frames per channel; slow subscribers skip older frames.
const CHANNEL_CAPACITY: usize = 20;

/// Broadcast channels keyed by stream name, created on first use.
pub struct NamedPubSub {
    map: Mutex<HashMap<String, BroadcastSender>>,
}

impl NamedPubSub {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_sender(&self, name: &str) -> BroadcastSender {
        let mut map = self.map.lock().await;
        match map.get(name) {
            Some(tx) => tx.clone(),
            None => {
                let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
                map.insert(name.to_owned(), tx.clone());
                tx
            }
        }
    }

    pub async fn get_receiver(&self, name: &str) -> BroadcastReceiver {
        let mut map = self.map.lock().await;
        match map.get(name) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
                map.insert(name.to_owned(), tx);
                rx
            }
        }
    }
}

impl Default for NamedPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[tokio::test]
    async fn sender_and_receiver_of_same_name_are_connected() {
        let pubsub = NamedPubSub::new();

        let mut rx = pubsub.get_receiver("cam0").await;
        let tx = pubsub.get_sender("cam0").await;

        tx.send(vec![1, 2, 3]).unwrap();
        assert_eq!(rx.recv().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn different_names_are_isolated() {
        let pubsub = NamedPubSub::new();

        let mut rx = pubsub.get_receiver("cam1").await;
        let tx = pubsub.get_sender("cam0").await;

        // No subscriber on cam0 yet, send fails without touching cam1
        assert!(tx.send(vec![7]).is_err());
        assert!(rx.try_recv().is_err());
    }
}
