use std::collections::HashMap;

use parking_lot::Mutex;
use shared::UserId;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 16;

/// Tells open streams that an owner's collection changed. Carries no
/// payload: receivers re-read the collection.
#[derive(Default)]
pub struct ChangeHub {
    channels: Mutex<HashMap<UserId, broadcast::Sender<()>>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also drops channels whose streams have all closed, so owners that
    /// never write again do not keep an entry alive.
    pub fn subscribe(&self, owner: &UserId) -> broadcast::Receiver<()> {
        let mut channels = self.channels.lock();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(owner.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn notify(&self, owner: &UserId) {
        let mut channels = self.channels.lock();
        if let Some(tx) = channels.get(owner) {
            if tx.send(()).is_err() {
                channels.remove(owner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn changes_reach_only_the_owners_streams() {
        let hub = ChangeHub::new();
        let mut mine = hub.subscribe(&UserId::from("me"));
        let mut theirs = hub.subscribe(&UserId::from("them"));

        hub.notify(&UserId::from("me"));
        assert!(mine.recv().await.is_ok());
        assert!(theirs.try_recv().is_err());
    }

    #[test]
    fn channels_without_receivers_are_dropped() {
        let hub = ChangeHub::new();
        drop(hub.subscribe(&UserId::from("me")));
        hub.notify(&UserId::from("me"));
        assert!(hub.channels.lock().is_empty());
    }

    #[test]
    fn closed_streams_are_pruned_without_a_later_write() {
        let hub = ChangeHub::new();
        drop(hub.subscribe(&UserId::from("gone")));
        let _open = hub.subscribe(&UserId::from("here"));

        let channels = hub.channels.lock();
        assert_eq!(channels.len(), 1);
        assert!(channels.contains_key(&UserId::from("here")));
    }
}
