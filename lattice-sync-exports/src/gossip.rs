// Copyright (c) 2022 MASSA LABS <info@massa.net>

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Gossip admission status of the node.
///
/// While `Pending` the node buffers gossip instead of processing it; `Done`
/// means the consensus and block-production paths may trust the local view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GossipStatus {
    /// not synced, gossip closed
    Pending,
    /// sync in progress
    InProgress,
    /// transient state between the two ticks of the gossip-sync window
    InProgressSecondary,
    /// fully synced, gossip open
    Done,
}

impl std::fmt::Display for GossipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            GossipStatus::Pending => write!(f, "pending"),
            GossipStatus::InProgress => write!(f, "inProgress"),
            GossipStatus::InProgressSecondary => write!(f, "inProgress2"),
            GossipStatus::Done => write!(f, "done"),
        }
    }
}

struct StatusInner {
    status: GossipStatus,
    // Kept alive while the status is not `Done`; dropping it closes the
    // channel, which is what unblocks the awaiters.
    notify_tx: Option<watch::Sender<()>>,
    notify_rx: watch::Receiver<()>,
}

/// Shared view of the gossip admission status.
///
/// Awaiters block on the current notification channel. On every transition to
/// `Done` the channel is closed (everyone unblocks); on every transition out
/// of `Done` a fresh channel is published, so awaiters that were already
/// released stay released and new ones block on the new channel.
#[derive(Clone)]
pub struct SyncStatusHandle {
    always_listen: bool,
    inner: Arc<RwLock<StatusInner>>,
}

impl SyncStatusHandle {
    /// Creates a handle in the initial `Pending` state.
    pub fn new(always_listen: bool) -> Self {
        let (notify_tx, notify_rx) = watch::channel(());
        SyncStatusHandle {
            always_listen,
            inner: Arc::new(RwLock::new(StatusInner {
                status: GossipStatus::Pending,
                notify_tx: Some(notify_tx),
                notify_rx,
            })),
        }
    }

    /// Current status.
    pub fn status(&self) -> GossipStatus {
        self.inner.read().status
    }

    /// Whether the node is fully synced from the gossip point of view.
    pub fn is_done(&self) -> bool {
        self.status() == GossipStatus::Done
    }

    /// Whether the hare consensus may run: it tolerates the secondary
    /// in-progress state on top of full sync.
    pub fn is_hare_synced(&self) -> bool {
        matches!(
            self.status(),
            GossipStatus::InProgressSecondary | GossipStatus::Done
        )
    }

    /// Whether other modules should process gossip messages.
    pub fn listen_to_gossip(&self) -> bool {
        self.always_listen || self.status() != GossipStatus::Pending
    }

    /// Sets the status, managing the await channel across `Done` boundaries.
    pub fn set_status(&self, status: GossipStatus) {
        let mut inner = self.inner.write();
        if status == inner.status {
            return;
        }
        info!("setting gossip to '{}'", status);
        let was_done = inner.status == GossipStatus::Done;
        let is_done = status == GossipStatus::Done;
        if is_done && !was_done {
            inner.notify_tx = None;
        } else if was_done && !is_done {
            let (notify_tx, notify_rx) = watch::channel(());
            inner.notify_tx = Some(notify_tx);
            inner.notify_rx = notify_rx;
        }
        inner.status = status;
    }

    /// Blocks until the status becomes `Done`. Returns immediately if it
    /// already is.
    pub async fn wait_synced(&self) {
        let mut rx = {
            let inner = self.inner.read();
            if inner.status == GossipStatus::Done {
                return;
            }
            inner.notify_rx.clone()
        };
        // the channel only ever closes, it never carries values
        while rx.changed().await.is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    #[tokio::test]
    #[serial]
    async fn test_wait_unblocks_on_done() {
        let handle = SyncStatusHandle::new(false);
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait_synced().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        handle.set_status(GossipStatus::Done);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not unblock")
            .unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn test_wait_after_done_returns_immediately() {
        let handle = SyncStatusHandle::new(false);
        handle.set_status(GossipStatus::Done);
        tokio::time::timeout(Duration::from_millis(100), handle.wait_synced())
            .await
            .expect("wait should return immediately");
    }

    #[tokio::test]
    #[serial]
    async fn test_fresh_channel_after_done_to_pending() {
        let handle = SyncStatusHandle::new(false);
        handle.set_status(GossipStatus::Done);
        handle.set_status(GossipStatus::Pending);
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait_synced().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "fresh subscriber must block again");
        handle.set_status(GossipStatus::Done);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not unblock")
            .unwrap();
    }

    #[test]
    #[serial]
    fn test_listen_to_gossip() {
        let handle = SyncStatusHandle::new(false);
        assert!(!handle.listen_to_gossip());
        handle.set_status(GossipStatus::InProgressSecondary);
        assert!(handle.listen_to_gossip());
        assert!(handle.is_hare_synced());
        assert!(!handle.is_done());

        let always = SyncStatusHandle::new(true);
        assert!(always.listen_to_gossip());
    }
}
