//! Live, cancellable sequences handed out by the stores.

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Identifier of a subscription, unique within one store.
pub type SubscriptionId = u64;

/// Receiving end of a store subscription.
///
/// The sequence ends when the cancellation signal it was created with fires,
/// when the store goes away, or when this value is dropped. No item is
/// returned once cancellation has been observed, even if some were still
/// queued.
#[derive(Debug)]
pub struct Subscription<T> {
    id: SubscriptionId,
    rx: mpsc::Receiver<T>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    /// `cancel` must be the child token the store watches for cleanup.
    pub(crate) fn new(id: SubscriptionId, rx: mpsc::Receiver<T>, cancel: CancellationToken) -> Self {
        Self { id, rx, cancel }
    }

    /// An already terminated sequence.
    pub(crate) fn closed(cancel: CancellationToken) -> Self {
        let (_, rx) = mpsc::channel(1);
        Self {
            id: 0,
            rx,
            cancel,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the subscription is cancelled or closed.
    pub async fn recv(&mut self) -> Option<T> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Take the next item if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Stop receiving. Equivalent to cancelling the signal for this subscription only.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn into_stream(self) -> impl Stream<Item = T> + Send + 'static
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |mut sub| async move {
            let item = sub.recv().await?;
            Some((item, sub))
        })
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        // Lets the store remove the subscription without waiting for the parent signal
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_recv_until_cancelled() {
        let parent = CancellationToken::new();
        let (tx, rx) = mpsc::channel(4);
        let mut sub = Subscription::new(7, rx, parent.child_token());

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        assert_eq!(sub.id(), 7);
        assert_eq!(sub.recv().await, Some(1));

        parent.cancel();
        assert!(sub.is_cancelled());
        // 2 is still queued but must not be delivered after cancellation
        assert_eq!(sub.recv().await, None);
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_closed_subscription_ends_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let mut sub: Subscription<u32> = Subscription::closed(token.child_token());
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_drop_cancels_child_only() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let watcher = child.clone();
        let (_tx, rx) = mpsc::channel::<u32>(1);

        drop(Subscription::new(1, rx, child));
        assert!(watcher.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let (tx, rx) = mpsc::channel(4);
        let sub = Subscription::new(1, rx, CancellationToken::new());

        tx.send("a").await.unwrap();
        tx.send("b").await.unwrap();
        drop(tx);

        let items: Vec<&str> = sub.into_stream().collect().await;
        assert_eq!(items, vec!["a", "b"]);
    }
}
