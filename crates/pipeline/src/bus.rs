//! Bounded inter-stage channels
//!
//! Stages are connected by bounded channels so a slow consumer applies
//! backpressure instead of dropping data. Closing a bus wakes blocked
//! senders immediately; receivers drain whatever was already buffered
//! before observing end-of-stream, so close never loses queued items.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Notify};

struct CloseFlag {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseFlag {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Sending half of a bus. Cheap to clone.
pub struct BusSender<T> {
    tx: mpsc::Sender<T>,
    flag: Arc<CloseFlag>,
}

impl<T> Clone for BusSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            flag: self.flag.clone(),
        }
    }
}

/// Receiving half of a bus.
pub struct BusReceiver<T> {
    rx: mpsc::Receiver<T>,
    flag: Arc<CloseFlag>,
}

/// Create a bounded bus with the given capacity.
pub fn bounded<T>(capacity: usize) -> (BusSender<T>, BusReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let flag = Arc::new(CloseFlag {
        closed: AtomicBool::new(false),
        notify: Notify::new(),
    });
    (
        BusSender {
            tx,
            flag: flag.clone(),
        },
        BusReceiver { rx, flag },
    )
}

impl<T> BusSender<T> {
    /// Push one item, waiting for capacity. Returns the item back if the
    /// bus closed before it could be enqueued.
    pub async fn push(&self, item: T) -> Result<(), T> {
        // Register for the close notification before checking the flag so
        // a close landing in between cannot be missed
        let mut notified = std::pin::pin!(self.flag.notify.notified());
        notified.as_mut().enable();
        if self.flag.is_closed() {
            return Err(item);
        }
        tokio::select! {
            permit = self.tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(item);
                    Ok(())
                }
                Err(_) => Err(item),
            },
            _ = &mut notified => Err(item),
        }
    }

    /// Close the bus, waking any blocked sender. Buffered items remain
    /// available to the receiver.
    pub fn close(&self) {
        self.flag.close();
    }

    pub fn is_closed(&self) -> bool {
        self.flag.is_closed()
    }
}

impl<T> BusReceiver<T> {
    /// Receive the next item. Returns `None` once the bus is closed and
    /// the buffer has been drained, or all senders are gone.
    pub async fn pull(&mut self) -> Option<T> {
        loop {
            let mut notified = std::pin::pin!(self.flag.notify.notified());
            notified.as_mut().enable();
            if self.flag.is_closed() {
                return match self.rx.try_recv() {
                    Ok(item) => Some(item),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
                };
            }
            tokio::select! {
                item = self.rx.recv() => return item,
                _ = &mut notified => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_push_blocks_at_capacity() {
        let (tx, mut rx) = bounded::<u32>(1);
        tx.push(1).await.unwrap();

        // Second push must wait until the receiver makes room
        let blocked = timeout(Duration::from_millis(50), tx.push(2)).await;
        assert!(blocked.is_err());

        assert_eq!(rx.pull().await, Some(1));
        tx.push(2).await.unwrap();
        assert_eq!(rx.pull().await, Some(2));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_sender() {
        let (tx, _rx) = bounded::<u32>(1);
        tx.push(1).await.unwrap();

        let tx2 = tx.clone();
        let pusher = tokio::spawn(async move { tx2.push(2).await });

        tokio::task::yield_now().await;
        tx.close();

        let result = timeout(Duration::from_secs(1), pusher).await.unwrap().unwrap();
        assert_eq!(result, Err(2));
    }

    #[tokio::test]
    async fn test_receiver_drains_after_close() {
        let (tx, mut rx) = bounded::<u32>(4);
        tx.push(1).await.unwrap();
        tx.push(2).await.unwrap();
        tx.close();

        assert_eq!(rx.pull().await, Some(1));
        assert_eq!(rx.pull().await, Some(2));
        assert_eq!(rx.pull().await, None);
    }

    #[tokio::test]
    async fn test_sender_drop_ends_stream() {
        let (tx, mut rx) = bounded::<u32>(4);
        tx.push(7).await.unwrap();
        drop(tx);

        assert_eq!(rx.pull().await, Some(7));
        assert_eq!(rx.pull().await, None);
    }
}
