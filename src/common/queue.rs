//! Message queues for inter-component communication.
//!
//! Provides both point-to-point (Queue) and broadcast (BroadcastQueue) messaging.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{Result, ScrapeflowError};

/// MPMC (multi-producer, multi-consumer) queue.
///
/// Used for the worker pool's task and result channels where every message
/// must be consumed by exactly one receiver.
/// Backed by flume for high-performance message passing.
#[derive(Clone)]
pub struct Queue<T> {
    receiver: Arc<flume::Receiver<T>>,
    sender: Arc<flume::Sender<T>>,
}

#[allow(unused)]
impl<T> Queue<T> {
    /// create a new bounded queue
    pub fn new(cap: usize) -> Arc<Self> {
        let (tx, rx) = flume::bounded(cap);

        Arc::new(Self {
            receiver: Arc::new(rx),
            sender: Arc::new(tx),
        })
    }

    /// create a new unbounded queue
    pub fn unbounded() -> Arc<Self> {
        let (tx, rx) = flume::unbounded();

        Arc::new(Self {
            receiver: Arc::new(rx),
            sender: Arc::new(tx),
        })
    }

    /// receive a message from the queue
    pub fn next(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// send a message to the queue
    pub fn send(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.send(msg).map_err(|e| ScrapeflowError::Queue(e.to_string()))
    }

    /// receive a message from the queue asynchronously
    pub async fn next_async(&self) -> Option<T> {
        self.receiver.recv_async().await.ok()
    }

    /// send a message to the queue asynchronously
    pub async fn send_async(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.send_async(msg).await.map_err(|e| ScrapeflowError::Queue(e.to_string()))
    }

    /// number of messages waiting in the queue
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Broadcast queue for one-to-many message distribution.
///
/// Used for event broadcasting where all subscribers receive every message.
/// Backed by tokio's broadcast channel.
#[derive(Clone)]
pub struct BroadcastQueue<T> {
    sender: Arc<broadcast::Sender<T>>,
}

impl<T: Clone> BroadcastQueue<T> {
    /// create a new broadcast queue
    pub fn new(cap: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(cap);

        Arc::new(Self {
            sender: Arc::new(tx),
        })
    }

    /// send a message to the queue
    pub fn send(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.send(msg).map_err(|e| ScrapeflowError::Queue(e.to_string()))?;
        Ok(())
    }

    /// subscribe to the queue
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_fifo() {
        let queue = Queue::<Option<u32>>::unbounded();
        queue.send(Some(1)).unwrap();
        queue.send(None).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next_async().await, Some(Some(1)));
        assert_eq!(queue.next_async().await, Some(None));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_errors() {
        let queue = BroadcastQueue::<u32>::new(4);
        assert!(queue.send(1).is_err());
        let mut rx = queue.subscribe();
        queue.send(2).unwrap();
        assert_eq!(rx.recv().await.unwrap(), 2);
    }
}
