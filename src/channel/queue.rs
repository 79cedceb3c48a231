//! Per-channel dispatch queue.
//!
//! Once the assembler seals a whole message it is posted here for
//! delivery to the channel's handler. Normally this happens on a
//! dedicated worker task (mirroring FreeRDP's per-channel OS thread); when
//! `disable_threads` is set the message is delivered inline on the calling
//! task instead, which is what single-threaded addins expect.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// An item posted to a channel's dispatch queue.
#[derive(Debug)]
pub enum DispatchItem {
    /// A whole, reassembled message ready for the handler.
    Message(Bytes),
    /// Request the worker task to stop after draining pending items.
    Quit,
}

/// A handler invoked for each dispatched message.
pub trait DispatchHandler: Send + 'static {
    /// Handle one reassembled message.
    fn handle(&mut self, message: Bytes);
}

impl<F> DispatchHandler for F
where
    F: FnMut(Bytes) + Send + 'static,
{
    fn handle(&mut self, message: Bytes) {
        self(message)
    }
}

/// Dispatch queue for one channel.
///
/// When threading is enabled, `post` sends to an unbounded mpsc channel
/// drained by a spawned worker task running the handler. When disabled,
/// `post` invokes the handler synchronously and no task is spawned.
pub struct DispatchQueue {
    sender: Option<mpsc::UnboundedSender<DispatchItem>>,
    inline: Option<Box<dyn DispatchHandler>>,
    worker: Option<tokio::task::JoinHandle<()>>,
    quit_sent: bool,
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("threaded", &self.sender.is_some())
            .finish()
    }
}

impl DispatchQueue {
    /// Spawn a worker task that drains dispatched messages with `handler`.
    pub fn spawn_threaded(mut handler: impl DispatchHandler) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DispatchItem>();
        let worker = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    DispatchItem::Message(msg) => handler.handle(msg),
                    DispatchItem::Quit => {
                        debug!("dispatch queue worker received quit");
                        break;
                    }
                }
            }
        });
        Self {
            sender: Some(tx),
            inline: None,
            worker: Some(worker),
            quit_sent: false,
        }
    }

    /// Build a queue that invokes `handler` inline on `post`, with no
    /// background task.
    pub fn inline(handler: impl DispatchHandler) -> Self {
        Self {
            sender: None,
            inline: Some(Box::new(handler)),
            worker: None,
            quit_sent: false,
        }
    }

    /// Post a reassembled message to the queue.
    pub fn post_message(&mut self, message: Bytes) {
        self.post(DispatchItem::Message(message));
    }

    /// Post an item to the queue (message or quit).
    pub fn post(&mut self, item: DispatchItem) {
        if matches!(item, DispatchItem::Quit) {
            if self.quit_sent {
                return;
            }
            self.quit_sent = true;
        }
        if let Some(sender) = &self.sender {
            if sender.send(item).is_err() {
                warn!("dispatch queue worker is gone, dropping item");
            }
        } else if let Some(handler) = &mut self.inline {
            if let DispatchItem::Message(msg) = item {
                handler.handle(msg);
            }
        }
    }

    /// Idempotently request shutdown and wait for the worker to drain.
    /// No-op (besides dropping state) for an inline queue.
    pub async fn quit(mut self) {
        self.post(DispatchItem::Quit);
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn threaded_queue_delivers_messages_in_order() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let mut queue = DispatchQueue::spawn_threaded(move |msg: Bytes| {
            received_clone.lock().push(msg);
        });
        queue.post_message(Bytes::from_static(b"a"));
        queue.post_message(Bytes::from_static(b"b"));
        queue.quit().await;
        assert_eq!(
            *received.lock(),
            vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]
        );
    }

    #[test]
    fn inline_queue_delivers_synchronously() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let mut queue = DispatchQueue::inline(move |msg: Bytes| {
            received_clone.lock().push(msg);
        });
        queue.post_message(Bytes::from_static(b"x"));
        assert_eq!(*received.lock(), vec![Bytes::from_static(b"x")]);
    }

    #[tokio::test]
    async fn quit_is_idempotent() {
        let mut queue = DispatchQueue::spawn_threaded(|_msg: Bytes| {});
        queue.post(DispatchItem::Quit);
        queue.post(DispatchItem::Quit);
        queue.quit().await;
    }
}
