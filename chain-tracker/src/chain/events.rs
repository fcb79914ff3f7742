//! Single-slot notification channels for tip and reorg events.
//!
//! Each channel holds at most one pending value. Publishing replaces whatever
//! is queued and never waits on consumers, so a consumer that polls always
//! sees the latest value but may miss intermediate ones.

use tokio::sync::watch;

/// Producer side of a latest-value-wins channel.
#[derive(Debug)]
pub struct LatestSlot<T: Clone> {
    sender: watch::Sender<Option<T>>,
}

impl<T: Clone> LatestSlot<T> {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender,
        }
    }

    /// Replace the pending value. Works with or without receivers.
    pub fn publish(&self, value: T) {
        self.sender.send_replace(Some(value));
    }

    /// Create a receiver. It only observes values published after this call.
    pub fn subscribe(&self) -> LatestReceiver<T> {
        LatestReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// The most recently published value, if any.
    pub fn latest(&self) -> Option<T> {
        self.sender.borrow().clone()
    }
}

impl<T: Clone> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer side of a [`LatestSlot`].
#[derive(Debug)]
pub struct LatestReceiver<T: Clone> {
    receiver: watch::Receiver<Option<T>>,
}

impl<T: Clone> LatestReceiver<T> {
    /// Take the pending value without waiting.
    ///
    /// Returns `None` when nothing new was published since the last call.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.receiver.has_changed() {
            Ok(true) => self.receiver.borrow_and_update().clone(),
            _ => None,
        }
    }

    /// Wait for the next published value.
    ///
    /// Returns `None` once the producer has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            self.receiver.changed().await.ok()?;
            if let Some(value) = self.receiver.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }
}
