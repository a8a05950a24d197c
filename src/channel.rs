//! An unbounded, multi-producer, single-consumer work queue used for the
//! dispatcher's `toRoomy`/`toDiscord` lanes. Producers never block; the
//! consumer side exposes both a pull API and a `Stream` for `select!`-driven
//! loops.

use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};

/// Wire item: `Close` is a sentinel pushed by `finish()`, ordered relative to
/// whatever was already queued so the consumer drains real items before
/// seeing it.
enum Item<T> {
    Value(T),
    Close,
}

pub struct AsyncChannel<T> {
    tx: mpsc::UnboundedSender<Item<T>>,
    rx: Option<mpsc::UnboundedReceiver<Item<T>>>,
}

impl<T> AsyncChannel<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }

    pub fn sender(&self) -> AsyncChannelSender<T> {
        AsyncChannelSender { tx: self.tx.clone() }
    }

    /// Enqueues an item. Returns `false` if every receiver has already been
    /// dropped and the item was not delivered.
    pub fn push(&self, item: T) -> bool {
        self.tx.send(Item::Value(item)).is_ok()
    }

    /// Closes the channel: `into_stream()`/`recv()` drain whatever was
    /// pushed before this call and then end, rather than waiting forever on
    /// a sender that's still alive.
    pub fn finish(&self) -> bool {
        self.tx.send(Item::Close).is_ok()
    }

    pub fn len_hint(&self) -> usize {
        self.rx.as_ref().map(|rx| rx.len()).unwrap_or(0)
    }

    /// Takes the receiving half as a `Stream`. Panics if called twice: a
    /// channel has exactly one consumer.
    pub fn into_stream(mut self) -> Pin<Box<dyn Stream<Item = T> + Send>>
    where
        T: Send + 'static,
    {
        let rx = self.rx.take().expect("AsyncChannel consumer already taken");
        let stream = UnboundedReceiverStream::new(rx)
            .take_while(|item| std::future::ready(!matches!(item, Item::Close)))
            .map(|item| match item {
                Item::Value(v) => v,
                Item::Close => unreachable!("take_while stops at Close"),
            });
        Box::pin(stream)
    }

    pub async fn recv(&mut self) -> Option<T> {
        match self.rx.as_mut().expect("AsyncChannel consumer already taken").recv().await {
            Some(Item::Value(v)) => Some(v),
            Some(Item::Close) | None => None,
        }
    }
}

impl<T> Default for AsyncChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable producer handle, detached from the consumer lifetime.
#[derive(Clone)]
pub struct AsyncChannelSender<T> {
    tx: mpsc::UnboundedSender<Item<T>>,
}

impl<T> AsyncChannelSender<T> {
    pub fn push(&self, item: T) -> bool {
        self.tx.send(Item::Value(item)).is_ok()
    }

    /// Closes the channel from the producer side. See
    /// [`AsyncChannel::finish`].
    pub fn finish(&self) -> bool {
        self.tx.send(Item::Close).is_ok()
    }
}
