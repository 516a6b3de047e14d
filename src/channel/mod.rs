//! Channels between coroutines.
//!
//! A [`Channel`] is a pair of handles over one shared core: a [`Sender`]
//! and a [`Receiver`], both cheap to clone. The core lives as long as any
//! handle does.
//!
//! Suspending calls (`await_send`, `await_receive`) only fail with
//! [`Error::CalledOutsideCoroutine`] when they would actually have to wait;
//! a send into a buffer with room, or a receive with an element ready,
//! works from plain threads too.

mod buffered;
mod conflated;
mod map;

use crate::coroutine;
use crate::error::{Error, OfferError, Result};
use crate::future::{Future, Promise};
use buffered::BufferedChannel;
use conflated::ConflatedChannel;
use map::MappedReceiver;
use std::fmt;
use std::sync::{Arc, Weak};

/// Receive callback. Returns the element back if the receiver behind it
/// has gone away in the meantime, so the sender can pass it on.
pub(crate) type ReceiveCallback<T> = Box<dyn FnOnce(Result<T>) -> Option<T> + Send + 'static>;

/// Runs once the channel is finished: `Some(Closed)` after a close has
/// been drained, `Some(Canceled)` after a cancel, `None` when the channel
/// was dropped while still open.
pub(crate) type FinishCallback = Box<dyn FnOnce(Option<Error>) + Send + 'static>;

/// How many elements a channel holds before senders suspend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// Rendezvous: every send waits for a receiver.
    None,
    /// Up to `n` elements.
    Buffered(usize),
    /// Sends never suspend.
    #[default]
    Unlimited,
    /// Sends never suspend; only the latest unread element is kept.
    Conflated,
}

pub(crate) trait ReceiveCore<T>: Send + Sync {
    fn buffer_type(&self) -> BufferType;
    fn await_receive(&self) -> Result<T>;
    fn poll(&self) -> Option<T>;
    fn when_receive(&self, callback: ReceiveCallback<T>);
    fn count(&self) -> usize;
    fn is_empty(&self) -> bool;
    fn is_closed(&self) -> bool;
    fn is_canceled(&self) -> bool;
    fn cancel(&self);
    fn when_finished(&self, callback: FinishCallback);
}

pub(crate) trait SendCore<T>: Send + Sync {
    fn await_send(&self, element: T) -> Result<()>;
    fn offer(&self, element: T) -> Result<(), OfferError<T>>;
    /// Deliver regardless of capacity, dropping the element if the channel
    /// no longer accepts anything.
    fn push_unbounded(&self, element: T);
    fn close(&self) -> bool;
    fn cancel(&self);
    fn is_closed(&self) -> bool;
    fn is_canceled(&self) -> bool;
    fn when_finished(&self, callback: FinishCallback);
}

/// A sender and a receiver over the same buffer.
pub struct Channel<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("buffer_type", &self.receiver.core.buffer_type())
            .field("count", &self.receiver.core.count())
            .finish()
    }
}

impl<T: Send + 'static> Default for Channel<T> {
    fn default() -> Self {
        Channel::new(BufferType::Unlimited)
    }
}

impl<T: Send + 'static> Channel<T> {
    pub fn new(buffer: BufferType) -> Self {
        match buffer {
            BufferType::Conflated => Channel::from_core(Arc::new(ConflatedChannel::new())),
            BufferType::None => Channel::with_capacity(0),
            BufferType::Buffered(capacity) => Channel::with_capacity(capacity),
            BufferType::Unlimited => Channel::with_capacity(usize::MAX),
        }
    }

    /// A buffered channel; `usize::MAX` (or anything past `i32::MAX`)
    /// means unlimited.
    pub fn with_capacity(capacity: usize) -> Self {
        Channel::from_core(Arc::new(BufferedChannel::new(capacity)))
    }

    fn from_core<C>(core: Arc<C>) -> Self
    where
        C: SendCore<T> + ReceiveCore<T> + 'static,
    {
        Channel {
            sender: Sender { core: core.clone() },
            receiver: Receiver { core },
        }
    }

    pub fn split(self) -> (Sender<T>, Receiver<T>) {
        (self.sender, self.receiver)
    }

    pub fn sender(&self) -> Sender<T> {
        self.sender.clone()
    }

    pub fn receiver(&self) -> Receiver<T> {
        self.receiver.clone()
    }

    pub fn buffer_type(&self) -> BufferType {
        self.receiver.buffer_type()
    }

    pub fn await_send(&self, element: T) -> Result<()> {
        self.sender.await_send(element)
    }

    pub fn offer(&self, element: T) -> Result<(), OfferError<T>> {
        self.sender.offer(element)
    }

    pub fn send_future(&self, future: &Future<T>)
    where
        T: Clone + Sync,
    {
        self.sender.send_future(future);
    }

    pub fn close(&self) -> bool {
        self.sender.close()
    }

    pub fn await_receive(&self) -> Result<T> {
        self.receiver.await_receive()
    }

    pub fn poll(&self) -> Option<T> {
        self.receiver.poll()
    }

    pub fn when_receive<F>(&self, callback: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        self.receiver.when_receive(callback);
    }

    pub fn receive_future(&self) -> Future<T>
    where
        T: Clone + Sync,
    {
        self.receiver.receive_future()
    }

    pub fn count(&self) -> usize {
        self.receiver.count()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn map<U, F>(&self, transform: F) -> Receiver<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.receiver.map(transform)
    }

    pub fn iter(&self) -> Iter<'_, T> {
        self.receiver.iter()
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }

    pub fn cancel(&self) {
        self.receiver.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.receiver.is_canceled()
    }

    pub fn when_canceled<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.receiver.when_canceled(callback);
    }

    pub fn when_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.receiver.when_complete(callback);
    }
}

/// Sending half of a channel.
pub struct Sender<T> {
    core: Arc<dyn SendCore<T>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("closed", &self.core.is_closed())
            .field("canceled", &self.core.is_canceled())
            .finish()
    }
}

impl<T: Send + 'static> Sender<T> {
    /// Send, suspending the current coroutine while the buffer is full.
    ///
    /// Fails with [`Error::Closed`] or [`Error::Canceled`] once the channel
    /// stopped accepting elements.
    pub fn await_send(&self, element: T) -> Result<()> {
        self.core.await_send(element)
    }

    /// Send without suspending.
    pub fn offer(&self, element: T) -> Result<(), OfferError<T>> {
        self.core.offer(element)
    }

    /// Send the value of `future` once it succeeds, ignoring capacity.
    /// Failures are not forwarded.
    pub fn send_future(&self, future: &Future<T>)
    where
        T: Clone + Sync,
    {
        let core = Arc::downgrade(&self.core);
        future.when_success(move |element| {
            if let Some(core) = core.upgrade() {
                core.push_unbounded(element);
            }
        });
    }

    /// Stop accepting elements. Waiting receivers fail with
    /// [`Error::Closed`]; buffered elements can still be received.
    ///
    /// Returns `false` if the channel was already closed or canceled.
    pub fn close(&self) -> bool {
        self.core.close()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.core.is_canceled()
    }

    pub fn when_canceled<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.when_finished(canceled_only(callback));
    }

    pub fn when_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.when_finished(Box::new(move |_| callback()));
    }

    pub(crate) fn downgrade(&self) -> Weak<dyn SendCore<T>> {
        Arc::downgrade(&self.core)
    }
}

/// Receiving half of a channel.
pub struct Receiver<T> {
    core: Arc<dyn ReceiveCore<T>>,
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Receiver {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("buffer_type", &self.core.buffer_type())
            .field("count", &self.core.count())
            .finish()
    }
}

impl<T: Send + 'static> Receiver<T> {
    pub fn buffer_type(&self) -> BufferType {
        self.core.buffer_type()
    }

    /// Receive, suspending the current coroutine until an element arrives.
    ///
    /// Fails with [`Error::Closed`] once the channel is closed and drained,
    /// and with [`Error::Canceled`] once it is canceled.
    pub fn await_receive(&self) -> Result<T> {
        self.core.await_receive()
    }

    /// Take a buffered element, if there is one.
    pub fn poll(&self) -> Option<T> {
        self.core.poll()
    }

    /// Hand the next element (or the terminal error) to `callback`.
    pub fn when_receive<F>(&self, callback: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        self.core.when_receive(Box::new(move |result| {
            callback(result);
            None
        }));
    }

    /// A future of the next element.
    pub fn receive_future(&self) -> Future<T>
    where
        T: Clone + Sync,
    {
        let promise = Promise::new();
        let future = promise.future();
        self.core.when_receive(Box::new(move |result| {
            if promise.is_completed() {
                return result.ok();
            }
            promise.complete(result);
            None
        }));
        future
    }

    /// Buffered elements.
    pub fn count(&self) -> usize {
        self.core.count()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// A receiver yielding `transform` of every element of this one.
    pub fn map<U, F>(&self, transform: F) -> Receiver<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Receiver {
            core: Arc::new(MappedReceiver::new(Arc::clone(&self.core), transform)),
        }
    }

    /// Iterate until the channel is closed or canceled.
    ///
    /// Inside a coroutine the iterator awaits every element; on a plain
    /// thread it only drains what is buffered.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { receiver: self }
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Cancel the channel: every waiting sender and receiver fails with
    /// [`Error::Canceled`] and buffered elements are dropped.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.core.is_canceled()
    }

    pub fn when_canceled<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.when_finished(canceled_only(callback));
    }

    /// Run `callback` once the channel is canceled, or closed and drained.
    pub fn when_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.when_finished(Box::new(move |_| callback()));
    }

    pub(crate) fn downgrade(&self) -> Weak<dyn ReceiveCore<T>> {
        Arc::downgrade(&self.core)
    }
}

fn canceled_only<F>(callback: F) -> FinishCallback
where
    F: FnOnce() + Send + 'static,
{
    Box::new(move |error| {
        if let Some(Error::Canceled) = error {
            callback();
        }
    })
}

/// Iterator over a [`Receiver`], see [`Receiver::iter`].
pub struct Iter<'a, T> {
    receiver: &'a Receiver<T>,
}

impl<T: Send + 'static> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if coroutine::is_inside() {
            self.receiver.await_receive().ok()
        } else {
            self.receiver.poll()
        }
    }
}

impl<'a, T: Send + 'static> IntoIterator for &'a Receiver<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}
