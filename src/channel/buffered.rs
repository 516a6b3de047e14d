//! Bounded, rendezvous and unlimited channels.
//!
//! One atomic pair `(count, state)` drives everything. `count` is the
//! number of buffered elements minus the number of waiting receivers:
//! a sender seeing a negative count owes its element to the oldest waiting
//! receiver, a receiver seeing a positive count owns the oldest element.
//! Whoever moves the counter pushes or pops the matching FIFO right after,
//! so a pop may briefly spin on a push that is still in flight.

use super::{BufferType, FinishCallback, ReceiveCallback, ReceiveCore, SendCore};
use crate::coroutine::{self, Completion};
use crate::error::{Error, OfferError, Result};
use crate::sync::{AtomicTuple, CallbackStack, Fifo};
use log::trace;
use std::sync::atomic::{Ordering, fence};

const OPEN: i32 = 0;
const CLOSED: i32 = 1;
const CANCELED: i32 = 2;

/// A buffered element, with the sender to wake once it is taken if that
/// sender had to suspend.
struct Pending<T> {
    element: T,
    resume: Option<Completion<Option<Error>>>,
}

pub(super) struct BufferedChannel<T> {
    capacity: i32,
    receivers: Fifo<ReceiveCallback<T>>,
    elements: Fifo<Pending<T>>,
    /// Senders parked on a full buffer, woken with `Closed` by `close`.
    /// Entries whose await is already over are dropped lazily.
    parked: Fifo<Completion<Option<Error>>>,
    state: AtomicTuple,
    finished: CallbackStack<Option<Error>>,
}

impl<T: Send + 'static> BufferedChannel<T> {
    pub(super) fn new(capacity: usize) -> Self {
        BufferedChannel {
            capacity: i32::try_from(capacity).unwrap_or(i32::MAX),
            receivers: Fifo::new(),
            elements: Fifo::new(),
            parked: Fifo::new(),
            state: AtomicTuple::new(0, OPEN),
            finished: CallbackStack::new(),
        }
    }

    fn buffer_type(&self) -> BufferType {
        match self.capacity {
            0 => BufferType::None,
            i32::MAX => BufferType::Unlimited,
            capacity => BufferType::Buffered(capacity as usize),
        }
    }

    fn await_send(&self, mut element: T) -> Result<()> {
        let inside = coroutine::is_inside();
        // a canceled coroutine must not claim a slot it cannot wait for
        let may_park = inside && !coroutine::current().is_ok_and(|handle| handle.is_canceled());
        let capacity = self.capacity;
        loop {
            let ((count, state), _) = self.state.update(|count, state| {
                if state != OPEN || (count >= capacity && !may_park) {
                    (count, state)
                } else {
                    (count + 1, state)
                }
            });
            match state {
                CLOSED => return Err(Error::Closed),
                CANCELED => return Err(Error::Canceled),
                _ => {}
            }
            if count < 0 {
                match self.hand_over(element) {
                    None => return Ok(()),
                    Some(stale) => element = stale,
                }
            } else if count < capacity {
                self.elements.push(Pending {
                    element,
                    resume: None,
                });
                return Ok(());
            } else if may_park {
                return self.park_sender(element);
            } else if inside {
                return Err(Error::Canceled);
            } else {
                return Err(Error::CalledOutsideCoroutine);
            }
        }
    }

    /// The slot is already counted, so the element is pushed whether or not
    /// the await gets to park. Once pushed it will be delivered, so only the
    /// channel itself can fail the send.
    fn park_sender(&self, element: T) -> Result<()> {
        let mut element = Some(element);
        let outcome = coroutine::await_with(|completion: Completion<Option<Error>>| {
            if let Some(element) = element.take() {
                self.track_parked(&completion);
                self.elements.push(Pending {
                    element,
                    resume: Some(completion),
                });
            }
        });
        if let Some(element) = element.take() {
            self.elements.push(Pending {
                element,
                resume: None,
            });
        }
        match outcome {
            Ok(Some(error)) => Err(error),
            Ok(None) | Err(Error::Canceled) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Remember a parked sender so `close` can reach it.
    fn track_parked(&self, completion: &Completion<Option<Error>>) {
        // keep the list short: look at a couple of old entries first
        for _ in 0..2 {
            match self.parked.pop() {
                Some(old) if !old.is_completed() => self.parked.push(old),
                Some(_) => {}
                None => break,
            }
        }
        self.parked.push(completion.clone());
        fence(Ordering::SeqCst);
        if self.state.load().1 == CLOSED {
            // close may already have walked the list
            completion.complete(Some(Error::Closed));
        }
    }

    /// Give `element` to the oldest waiting receiver. Returns it back if
    /// that receiver was no longer waiting.
    fn hand_over(&self, element: T) -> Option<T> {
        let receiver = self.receivers.blocking_pop();
        let stale = receiver(Ok(element));
        if stale.is_some() {
            trace!("channel: receiver went away, passing the element on");
        }
        stale
    }

    fn offer(&self, mut element: T) -> Result<(), OfferError<T>> {
        let capacity = self.capacity;
        loop {
            let ((count, state), _) = self.state.update(|count, state| {
                if state != OPEN || count >= capacity {
                    (count, state)
                } else {
                    (count + 1, state)
                }
            });
            match state {
                CLOSED => return Err(OfferError::Closed(element)),
                CANCELED => return Err(OfferError::Canceled(element)),
                _ => {}
            }
            if count < 0 {
                match self.hand_over(element) {
                    None => return Ok(()),
                    Some(stale) => element = stale,
                }
            } else if count < capacity {
                self.elements.push(Pending {
                    element,
                    resume: None,
                });
                return Ok(());
            } else {
                return Err(OfferError::Full(element));
            }
        }
    }

    fn push_unbounded(&self, mut element: T) {
        loop {
            let ((count, state), _) = self.state.update(|count, state| {
                if state != OPEN {
                    (count, state)
                } else {
                    (count + 1, state)
                }
            });
            if state != OPEN {
                return;
            }
            if count >= 0 {
                self.elements.push(Pending {
                    element,
                    resume: None,
                });
                return;
            }
            match self.hand_over(element) {
                None => return,
                Some(stale) => element = stale,
            }
        }
    }

    /// Take one slot off the counter for a receiver that may wait.
    fn claim(&self, wait: bool) -> (i32, i32) {
        self.state
            .update(|count, state| {
                if count > 0 || (state == OPEN && wait) {
                    (count - 1, state)
                } else {
                    (count, state)
                }
            })
            .0
    }

    /// Pop the element a positive count promised.
    fn take(&self, count: i32, state: i32) -> T {
        let Pending { element, resume } = self.elements.blocking_pop();
        if let Some(resume) = resume {
            resume.complete(None);
        }
        if count == 1 && state == CLOSED {
            self.finish();
        }
        element
    }

    fn await_receive(&self) -> Result<T> {
        let inside = coroutine::is_inside();
        let (count, state) = self.claim(inside);
        if count > 0 {
            return Ok(self.take(count, state));
        }
        match state {
            OPEN if inside => self.park_receiver(),
            OPEN => Err(Error::CalledOutsideCoroutine),
            CLOSED => Err(Error::Closed),
            _ => Err(Error::Canceled),
        }
    }

    /// The receiver is already counted, so some callback is always pushed;
    /// if the await never got to park it just hands every element back.
    fn park_receiver(&self) -> Result<T> {
        let mut registered = false;
        let outcome = coroutine::await_with(|completion: Completion<Result<T>>| {
            registered = true;
            self.receivers.push(Box::new(move |result| {
                match completion.try_complete(result) {
                    Ok(()) => None,
                    Err(result) => result.ok(),
                }
            }));
        });
        if !registered {
            self.receivers.push(Box::new(|result: Result<T>| result.ok()));
        }
        outcome?
    }

    fn poll(&self) -> Option<T> {
        let (count, state) = self.claim(false);
        (count > 0).then(|| self.take(count, state))
    }

    fn when_receive(&self, callback: ReceiveCallback<T>) {
        let (count, state) = self.claim(true);
        if count > 0 {
            let element = self.take(count, state);
            // nobody left to give a stale element to
            let _ = callback(Ok(element));
            return;
        }
        match state {
            OPEN => self.receivers.push(callback),
            CLOSED => {
                callback(Err(Error::Closed));
            }
            _ => {
                callback(Err(Error::Canceled));
            }
        }
    }

    fn count(&self) -> usize {
        self.state.load().0.max(0) as usize
    }

    fn is_empty(&self) -> bool {
        self.state.load().0 <= 0
    }

    fn close(&self) -> bool {
        let ((count, state), _) = self.state.update(|count, state| {
            if state == OPEN {
                (count.max(0), CLOSED)
            } else {
                (count, state)
            }
        });
        if state != OPEN {
            return false;
        }
        trace!("channel closed with {count} pending");
        for _ in count..0 {
            let receiver = self.receivers.blocking_pop();
            receiver(Err(Error::Closed));
        }
        // parked senders fail, their elements stay receivable
        fence(Ordering::SeqCst);
        while let Some(sender) = self.parked.pop() {
            sender.complete(Some(Error::Closed));
        }
        if count <= 0 {
            self.finish();
        }
        true
    }

    fn cancel(&self) {
        let ((count, state), _) = self.state.update(|_, _| (0, CANCELED));
        if state == CANCELED {
            return;
        }
        trace!("channel canceled with {count} pending");
        for _ in count..0 {
            let receiver = self.receivers.blocking_pop();
            receiver(Err(Error::Canceled));
        }
        for _ in 0..count {
            let Pending { resume, .. } = self.elements.blocking_pop();
            if let Some(resume) = resume {
                resume.complete(Some(Error::Canceled));
            }
        }
        while self.parked.pop().is_some() {}
        self.finish();
    }
}

impl<T> BufferedChannel<T> {
    fn is_closed(&self) -> bool {
        self.state.load().1 == CLOSED
    }

    fn is_canceled(&self) -> bool {
        self.state.load().1 == CANCELED
    }

    fn terminal_error(&self) -> Option<Error> {
        match self.state.load().1 {
            CLOSED => Some(Error::Closed),
            CANCELED => Some(Error::Canceled),
            _ => None,
        }
    }

    fn finish(&self) {
        self.finished.close(self.terminal_error());
    }

    fn when_finished(&self, callback: FinishCallback) {
        if let Err(callback) = self.finished.append(callback) {
            callback(self.terminal_error());
        }
    }
}

impl<T> Drop for BufferedChannel<T> {
    fn drop(&mut self) {
        while let Some(receiver) = self.receivers.pop() {
            receiver(Err(Error::Canceled));
        }
        let error = self.terminal_error().unwrap_or(Error::Canceled);
        self.finished.close(Some(error));
    }
}

impl<T: Send + 'static> ReceiveCore<T> for BufferedChannel<T> {
    fn buffer_type(&self) -> BufferType {
        BufferedChannel::buffer_type(self)
    }

    fn await_receive(&self) -> Result<T> {
        BufferedChannel::await_receive(self)
    }

    fn poll(&self) -> Option<T> {
        BufferedChannel::poll(self)
    }

    fn when_receive(&self, callback: ReceiveCallback<T>) {
        BufferedChannel::when_receive(self, callback);
    }

    fn count(&self) -> usize {
        BufferedChannel::count(self)
    }

    fn is_empty(&self) -> bool {
        BufferedChannel::is_empty(self)
    }

    fn is_closed(&self) -> bool {
        BufferedChannel::is_closed(self)
    }

    fn is_canceled(&self) -> bool {
        BufferedChannel::is_canceled(self)
    }

    fn cancel(&self) {
        BufferedChannel::cancel(self);
    }

    fn when_finished(&self, callback: FinishCallback) {
        BufferedChannel::when_finished(self, callback);
    }
}

impl<T: Send + 'static> SendCore<T> for BufferedChannel<T> {
    fn await_send(&self, element: T) -> Result<()> {
        BufferedChannel::await_send(self, element)
    }

    fn offer(&self, element: T) -> Result<(), OfferError<T>> {
        BufferedChannel::offer(self, element)
    }

    fn push_unbounded(&self, element: T) {
        BufferedChannel::push_unbounded(self, element);
    }

    fn close(&self) -> bool {
        BufferedChannel::close(self)
    }

    fn cancel(&self) {
        BufferedChannel::cancel(self);
    }

    fn is_closed(&self) -> bool {
        BufferedChannel::is_closed(self)
    }

    fn is_canceled(&self) -> bool {
        BufferedChannel::is_canceled(self)
    }

    fn when_finished(&self, callback: FinishCallback) {
        BufferedChannel::when_finished(self, callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn buffer_type_from_capacity() {
        assert_eq!(BufferedChannel::<u8>::new(0).buffer_type(), BufferType::None);
        assert_eq!(
            BufferedChannel::<u8>::new(3).buffer_type(),
            BufferType::Buffered(3)
        );
        assert_eq!(
            BufferedChannel::<u8>::new(usize::MAX).buffer_type(),
            BufferType::Unlimited
        );
    }

    #[test]
    fn offer_respects_capacity() {
        let channel = BufferedChannel::new(2);
        assert!(channel.offer(1).is_ok());
        assert!(channel.offer(2).is_ok());
        assert_eq!(channel.offer(3), Err(OfferError::Full(3)));
        assert_eq!(channel.count(), 2);
        assert_eq!(channel.poll(), Some(1));
        assert_eq!(channel.poll(), Some(2));
        assert_eq!(channel.poll(), None);
        assert!(channel.is_empty());
    }

    #[test]
    fn rendezvous_offer_needs_a_receiver() {
        let channel = BufferedChannel::new(0);
        assert_eq!(channel.offer("x"), Err(OfferError::Full("x")));
        let got = Arc::new(Mutex::new(None));
        let slot = got.clone();
        channel.when_receive(Box::new(move |result| {
            *slot.lock().unwrap() = Some(result);
            None
        }));
        assert!(channel.offer("y").is_ok());
        assert!(matches!(*got.lock().unwrap(), Some(Ok("y"))));
    }

    #[test]
    fn poll_keeps_waiting_receivers() {
        let channel = BufferedChannel::<u8>::new(1);
        channel.when_receive(Box::new(|_| None));
        assert_eq!(channel.poll(), None);
        assert_eq!(channel.state.load().0, -1);
    }

    #[test]
    fn stale_receiver_passes_element_on() {
        let channel = BufferedChannel::new(1);
        channel.when_receive(Box::new(|result: Result<u32>| result.ok()));
        let got = Arc::new(Mutex::new(None));
        let slot = got.clone();
        channel.when_receive(Box::new(move |result| {
            *slot.lock().unwrap() = result.ok();
            None
        }));
        assert!(channel.offer(9).is_ok());
        assert_eq!(*got.lock().unwrap(), Some(9));
    }

    #[test]
    fn close_fails_receivers_then_drains() {
        let channel = BufferedChannel::new(4);
        let failed = Arc::new(Mutex::new(None));
        let slot = failed.clone();
        channel.when_receive(Box::new(move |result: Result<u8>| {
            *slot.lock().unwrap() = result.err();
            None
        }));
        assert!(channel.close());
        assert!(!channel.close());
        assert!(matches!(*failed.lock().unwrap(), Some(Error::Closed)));
        assert_eq!(channel.offer(1), Err(OfferError::Closed(1)));

        let drained = BufferedChannel::new(4);
        let finished = Arc::new(Mutex::new(None));
        let slot = finished.clone();
        drained.when_finished(Box::new(move |error| *slot.lock().unwrap() = Some(error)));
        drained.offer(1).unwrap();
        drained.close();
        assert!(finished.lock().unwrap().is_none());
        assert_eq!(drained.poll(), Some(1));
        assert!(matches!(*finished.lock().unwrap(), Some(Some(Error::Closed))));
    }

    #[test]
    fn cancel_drops_elements() {
        let channel = BufferedChannel::new(4);
        channel.offer(1).unwrap();
        channel.offer(2).unwrap();
        channel.cancel();
        assert!(channel.is_canceled());
        assert_eq!(channel.poll(), None);
        assert_eq!(channel.elements.len(), 0);
        assert!(matches!(channel.await_receive(), Err(Error::Canceled)));
    }

    #[test]
    fn receive_outside_coroutine_only_when_ready() {
        let channel = BufferedChannel::new(1);
        assert!(matches!(
            channel.await_receive(),
            Err(Error::CalledOutsideCoroutine)
        ));
        assert_eq!(channel.state.load().0, 0);
        channel.await_send(5).unwrap();
        assert!(matches!(
            channel.await_send(6),
            Err(Error::CalledOutsideCoroutine)
        ));
        assert_eq!(channel.await_receive().unwrap(), 5);
    }
}
