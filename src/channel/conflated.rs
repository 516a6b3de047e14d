//! Last-write-wins channel.
//!
//! Holds at most one element; a send with no waiting receiver replaces
//! whatever is unread. Sends never suspend.

use super::{BufferType, FinishCallback, ReceiveCallback, ReceiveCore, SendCore};
use crate::coroutine::{self, Completion};
use crate::error::{Error, OfferError, Result};
use crate::sync::{CallbackStack, lock};
use log::trace;
use std::collections::VecDeque;
use std::mem;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closed,
    Canceled,
}

impl Status {
    fn error(self) -> Option<Error> {
        match self {
            Status::Open => None,
            Status::Closed => Some(Error::Closed),
            Status::Canceled => Some(Error::Canceled),
        }
    }
}

struct State<T> {
    element: Option<T>,
    receivers: VecDeque<ReceiveCallback<T>>,
    status: Status,
}

/// Callbacks are never run while `state` is locked.
pub(super) struct ConflatedChannel<T> {
    state: Mutex<State<T>>,
    finished: CallbackStack<Option<Error>>,
}

enum Step<T> {
    Ready(Result<T>),
    Wait,
}

impl<T: Send + 'static> ConflatedChannel<T> {
    pub(super) fn new() -> Self {
        ConflatedChannel {
            state: Mutex::new(State {
                element: None,
                receivers: VecDeque::new(),
                status: Status::Open,
            }),
            finished: CallbackStack::new(),
        }
    }

    fn send(&self, mut element: T) -> Result<(), OfferError<T>> {
        loop {
            let mut state = lock(&self.state);
            match state.status {
                Status::Closed => return Err(OfferError::Closed(element)),
                Status::Canceled => return Err(OfferError::Canceled(element)),
                Status::Open => {}
            }
            let Some(receiver) = state.receivers.pop_front() else {
                if state.element.replace(element).is_some() {
                    trace!("conflated channel dropped an unread element");
                }
                return Ok(());
            };
            drop(state);
            match receiver(Ok(element)) {
                None => return Ok(()),
                Some(stale) => element = stale,
            }
        }
    }

    /// Take the element or report why there is none; `Wait` means open and
    /// empty.
    fn try_take(&self) -> Step<T> {
        let mut state = lock(&self.state);
        if let Some(element) = state.element.take() {
            let drained = state.status == Status::Closed;
            drop(state);
            if drained {
                self.finish(Status::Closed);
            }
            return Step::Ready(Ok(element));
        }
        match state.status.error() {
            Some(error) => Step::Ready(Err(error)),
            None => Step::Wait,
        }
    }

    fn await_receive(&self) -> Result<T> {
        if let Step::Ready(result) = self.try_take() {
            return result;
        }
        if !coroutine::is_inside() {
            return Err(Error::CalledOutsideCoroutine);
        }
        coroutine::await_with(|completion: Completion<Result<T>>| {
            // a send may have slipped in since the first look
            self.when_receive(Box::new(move |result| {
                match completion.try_complete(result) {
                    Ok(()) => None,
                    Err(result) => result.ok(),
                }
            }));
        })?
    }

    fn poll(&self) -> Option<T> {
        match self.try_take() {
            Step::Ready(Ok(element)) => Some(element),
            _ => None,
        }
    }

    fn when_receive(&self, callback: ReceiveCallback<T>) {
        let mut state = lock(&self.state);
        let result = match (state.element.take(), state.status.error()) {
            (Some(element), _) => Ok(element),
            (None, Some(error)) => Err(error),
            (None, None) => {
                state.receivers.push_back(callback);
                return;
            }
        };
        let drained = result.is_ok() && state.status == Status::Closed;
        drop(state);
        if drained {
            self.finish(Status::Closed);
        }
        // nobody left to give a stale element to
        let _ = callback(result);
    }

    fn count(&self) -> usize {
        usize::from(lock(&self.state).element.is_some())
    }

    fn close(&self) -> bool {
        let mut state = lock(&self.state);
        if state.status != Status::Open {
            return false;
        }
        state.status = Status::Closed;
        let receivers = mem::take(&mut state.receivers);
        let drained = state.element.is_none();
        drop(state);
        for receiver in receivers {
            receiver(Err(Error::Closed));
        }
        if drained {
            self.finish(Status::Closed);
        }
        true
    }

    fn cancel(&self) {
        let mut state = lock(&self.state);
        if state.status == Status::Canceled {
            return;
        }
        state.status = Status::Canceled;
        let element = state.element.take();
        let receivers = mem::take(&mut state.receivers);
        drop(state);
        drop(element);
        for receiver in receivers {
            receiver(Err(Error::Canceled));
        }
        self.finish(Status::Canceled);
    }
}

impl<T> ConflatedChannel<T> {
    fn status(&self) -> Status {
        lock(&self.state).status
    }

    fn finish(&self, status: Status) {
        self.finished.close(status.error());
    }

    fn when_finished(&self, callback: FinishCallback) {
        if let Err(callback) = self.finished.append(callback) {
            callback(self.status().error());
        }
    }
}

impl<T> Drop for ConflatedChannel<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let status = match state.status {
            Status::Open => Status::Canceled,
            status => status,
        };
        for receiver in mem::take(&mut state.receivers) {
            receiver(Err(Error::Canceled));
        }
        self.finish(status);
    }
}

impl<T: Send + 'static> ReceiveCore<T> for ConflatedChannel<T> {
    fn buffer_type(&self) -> BufferType {
        BufferType::Conflated
    }

    fn await_receive(&self) -> Result<T> {
        ConflatedChannel::await_receive(self)
    }

    fn poll(&self) -> Option<T> {
        ConflatedChannel::poll(self)
    }

    fn when_receive(&self, callback: ReceiveCallback<T>) {
        ConflatedChannel::when_receive(self, callback);
    }

    fn count(&self) -> usize {
        ConflatedChannel::count(self)
    }

    fn is_empty(&self) -> bool {
        ConflatedChannel::count(self) == 0
    }

    fn is_closed(&self) -> bool {
        self.status() == Status::Closed
    }

    fn is_canceled(&self) -> bool {
        self.status() == Status::Canceled
    }

    fn cancel(&self) {
        ConflatedChannel::cancel(self);
    }

    fn when_finished(&self, callback: FinishCallback) {
        ConflatedChannel::when_finished(self, callback);
    }
}

impl<T: Send + 'static> SendCore<T> for ConflatedChannel<T> {
    fn await_send(&self, element: T) -> Result<()> {
        self.send(element).map_err(|error| match error {
            OfferError::Canceled(_) => Error::Canceled,
            _ => Error::Closed,
        })
    }

    fn offer(&self, element: T) -> Result<(), OfferError<T>> {
        self.send(element)
    }

    fn push_unbounded(&self, element: T) {
        let _ = self.send(element);
    }

    fn close(&self) -> bool {
        ConflatedChannel::close(self)
    }

    fn cancel(&self) {
        ConflatedChannel::cancel(self);
    }

    fn is_closed(&self) -> bool {
        self.status() == Status::Closed
    }

    fn is_canceled(&self) -> bool {
        self.status() == Status::Canceled
    }

    fn when_finished(&self, callback: FinishCallback) {
        ConflatedChannel::when_finished(self, callback);
    }
}
