//! Error types shared by coroutines, futures and channels.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Everything a suspension point, future or channel can fail with.
///
/// Cheap to clone: one future result is handed to every subscriber.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An await-family call was made on a thread that is not running a
    /// coroutine.
    #[error("called outside of a coroutine")]
    CalledOutsideCoroutine,
    /// Cooperative cancellation was observed.
    #[error("canceled")]
    Canceled,
    /// The channel was closed and has nothing left to deliver.
    #[error("channel closed")]
    Closed,
    /// A timed await expired first.
    #[error("timed out")]
    Timeout,
    /// A coroutine or future task panicked with this message.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// A host error carried through a future or channel.
    #[error(transparent)]
    Custom(Arc<dyn StdError + Send + Sync + 'static>),
}

impl Error {
    /// Wrap a host error.
    pub fn custom<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Custom(Arc::new(error))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Borrow the host error, if it is one of type `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Error::Custom(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a non-suspending send was refused; the element comes back.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum OfferError<T> {
    Full(T),
    Closed(T),
    Canceled(T),
}

impl<T> OfferError<T> {
    pub fn into_inner(self) -> T {
        match self {
            OfferError::Full(value) | OfferError::Closed(value) | OfferError::Canceled(value) => {
                value
            }
        }
    }
}

impl<T> fmt::Debug for OfferError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferError::Full(_) => f.write_str("Full(..)"),
            OfferError::Closed(_) => f.write_str("Closed(..)"),
            OfferError::Canceled(_) => f.write_str("Canceled(..)"),
        }
    }
}

impl<T> fmt::Display for OfferError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferError::Full(_) => f.write_str("channel is full"),
            OfferError::Closed(_) => f.write_str("channel closed"),
            OfferError::Canceled(_) => f.write_str("channel canceled"),
        }
    }
}

impl<T> StdError for OfferError<T> {}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
