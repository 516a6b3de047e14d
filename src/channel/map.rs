use super::{BufferType, FinishCallback, ReceiveCallback, ReceiveCore};
use crate::error::Result;
use std::sync::Arc;

/// Receiving view applying a transform to every element of its source.
pub(super) struct MappedReceiver<T, U> {
    source: Arc<dyn ReceiveCore<T>>,
    transform: Arc<dyn Fn(T) -> U + Send + Sync>,
}

impl<T, U> MappedReceiver<T, U> {
    pub(super) fn new<F>(source: Arc<dyn ReceiveCore<T>>, transform: F) -> Self
    where
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        MappedReceiver {
            source,
            transform: Arc::new(transform),
        }
    }
}

impl<T: Send + 'static, U: Send + 'static> ReceiveCore<U> for MappedReceiver<T, U> {
    fn buffer_type(&self) -> BufferType {
        self.source.buffer_type()
    }

    fn await_receive(&self) -> Result<U> {
        self.source.await_receive().map(&*self.transform)
    }

    fn poll(&self) -> Option<U> {
        self.source.poll().map(&*self.transform)
    }

    fn when_receive(&self, callback: ReceiveCallback<U>) {
        let transform = Arc::clone(&self.transform);
        self.source.when_receive(Box::new(move |result| {
            // a transformed element cannot be handed back
            let _ = callback(result.map(&*transform));
            None
        }));
    }

    fn count(&self) -> usize {
        self.source.count()
    }

    fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    fn is_closed(&self) -> bool {
        self.source.is_closed()
    }

    fn is_canceled(&self) -> bool {
        self.source.is_canceled()
    }

    fn cancel(&self) {
        self.source.cancel();
    }

    fn when_finished(&self, callback: FinishCallback) {
        self.source.when_finished(callback);
    }
}
