use std::{
    collections::VecDeque,
    future::{poll_fn, Future},
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use atomic_waker::AtomicWaker;
use futures_core::Stream;

use crate::Completion;

/// Driver-owned queue of finished batches.
///
/// Instead of running driver code inside the completion context, a driver can
/// route batches here with
/// [`TransferBatch::set_completion_queue`][crate::TransferBatch::set_completion_queue]
/// and consume the results from its own thread or task. Each batch delivers
/// exactly one [`Completion`], in the order the batches finished.
///
/// Cloning the queue yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct CompletionQueue {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    done: Mutex<VecDeque<Completion>>,
    waker: AtomicWaker,
}

impl CompletionQueue {
    pub fn new() -> CompletionQueue {
        CompletionQueue::default()
    }

    /// Add a completion and wake the consumer.
    pub fn push(&self, completion: Completion) {
        self.inner.done.lock().unwrap().push_back(completion);
        self.inner.waker.wake();
    }

    /// Take the oldest completion, if any.
    pub fn try_next(&self) -> Option<Completion> {
        self.inner.done.lock().unwrap().pop_front()
    }

    /// Take the oldest completion, or register the current task for wakeup
    /// when one arrives.
    pub fn poll_next(&self, cx: &mut Context) -> Poll<Completion> {
        if let Some(c) = self.try_next() {
            return Poll::Ready(c);
        }
        self.inner.waker.register(cx.waker());
        // Re-check in case a push raced with the registration.
        match self.try_next() {
            Some(c) => Poll::Ready(c),
            None => Poll::Pending,
        }
    }

    /// Wait for the next completion.
    ///
    /// This future is cancel-safe: dropping it loses nothing.
    pub fn next_complete(&self) -> impl Future<Output = Completion> + Unpin + Send + '_ {
        poll_fn(|cx| self.poll_next(cx))
    }

    /// Number of completions waiting to be taken.
    pub fn len(&self) -> usize {
        self.inner.done.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Stream for CompletionQueue {
    type Item = Completion;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Completion>> {
        CompletionQueue::poll_next(&self, cx).map(Some)
    }
}
