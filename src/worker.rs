//! Generic single-consumer mailbox used to serialize state mutation onto one
//! logical task, the pattern the Engine Session and Manager both build on:
//! public methods post a message and return immediately; a single spawned
//! task owns the mutable state and processes messages one at a time.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle for posting messages into a running mailbox loop. Cloning a
/// `Mailbox` shares the same underlying channel, so many callers (event
/// callbacks, public API methods, timers) can post into one worker.
pub struct Mailbox<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<M: Send + 'static> Mailbox<M> {
    /// Spawns the run loop. `handle` is called once per message with
    /// exclusive access to `state`; returning `false` stops the loop.
    pub fn spawn<S, F, Fut>(mut state: S, mut handle: F) -> (Self, JoinHandle<()>)
    where
        S: Send + 'static,
        F: FnMut(&mut S, M) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<M>();
        let join = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if !handle(&mut state, message).await {
                    break;
                }
            }
        });
        (Self { tx }, join)
    }

    /// Posts a message. Errors only if the worker task has already exited,
    /// which callers generally treat as "nothing left to do" rather than a
    /// hard failure.
    pub fn post(&self, message: M) -> Result<(), mpsc::error::SendError<M>> {
        self.tx.send(message)
    }

    /// Like [`Mailbox::spawn`], but `init` builds the owned state from the
    /// mailbox's own handle, for state that needs to re-post to itself (a
    /// reconnect timer, a self-scheduled retry) without a separate
    /// out-of-band channel.
    pub fn spawn_with_self<S, F, Init, Fut>(init: Init, mut handle: F) -> (Self, JoinHandle<()>)
    where
        S: Send + 'static,
        Init: FnOnce(Mailbox<M>) -> S,
        F: FnMut(&mut S, M) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<M>();
        let mailbox = Self { tx };
        let mut state = init(mailbox.clone());
        let join = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if !handle(&mut state, message).await {
                    break;
                }
            }
        });
        (mailbox, join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn posted_messages_are_applied_in_order() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut tx = Some(tx);
        let (mailbox, join) = Mailbox::spawn(Vec::<u32>::new(), move |state, msg: u32| {
            state.push(msg);
            let done = state.len() == 3;
            if done {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(state.clone());
                }
            }
            async move { !done }
        });

        mailbox.post(1).unwrap();
        mailbox.post(2).unwrap();
        mailbox.post(3).unwrap();

        let collected = rx.await.unwrap();
        assert_eq!(collected, vec![1, 2, 3]);
        join.await.unwrap();
    }
}
