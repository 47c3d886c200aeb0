use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::error::ClientError;

/// What a [`Completion`] settles with.
pub type Outcome<T> = Result<T, ClientError>;

/// Create a linked [`Resolver`] / [`Completion`] pair.
pub fn channel<T>() -> (Resolver<T>, Completion<T>) {
    let (sender, receiver) = oneshot::channel();
    (
        Resolver {
            sender: Some(sender),
        },
        Completion { receiver },
    )
}

/// Writing half of a completion. Settles at most once.
#[derive(Debug)]
pub struct Resolver<T> {
    sender: Option<oneshot::Sender<Outcome<T>>>,
}

impl<T> Resolver<T> {
    pub fn resolve(&mut self, value: T) -> Result<(), ClientError> {
        self.settle(Ok(value))
    }

    pub fn reject(&mut self, error: ClientError) -> Result<(), ClientError> {
        self.settle(Err(error))
    }

    pub fn is_resolved(&self) -> bool {
        self.sender.is_none()
    }

    /// A second settlement is refused and the first outcome stands.
    fn settle(&mut self, outcome: Outcome<T>) -> Result<(), ClientError> {
        let Some(sender) = self.sender.take() else {
            return Err(ClientError::DoubleResolution);
        };

        if sender.send(outcome).is_err() {
            log::trace!("Completion dropped before it was resolved");
        }
        Ok(())
    }
}

/// Single-resolution handle for a pending outcome.
///
/// Await it from async code, or call [`Completion::wait`] from a plain
/// thread.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited or waited on"]
pub struct Completion<T> {
    receiver: oneshot::Receiver<Outcome<T>>,
}

impl<T> Completion<T> {
    /// An already-failed completion
    pub fn failed(error: ClientError) -> Self {
        let (mut resolver, completion) = channel();
        // fresh resolver, cannot already be settled
        let _settled: Result<(), ClientError> = resolver.reject(error);
        completion
    }

    /// An already-successful completion
    pub fn ready(value: T) -> Self {
        let (mut resolver, completion) = channel();
        let _settled: Result<(), ClientError> = resolver.resolve(value);
        completion
    }

    /// Block the current thread until resolved.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn wait(self) -> Outcome<T> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(ClientError::Abandoned))
    }

    /// Wait at most `timeout`. The remote work is not cancelled on expiry.
    pub async fn wait_for(self, timeout: Duration) -> Outcome<T> {
        tokio::time::timeout(timeout, self)
            .await
            .unwrap_or(Err(ClientError::Timeout(timeout)))
    }

    /// Take the outcome if it is already available.
    pub fn try_take(&mut self) -> Option<Outcome<T>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(ClientError::Abandoned)),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ClientError::Abandoned)))
    }
}
