// Copyright 2024, The Swarmlink Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use futures::{
    channel::oneshot,
    future,
    future::{FusedFuture, Shared},
    FutureExt,
};

/// Trigger side of a shutdown signal.
///
/// Call `to_signal` to obtain a future that resolves once `trigger` is called. All clones of the
/// signal resolve. The trigger also fires when this is dropped, so hold the `Shutdown` for as long
/// as the components it governs should keep running.
#[derive(Debug)]
pub struct Shutdown {
    tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    signal: ShutdownSignal,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            signal: ShutdownSignal {
                inner: rx.shared(),
            },
        }
    }

    /// Fire the signal. Idempotent.
    pub fn trigger(&mut self) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _result = tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }

    pub fn to_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver end of a shutdown signal. Resolves when the `Shutdown` it came from is triggered or
/// dropped.
#[derive(Debug, Clone)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ShutdownSignal {
    inner: Shared<oneshot::Receiver<()>>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        self.inner.is_terminated()
    }

    /// Wait for the shutdown signal to trigger.
    pub fn wait(&mut self) -> &mut Self {
        self
    }

    pub fn select<T: Future + Unpin>(self, other: T) -> future::Select<Self, T> {
        future::select(self, other)
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.inner.is_terminated() {
            return Poll::Ready(());
        }
        // Resolves on trigger (Ok) and on a dropped Shutdown (Err) alike
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedFuture for ShutdownSignal {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

/// A shutdown signal that may not be set. When unset it never resolves.
#[derive(Debug, Clone, Default)]
pub struct OptionalShutdownSignal(Option<ShutdownSignal>);

impl OptionalShutdownSignal {
    pub fn none() -> Self {
        Self(None)
    }

    /// Set the signal. Once set this resolves exactly as the given `ShutdownSignal` does.
    pub fn set(&mut self, signal: ShutdownSignal) -> &mut Self {
        self.0 = Some(signal);
        self
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn take(&mut self) -> Option<ShutdownSignal> {
        self.0.take()
    }
}

impl Future for OptionalShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.0.as_mut() {
            Some(inner) => Pin::new(inner).poll(cx),
            None => Poll::Pending,
        }
    }
}

impl From<Option<ShutdownSignal>> for OptionalShutdownSignal {
    fn from(inner: Option<ShutdownSignal>) -> Self {
        Self(inner)
    }
}

impl From<ShutdownSignal> for OptionalShutdownSignal {
    fn from(inner: ShutdownSignal) -> Self {
        Self(Some(inner))
    }
}

impl FusedFuture for OptionalShutdownSignal {
    fn is_terminated(&self) -> bool {
        self.0.as_ref().map(FusedFuture::is_terminated).unwrap_or(false)
    }
}

/// Resolves as soon as any of the contained signals resolves. Used to combine a caller-supplied
/// cancellation signal, a timeout-driven signal and a component-wide shutdown into one.
#[derive(Debug, Clone, Default)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct AnySignal {
    signals: Vec<ShutdownSignal>,
}

impl AnySignal {
    pub fn new() -> Self {
        Self { signals: Vec::new() }
    }

    pub fn push(&mut self, signal: ShutdownSignal) -> &mut Self {
        self.signals.push(signal);
        self
    }

    pub fn with(mut self, signal: ShutdownSignal) -> Self {
        self.signals.push(signal);
        self
    }

    /// Add the signal if one is present.
    pub fn with_optional(mut self, signal: Option<ShutdownSignal>) -> Self {
        if let Some(signal) = signal {
            self.signals.push(signal);
        }
        self
    }

    pub fn is_triggered(&self) -> bool {
        self.signals.iter().any(ShutdownSignal::is_triggered)
    }
}

impl Future for AnySignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        for signal in &mut self.signals {
            if let Poll::Ready(()) = Pin::new(signal).poll(cx) {
                return Poll::Ready(());
            }
        }
        Poll::Pending
    }
}

impl FusedFuture for AnySignal {
    fn is_terminated(&self) -> bool {
        self.is_triggered()
    }
}

impl FromIterator<ShutdownSignal> for AnySignal {
    fn from_iter<I: IntoIterator<Item = ShutdownSignal>>(iter: I) -> Self {
        Self {
            signals: iter.into_iter().collect(),
        }
    }
}
