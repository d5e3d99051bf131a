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

use swarmlink_shutdown::Shutdown;
use tokio::sync::oneshot;

use super::{error::ConnectionManagerError, peer_connection::PeerConnection};

pub type DialReplyTx = oneshot::Sender<Result<PeerConnection, ConnectionManagerError>>;

/// State of a single in-flight dial attempt. All callers that requested the same [DialKey] while
/// the attempt was in flight are recorded as waiters and receive a clone of the outcome.
pub struct PendingDial {
    waiters: Vec<DialReplyTx>,
    cancel: Shutdown,
}

impl PendingDial {
    pub fn new(reply: DialReplyTx) -> Self {
        Self {
            waiters: vec![reply],
            cancel: Shutdown::new(),
        }
    }

    pub fn add_waiter(&mut self, reply: DialReplyTx) {
        self.waiters.push(reply);
    }

    pub fn num_waiters(&self) -> usize {
        self.waiters.len()
    }

    pub fn cancel(&self) -> &Shutdown {
        &self.cancel
    }

    /// Fan the outcome out to every waiter. Waiters that gave up are skipped.
    pub fn complete(self, result: Result<PeerConnection, ConnectionManagerError>) {
        for waiter in self.waiters {
            let _result = waiter.send(result.clone());
        }
    }

    /// Abort the attempt and notify all waiters.
    pub fn abort(mut self, error: ConnectionManagerError) {
        self.cancel.trigger();
        self.complete(Err(error));
    }
}
