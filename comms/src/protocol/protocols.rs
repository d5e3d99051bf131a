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
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tokio::sync::mpsc;

use super::{ProtocolError, ProtocolId};
use crate::{multiplexing::Substream, peer_id::PeerId};

/// Default cap on concurrent outbound streams per protocol per connection.
pub const DEFAULT_MAX_OUTBOUND_STREAMS: usize = 64;
/// Default cap on concurrent inbound streams per protocol per connection. Deliberately generous;
/// the practical bound is the connection's overall resources.
pub const DEFAULT_MAX_INBOUND_STREAMS: usize = 1024;

/// Per-protocol caps on concurrent streams for a single connection. Inbound and outbound
/// counters are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub max_inbound_streams: usize,
    pub max_outbound_streams: usize,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_inbound_streams: DEFAULT_MAX_INBOUND_STREAMS,
            max_outbound_streams: DEFAULT_MAX_OUTBOUND_STREAMS,
        }
    }
}

/// Events delivered to a registered protocol handler.
#[derive(Debug)]
pub enum ProtocolEvent {
    /// The remote peer opened a stream for this protocol.
    NewInboundSubstream { peer_id: PeerId, substream: Substream },
}

#[derive(Debug)]
pub struct ProtocolNotification {
    pub protocol: ProtocolId,
    pub event: ProtocolEvent,
}

impl ProtocolNotification {
    pub fn new(protocol: ProtocolId, event: ProtocolEvent) -> Self {
        Self { protocol, event }
    }
}

pub type ProtocolNotificationTx = mpsc::Sender<ProtocolNotification>;
pub type ProtocolNotificationRx = mpsc::Receiver<ProtocolNotification>;

struct ProtocolEntry {
    notifier: ProtocolNotificationTx,
    limits: StreamLimits,
}

/// The registry of application protocols this node handles.
///
/// Shared between the upgrader, every live connection and the registrants themselves. Handlers
/// register a notifier channel and optional stream limits; inbound streams that negotiate one of
/// the registered ids are dispatched to the notifier.
#[derive(Clone, Default)]
pub struct Protocols {
    inner: Arc<RwLock<HashMap<ProtocolId, ProtocolEntry>>>,
}

impl Protocols {
    pub fn new() -> Self {
        Default::default()
    }

    /// Register a handler for the given protocol ids. Fails without registering anything if any
    /// of the ids is already taken.
    pub fn handle<I>(
        &self,
        protocols: I,
        notifier: ProtocolNotificationTx,
        limits: Option<StreamLimits>,
    ) -> Result<(), ProtocolError>
    where
        I: IntoIterator<Item = ProtocolId>,
    {
        let protocols = protocols.into_iter().collect::<Vec<_>>();
        let limits = limits.unwrap_or_default();
        let mut inner = self.inner.write().expect("protocols lock poisoned");
        if let Some(existing) = protocols.iter().find(|p| inner.contains_key(*p)) {
            return Err(ProtocolError::ProtocolAlreadyRegistered(
                String::from_utf8_lossy(existing).into_owned(),
            ));
        }
        for protocol in protocols {
            inner.insert(protocol, ProtocolEntry {
                notifier: notifier.clone(),
                limits,
            });
        }
        Ok(())
    }

    pub fn unhandle(&self, protocols: &[ProtocolId]) {
        let mut inner = self.inner.write().expect("protocols lock poisoned");
        for protocol in protocols {
            inner.remove(protocol);
        }
    }

    /// All currently registered protocol ids.
    pub fn supported(&self) -> Vec<ProtocolId> {
        self.inner
            .read()
            .expect("protocols lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn limits_for(&self, protocol: &ProtocolId) -> Option<StreamLimits> {
        self.inner
            .read()
            .expect("protocols lock poisoned")
            .get(protocol)
            .map(|entry| entry.limits)
    }

    /// Dispatch an event to the handler registered for `protocol`.
    pub async fn notify(&self, protocol: &ProtocolId, event: ProtocolEvent) -> Result<(), ProtocolError> {
        let notifier = {
            let inner = self.inner.read().expect("protocols lock poisoned");
            inner
                .get(protocol)
                .map(|entry| entry.notifier.clone())
                .ok_or_else(|| ProtocolError::ProtocolNotRegistered(String::from_utf8_lossy(protocol).into_owned()))?
        };
        notifier
            .send(ProtocolNotification::new(protocol.clone(), event))
            .await
            .map_err(|_| ProtocolError::NotificationSendFailed(String::from_utf8_lossy(protocol).into_owned()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const TEST_PROTOCOL: &[u8] = b"/test/1.0.0";

    #[test]
    fn register_and_query() {
        let protocols = Protocols::new();
        let (tx, _rx) = mpsc::channel(1);
        protocols
            .handle(vec![ProtocolId::from_static(TEST_PROTOCOL)], tx, None)
            .unwrap();

        assert_eq!(protocols.supported(), vec![ProtocolId::from_static(TEST_PROTOCOL)]);
        assert_eq!(
            protocols.limits_for(&ProtocolId::from_static(TEST_PROTOCOL)),
            Some(StreamLimits::default())
        );
        assert_eq!(protocols.limits_for(&ProtocolId::from_static(b"/other")), None);
    }

    #[test]
    fn duplicate_registration_fails() {
        let protocols = Protocols::new();
        let (tx, _rx) = mpsc::channel(1);
        protocols
            .handle(vec![ProtocolId::from_static(TEST_PROTOCOL)], tx.clone(), None)
            .unwrap();
        let err = protocols
            .handle(vec![ProtocolId::from_static(TEST_PROTOCOL)], tx, None)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ProtocolAlreadyRegistered(_)));
    }

    #[test]
    fn unhandle_removes_registration() {
        let protocols = Protocols::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = ProtocolId::from_static(TEST_PROTOCOL);
        protocols.handle(vec![id.clone()], tx.clone(), None).unwrap();
        protocols.unhandle(std::slice::from_ref(&id));
        assert!(protocols.supported().is_empty());
        // The id can be registered again
        protocols.handle(vec![id], tx, None).unwrap();
    }
}
