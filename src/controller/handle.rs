use super::events::{CallCommand, CallEvent, ControllerEvent, Reply};
use super::CallState;
use crate::error::CallError;
use crate::peer::TrackKind;
use crate::registry::CallRegistry;
use crate::session::Party;
use crate::signaling::SignalingChannel;
use crate::subscription::Subscription;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Cloneable front door to a running [`CallController`](super::CallController).
#[derive(Clone)]
pub struct CallHandle {
    pub(super) inbox: mpsc::UnboundedSender<ControllerEvent>,
    events: broadcast::Sender<CallEvent>,
    registry: Arc<dyn CallRegistry>,
}

impl CallHandle {
    pub(super) fn new(
        inbox: mpsc::UnboundedSender<ControllerEvent>,
        events: broadcast::Sender<CallEvent>,
        registry: Arc<dyn CallRegistry>,
    ) -> Self {
        Self {
            inbox,
            events,
            registry,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> CallCommand,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(ControllerEvent::Command(make(tx)))
            .map_err(|_| CallError::ControllerStopped)?;
        rx.await.map_err(|_| CallError::ControllerStopped)?
    }

    /// Starts a call; resolves with the new session id once the offer is out.
    pub async fn place_call(&self, callee: Party) -> Result<String, CallError> {
        self.request(|reply| CallCommand::PlaceCall { callee, reply })
            .await
    }

    pub async fn accept(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::Accept { reply }).await
    }

    pub async fn reject(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::Reject { reply }).await
    }

    /// Ends whatever call is in progress. Safe to call in any state.
    pub async fn hang_up(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::HangUp { reply }).await
    }

    pub async fn toggle_track(&self, kind: TrackKind) -> Result<bool, CallError> {
        self.request(|reply| CallCommand::ToggleTrack { kind, reply })
            .await
    }

    pub async fn state(&self) -> Result<CallState, CallError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(ControllerEvent::Command(CallCommand::State { reply: tx }))
            .map_err(|_| CallError::ControllerStopped)?;
        rx.await.map_err(|_| CallError::ControllerStopped)
    }

    /// Directory lookup for the origination screen.
    pub async fn list_parties(&self) -> Result<Vec<Party>, CallError> {
        Ok(self.registry.list_available_parties().await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Routes the channel's inbound messages and close events into the
    /// controller. The returned guards keep the routing alive.
    pub fn attach(&self, channel: &SignalingChannel) -> Vec<Subscription> {
        let messages = self.inbox.clone();
        let closes = self.inbox.clone();
        vec![
            channel.on_message(move |message| {
                let _ = messages.send(ControllerEvent::Signal(message.clone()));
            }),
            channel.on_close(move |reason| {
                let _ = closes.send(ControllerEvent::ChannelClosed(reason.clone()));
            }),
        ]
    }

    /// Ends any call and stops the controller loop.
    pub fn shutdown(&self) {
        let _ = self
            .inbox
            .send(ControllerEvent::Command(CallCommand::Shutdown));
    }
}
