//! Channel endpoints: the transport between two execution contexts.
//!
//! An endpoint pair is the local stand-in for a message channel; each
//! half sends into the other's receiver. Within one channel instance
//! requests are delivered in send order, but responses may resolve out
//! of order — correlation is by id, not position.

use tokio::sync::mpsc;

use crate::error::PortError;
use crate::frame::{Envelope, Frame};

/// One half of a bidirectional channel.
#[derive(Debug)]
pub struct Endpoint {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    text_only: bool,
}

/// Create a connected endpoint pair.
pub fn channel_pair() -> (Endpoint, Endpoint) {
    pair(false)
}

/// A pair whose transport only carries text payloads — models a channel
/// that rejects structured frames and forces the fallback encoding.
pub fn text_channel_pair() -> (Endpoint, Endpoint) {
    pair(true)
}

fn pair(text_only: bool) -> (Endpoint, Endpoint) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        Endpoint {
            tx: a_tx,
            rx: a_rx,
            text_only,
        },
        Endpoint {
            tx: b_tx,
            rx: b_rx,
            text_only,
        },
    )
}

impl Endpoint {
    /// Send a frame, using the string fallback when the structured form
    /// cannot travel.
    pub fn post(&self, frame: Frame) -> Result<(), PortError> {
        let envelope = if self.text_only {
            Envelope::text(&frame)?
        } else {
            Envelope::Frame(frame)
        };
        self.tx.send(envelope).map_err(|_| PortError::Closed)
    }

    /// Receive the next frame, decoding either envelope form.
    pub async fn recv(&mut self) -> Option<Result<Frame, PortError>> {
        self.rx.recv().await.map(Envelope::decode)
    }

    /// Split into independently owned send and receive halves.
    pub fn split(self) -> (EndpointSender, EndpointReceiver) {
        (
            EndpointSender {
                tx: self.tx,
                text_only: self.text_only,
            },
            EndpointReceiver { rx: self.rx },
        )
    }
}

/// Cloneable sending half of an endpoint.
#[derive(Debug, Clone)]
pub struct EndpointSender {
    tx: mpsc::UnboundedSender<Envelope>,
    text_only: bool,
}

impl EndpointSender {
    pub fn post(&self, frame: Frame) -> Result<(), PortError> {
        let envelope = if self.text_only {
            Envelope::text(&frame)?
        } else {
            Envelope::Frame(frame)
        };
        self.tx.send(envelope).map_err(|_| PortError::Closed)
    }
}

/// Receiving half of an endpoint.
#[derive(Debug)]
pub struct EndpointReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl EndpointReceiver {
    pub async fn recv(&mut self) -> Option<Result<Frame, PortError>> {
        self.rx.recv().await.map(Envelope::decode)
    }
}

/// Frame used to establish an indirect channel: one end of a fresh pair
/// is transferred to the target, tagged with the lease to advertise.
#[derive(Debug)]
pub struct Handshake {
    /// Lease name used for liveness tracking
    pub lock: Option<String>,
    /// Single-use channel, torn down after the first response
    pub once: bool,
    /// The transferred channel end
    pub port: Endpoint,
}

/// Handle a context exposes so peers can hand it fresh channel ends.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    tx: mpsc::UnboundedSender<Handshake>,
}

impl ContextHandle {
    /// Transfer a channel end to the context.
    pub fn post(&self, handshake: Handshake) -> Result<(), PortError> {
        self.tx.send(handshake).map_err(|_| PortError::Closed)
    }
}

/// Create a context inbox: the shareable handle plus its receive side.
pub fn context_channel() -> (ContextHandle, mpsc::UnboundedReceiver<Handshake>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ContextHandle { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Request, Response};
    use serde_json::json;

    #[tokio::test]
    async fn frames_travel_between_halves() {
        let (a, mut b) = channel_pair();
        a.post(Frame::Request(Request {
            id: 1,
            args: vec![json!("ping")],
        }))
        .unwrap();
        let frame = b.recv().await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Request(req) if req.id == 1));
    }

    #[tokio::test]
    async fn text_only_transport_roundtrips() {
        let (a, mut b) = text_channel_pair();
        let frame = Frame::Response(Response::ok(4, json!("pong")));
        a.post(frame.clone()).unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), frame);
    }

    #[tokio::test]
    async fn dropped_peer_closes_channel() {
        let (a, b) = channel_pair();
        drop(b);
        let result = a.post(Frame::Response(Response::ok(1, json!(null))));
        assert!(matches!(result, Err(PortError::Closed)));
    }

    #[tokio::test]
    async fn handshake_transfers_an_endpoint() {
        let (handle, mut inbox) = context_channel();
        let (near, far) = channel_pair();
        handle
            .post(Handshake {
                lock: Some("worker".into()),
                once: false,
                port: far,
            })
            .unwrap();
        let handshake = inbox.recv().await.unwrap();
        assert_eq!(handshake.lock.as_deref(), Some("worker"));

        near.post(Frame::Request(Request {
            id: 1,
            args: vec![],
        }))
        .unwrap();
        let mut far = handshake.port;
        assert!(far.recv().await.unwrap().is_ok());
    }
}
