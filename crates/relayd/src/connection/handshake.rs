//! In-band authentication handshake.
//!
//! A freshly accepted transport is sent `auth_required` and then has
//! `auth_timeout` to produce an `auth` frame whose token the verifier
//! accepts. Anything else the client sends in the meantime is ignored;
//! a rejected token does not end the handshake either. Only the deadline
//! or a dead transport does.

use std::time::Duration;

use relay_core::UserId;
use relay_protocol::{ClientMessage, ServerMessage};
use thiserror::Error;
use tracing::{debug, trace};

use super::{control_frame, write_frame, ConnectionSettings};
use crate::auth::CredentialVerifier;
use crate::transport::{Frame, FrameSink, FrameSource, TransportError};

/// Why a handshake did not produce an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("authentication timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("connection closed during authentication")]
    TransportClosed,

    #[error("transport error during authentication: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for HandshakeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::TransportClosed,
            other => Self::Transport(other),
        }
    }
}

/// Runs the handshake on an unsplit pair of transport halves.
///
/// Returns the verified identity. The caller is responsible for sending
/// `auth_success` once the connection has been admitted, or for calling
/// [`reject`] on failure.
pub async fn authenticate<S, R>(
    sink: &mut S,
    source: &mut R,
    verifier: &dyn CredentialVerifier,
    settings: &ConnectionSettings,
) -> Result<UserId, HandshakeError>
where
    S: FrameSink,
    R: FrameSource,
{
    let prompt = control_frame(&ServerMessage::auth_required(
        settings.auth_timeout.as_secs(),
    ))?;
    write_frame(sink, prompt, settings.write_wait).await?;

    match tokio::time::timeout(
        settings.auth_timeout,
        await_credential(source, verifier, settings),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout(settings.auth_timeout)),
    }
}

async fn await_credential<R: FrameSource>(
    source: &mut R,
    verifier: &dyn CredentialVerifier,
    settings: &ConnectionSettings,
) -> Result<UserId, HandshakeError> {
    loop {
        match source.recv().await? {
            Frame::Text(text) => {
                match ClientMessage::parse_with_limit(&text, settings.max_message_bytes) {
                    Ok(ClientMessage::Auth { token }) => match verifier.verify(&token).await {
                        Ok(user_id) => return Ok(user_id),
                        Err(e) => debug!(error = %e, "Credential rejected, still waiting"),
                    },
                    Ok(other) => {
                        debug!(kind = other.kind(), "Ignoring frame before authentication")
                    }
                    Err(e) => debug!(error = %e, "Ignoring undecodable frame before authentication"),
                }
            }
            Frame::Close => return Err(HandshakeError::TransportClosed),
            other => trace!(kind = other.kind(), "Ignoring frame before authentication"),
        }
    }
}

/// Tells the client why it was refused and closes the transport.
///
/// Both steps are best effort: the peer may already be gone.
pub async fn reject<S>(sink: &mut S, reason: &str, write_wait: Duration)
where
    S: FrameSink,
{
    if let Ok(frame) = control_frame(&ServerMessage::auth_failed(reason)) {
        if let Err(e) = write_frame(sink, frame, write_wait).await {
            trace!(error = %e, "Could not deliver auth_failed");
        }
    }
    if let Err(e) = sink.close().await {
        trace!(error = %e, "Error closing rejected transport");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenVerifier;
    use crate::transport::{MemoryTransport, Transport};
    use relay_protocol::EventEnvelope;

    fn verifier() -> StaticTokenVerifier {
        StaticTokenVerifier::new([("T".to_string(), UserId::new(42).unwrap())])
    }

    async fn expect_type(peer: &mut crate::transport::MemoryPeer, expected: &str) {
        match peer.recv().await {
            Some(Frame::Text(text)) => {
                let envelope = EventEnvelope::from_json(&text).unwrap();
                assert_eq!(envelope.event_type, expected);
            }
            other => panic!("expected {expected}, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_valid_token_authenticates() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (mut sink, mut source) = transport.split();
        let verifier = verifier();
        let settings = ConnectionSettings::default();

        peer.send_text(r#"{"type":"auth","data":{"token":"T"}}"#)
            .unwrap();
        let user_id = authenticate(&mut sink, &mut source, &verifier, &settings)
            .await
            .unwrap();

        assert_eq!(user_id.get(), 42);
        expect_type(&mut peer, "auth_required").await;
    }

    #[tokio::test]
    async fn test_noise_and_bad_tokens_keep_waiting() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (mut sink, mut source) = transport.split();
        let verifier = verifier();
        let settings = ConnectionSettings::default();

        peer.send_text(r#"{"type":"subscribe","data":{"channels":["task_updates"]}}"#)
            .unwrap();
        peer.send_text("not json").unwrap();
        peer.send_text(r#"{"type":"auth","data":{"token":"wrong"}}"#)
            .unwrap();
        peer.send(Frame::Ping(vec![1])).unwrap();
        peer.send_text(r#"{"type":"auth","data":{"token":"T"}}"#)
            .unwrap();

        let user_id = authenticate(&mut sink, &mut source, &verifier, &settings)
            .await
            .unwrap();
        assert_eq!(user_id.get(), 42);

        expect_type(&mut peer, "auth_required").await;
        assert_eq!(peer.recv().await, Some(Frame::Pong(vec![1])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out() {
        let (transport, _peer) = MemoryTransport::pair();
        let (mut sink, mut source) = transport.split();
        let verifier = verifier();
        let settings = ConnectionSettings::default();

        let result = authenticate(&mut sink, &mut source, &verifier, &settings).await;
        assert_eq!(
            result,
            Err(HandshakeError::Timeout(Duration::from_secs(30)))
        );
    }

    #[tokio::test]
    async fn test_peer_disconnect_fails_fast() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (mut sink, mut source) = transport.split();
        let verifier = verifier();
        let settings = ConnectionSettings::default();

        peer.disconnect();
        let result = authenticate(&mut sink, &mut source, &verifier, &settings).await;
        assert_eq!(result, Err(HandshakeError::TransportClosed));
    }

    #[tokio::test]
    async fn test_reject_sends_auth_failed_and_closes() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (mut sink, _source) = transport.split();

        reject(&mut sink, "authentication timed out", Duration::from_secs(1)).await;

        expect_type(&mut peer, "auth_failed").await;
        assert!(peer.is_closed());
        assert_eq!(peer.close_count(), 1);
    }
}
