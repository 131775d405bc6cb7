//! QUIC transport for the signaling channel.
//!
//! [`QuicDialer`] opens one QUIC connection per dial and bridges it to a
//! [`FrameLink`]. This is a thin layer that only moves frames; handshake,
//! heartbeat and reconnect logic stay in the channel task.
//!
//! Client frames go out one per bidirectional stream. Service frames arrive
//! one per unidirectional stream, header first, then payload.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use bytes::BytesMut;
use quinn::{ClientConfig, Endpoint, RecvStream, SendStream};
use tandem_proto::{Frame, FrameHeader};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::channel::{Dialer, FrameLink};

/// ALPN protocol identifier. Must match the service.
pub const ALPN: &[u8] = b"tandem/1";

/// QUIC idle timeout.
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames buffered in each direction.
const LINK_CAPACITY: usize = 32;

/// Transport errors.
#[derive(Debug, Error)]
pub enum QuicError {
    /// Address did not resolve.
    #[error("invalid address: {0}")]
    Address(String),

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Dials the matchmaking service over QUIC.
#[derive(Debug, Clone)]
pub struct QuicDialer {
    server_addr: String,
    server_name: String,
}

impl QuicDialer {
    /// Dialer for `host:port`. The host part is used as the TLS server name.
    #[must_use]
    pub fn new(server_addr: impl Into<String>) -> Self {
        let server_addr = server_addr.into();
        let server_name = server_addr
            .rsplit_once(':')
            .map_or(server_addr.as_str(), |(host, _)| host)
            .trim_matches(|c| c == '[' || c == ']')
            .to_string();
        Self { server_addr, server_name }
    }

    /// Configured address.
    #[must_use]
    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    fn resolve(&self) -> Result<SocketAddr, QuicError> {
        self.server_addr
            .to_socket_addrs()
            .map_err(|e| QuicError::Address(format!("{}: {e}", self.server_addr)))?
            .next()
            .ok_or_else(|| QuicError::Address(self.server_addr.clone()))
    }

    async fn connect(&self) -> Result<FrameLink, QuicError> {
        let addr = self.resolve()?;
        let bind: SocketAddr = if addr.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0u8; 4], 0))
        };

        let client_config = insecure_client_config()?;
        let mut endpoint = Endpoint::client(bind)
            .map_err(|e| QuicError::Connection(format!("endpoint creation failed: {e}")))?;
        endpoint.set_default_client_config(client_config);

        let connection = endpoint
            .connect(addr, &self.server_name)
            .map_err(|e| QuicError::Connection(format!("connect failed: {e}")))?
            .await
            .map_err(|e| QuicError::Connection(format!("handshake failed: {e}")))?;

        tracing::debug!(%addr, "quic connection established");

        let (to_server_tx, to_server_rx) = mpsc::channel::<Frame>(LINK_CAPACITY);
        let (from_server_tx, from_server_rx) = mpsc::channel::<Frame>(LINK_CAPACITY);

        let handle = tokio::spawn(run_connection(connection, to_server_rx, from_server_tx));

        Ok(FrameLink::new(to_server_tx, from_server_rx, Some(handle.abort_handle())))
    }
}

impl Dialer for QuicDialer {
    type Error = QuicError;

    fn dial(&self) -> impl Future<Output = Result<FrameLink, QuicError>> + Send {
        self.connect()
    }
}

/// Bridge channels and QUIC until either side goes away.
///
/// Returning drops the inbound sender, which the channel task reads as a
/// lost link.
async fn run_connection(
    connection: quinn::Connection,
    mut to_server: mpsc::Receiver<Frame>,
    from_server: mpsc::Sender<Frame>,
) {
    let inbound = async {
        loop {
            match connection.accept_uni().await {
                Ok(recv) => {
                    if let Err(e) = handle_incoming_stream(recv, &from_server).await {
                        tracing::warn!(error = %e, "incoming stream dropped");
                    }
                },
                Err(e) => {
                    tracing::debug!(error = %e, "connection closed");
                    break;
                },
            }
        }
    };

    let outbound = async {
        while let Some(frame) = to_server.recv().await {
            match connection.open_bi().await {
                Ok((send, _recv)) => {
                    if let Err(e) = send_frame(send, &frame).await {
                        tracing::warn!(error = %e, "send failed");
                    }
                },
                Err(e) => {
                    tracing::debug!(error = %e, "cannot open stream");
                    break;
                },
            }
        }
    };

    tokio::select! {
        () = inbound => {},
        () = outbound => {},
    }

    connection.close(0u32.into(), b"bye");
}

/// Read one service frame from a unidirectional stream.
///
/// Streams are read sequentially so frames are delivered in the order the
/// service opened them.
async fn handle_incoming_stream(
    mut recv: RecvStream,
    tx: &mpsc::Sender<Frame>,
) -> Result<(), QuicError> {
    let mut buf = BytesMut::zeroed(FrameHeader::SIZE);

    recv.read_exact(&mut buf[..FrameHeader::SIZE])
        .await
        .map_err(|e| QuicError::Stream(format!("header read failed: {e}")))?;

    let header = FrameHeader::from_bytes(&buf[..FrameHeader::SIZE])
        .map_err(|e| QuicError::Protocol(format!("invalid header: {e}")))?;
    let payload_size = header.payload_size() as usize;

    if payload_size > 0 {
        buf.resize(FrameHeader::SIZE + payload_size, 0);
        recv.read_exact(&mut buf[FrameHeader::SIZE..])
            .await
            .map_err(|e| QuicError::Stream(format!("payload read failed: {e}")))?;
    }

    let frame =
        Frame::decode(&buf).map_err(|e| QuicError::Protocol(format!("frame decode failed: {e}")))?;

    tx.send(frame).await.map_err(|_| QuicError::Stream("link receiver gone".to_string()))
}

/// Send a frame on a stream.
async fn send_frame(mut send: SendStream, frame: &Frame) -> Result<(), QuicError> {
    let buf = frame.to_vec().map_err(|e| QuicError::Protocol(format!("encode failed: {e}")))?;

    send.write_all(&buf).await.map_err(|e| QuicError::Stream(format!("write failed: {e}")))?;
    send.finish().map_err(|e| QuicError::Stream(format!("finish failed: {e}")))?;

    Ok(())
}

/// Client config that accepts any certificate.
///
/// WARNING: Development only. Production should verify certificates.
fn insecure_client_config() -> Result<ClientConfig, QuicError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| QuicError::Connection(format!("invalid tls config: {e}")))?;
    let mut config = ClientConfig::new(Arc::new(quic_crypto));

    let idle = MAX_IDLE_TIMEOUT
        .try_into()
        .map_err(|e| QuicError::Connection(format!("invalid idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate (insecure, for
/// development).
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_from_address() {
        assert_eq!(QuicDialer::new("match.example:4433").server_name, "match.example");
        assert_eq!(QuicDialer::new("[::1]:4433").server_name, "::1");
        assert_eq!(QuicDialer::new("localhost").server_name, "localhost");
    }

    #[test]
    fn unresolvable_address_rejected() {
        let dialer = QuicDialer::new("not an address");
        assert!(matches!(dialer.resolve(), Err(QuicError::Address(_))));
    }

    #[test]
    fn client_config_builds() {
        assert!(insecure_client_config().is_ok());
    }
}
