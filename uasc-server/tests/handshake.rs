// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! End-to-end handshake scenarios driving a real transport loop over an in-memory
//! duplex stream with a paired client stub.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, OnceLock,
};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use uasc_core::{
    comms::{
        chunker::Chunker,
        message_chunk::{MessageChunk, MESSAGE_CHUNK_HEADER_SIZE},
        secure_channel::{Role, SecureChannel},
        tcp_codec::TcpCodec,
    },
    messages::{CodecRegistry, RequestMessage, ResponseMessage},
};
use uasc_crypto::{CertificateStore, SecurityPolicy};
use uasc_server::{MessageHandler, MessageHandlerFactory, SecureChannelServer, ServerConfig};
use uasc_types::{
    ByteString, CloseSecureChannelRequest, DateTime, MessageSecurityMode,
    OpenSecureChannelRequest, OpenSecureChannelResponse, RequestHeader,
    SecurityTokenRequestType, StatusCode,
};

fn server_store() -> Arc<CertificateStore> {
    static STORE: OnceLock<Arc<CertificateStore>> = OnceLock::new();
    STORE
        .get_or_init(|| Arc::new(CertificateStore::new_self_signed("UASC server", 2048).unwrap()))
        .clone()
}

fn client_store() -> Arc<CertificateStore> {
    static STORE: OnceLock<Arc<CertificateStore>> = OnceLock::new();
    STORE
        .get_or_init(|| Arc::new(CertificateStore::new_self_signed("UASC client", 2048).unwrap()))
        .clone()
}

struct NullHandler;

impl MessageHandler for NullHandler {
    fn handle_message(
        &mut self,
        _channel: &Arc<Mutex<SecureChannel>>,
        _chunks: Vec<MessageChunk>,
    ) -> Result<(), uasc_types::Error> {
        Ok(())
    }
}

struct RecordingFactory {
    installs: Arc<AtomicUsize>,
}

impl MessageHandlerFactory for RecordingFactory {
    fn create(&self, _channel_id: u32) -> Box<dyn MessageHandler> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        Box::new(NullHandler)
    }
}

struct Harness {
    server: Arc<SecureChannelServer>,
    installs: Arc<AtomicUsize>,
}

fn harness(config: ServerConfig) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let installs = Arc::new(AtomicUsize::new(0));
    let factory = Arc::new(RecordingFactory {
        installs: Arc::clone(&installs),
    });
    let server = Arc::new(SecureChannelServer::new(
        config,
        server_store(),
        CodecRegistry::server_handshake(),
        factory,
    ));
    Harness { server, installs }
}

struct TestClient {
    channel: SecureChannel,
    read: FramedRead<ReadHalf<DuplexStream>, TcpCodec>,
    write: WriteHalf<DuplexStream>,
    codecs: CodecRegistry<ResponseMessage>,
    sequence_number: u32,
    next_request_id: u32,
    server_task: JoinHandle<StatusCode>,
}

impl Harness {
    /// Open a new connection to the server, as a client configured for the given policy
    /// and mode.
    fn connect(&self, policy: SecurityPolicy, mode: MessageSecurityMode) -> TestClient {
        let (client_end, server_end) = tokio::io::duplex(1024 * 1024);
        let transport = self.server.attach(server_end);
        let server_task = tokio::spawn(transport.run());

        let mut channel =
            SecureChannel::new(Role::Client, client_store(), Default::default());
        channel.set_security_policy(policy);
        channel.set_security_mode(mode);
        if policy != SecurityPolicy::None {
            channel.set_remote_cert(Some(server_store().own_cert().clone()));
        }

        let (read, write) = tokio::io::split(client_end);
        TestClient {
            channel,
            read: FramedRead::new(read, TcpCodec::new(Default::default())),
            write,
            codecs: CodecRegistry::client_handshake(),
            sequence_number: 1,
            next_request_id: 1,
            server_task,
        }
    }
}

impl TestClient {
    fn make_nonce(&self) -> ByteString {
        let policy = self.channel.security_policy();
        if policy == SecurityPolicy::None {
            ByteString::null()
        } else {
            uasc_crypto::random::byte_string(policy.secure_channel_nonce_length())
        }
    }

    fn open_request(
        &self,
        request_type: SecurityTokenRequestType,
        mode: MessageSecurityMode,
        requested_lifetime: u32,
    ) -> (RequestMessage, ByteString) {
        let client_nonce = self.make_nonce();
        let message = RequestMessage::from(OpenSecureChannelRequest {
            request_header: RequestHeader::new(DateTime::now(), self.next_request_id),
            client_protocol_version: 0,
            request_type,
            security_mode: mode,
            client_nonce: client_nonce.clone(),
            requested_lifetime,
        });
        (message, client_nonce)
    }

    async fn send_message(&mut self, message: &RequestMessage, max_chunk_size: usize) {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let chunks = Chunker::encode(
            self.sequence_number,
            request_id,
            0,
            max_chunk_size,
            &self.channel,
            message,
        )
        .unwrap();
        self.sequence_number += chunks.len() as u32;
        self.send_chunks(&chunks).await;
    }

    async fn send_chunks(&mut self, chunks: &[MessageChunk]) {
        for chunk in chunks {
            let mut dst = vec![0u8; 64 * 1024];
            let size = self.channel.apply_security(chunk, &mut dst).unwrap();
            self.write.write_all(&dst[..size]).await.unwrap();
        }
        self.write.flush().await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.write.write_all(bytes).await.unwrap();
        self.write.flush().await.unwrap();
    }

    /// Issue or renew, expecting a successful response.
    async fn open_secure_channel(
        &mut self,
        request_type: SecurityTokenRequestType,
        mode: MessageSecurityMode,
        requested_lifetime: u32,
    ) -> (OpenSecureChannelResponse, ByteString) {
        let (message, client_nonce) = self.open_request(request_type, mode, requested_lifetime);
        self.send_message(&message, 0).await;
        let response = self.recv_open_response().await;
        (response, client_nonce)
    }

    async fn recv_open_response(&mut self) -> OpenSecureChannelResponse {
        let chunk = self
            .read
            .next()
            .await
            .expect("transport closed instead of responding")
            .expect("response chunk failed to frame");
        let plain = self.channel.verify_and_remove_security(&chunk.data).unwrap();
        let decoded = Chunker::decode(&[plain], &self.channel, &self.codecs).unwrap();
        match decoded {
            ResponseMessage::OpenSecureChannel(response) => *response,
            other => panic!("Expected an OpenSecureChannelResponse, got {:?}", other),
        }
    }

    /// The server must close the transport without sending anything further.
    async fn expect_closed(mut self) -> StatusCode {
        loop {
            match self.read.next().await {
                None => break,
                Some(Err(_)) => break,
                Some(Ok(chunk)) => panic!("Expected transport close, got chunk {:?}", chunk),
            }
        }
        self.server_task.await.unwrap()
    }
}

fn abort_chunk() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"OPN");
    bytes.push(b'A');
    bytes.extend_from_slice(&(MESSAGE_CHUNK_HEADER_SIZE as u32).to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes
}

#[tokio::test]
async fn fresh_issue_policy_none() {
    let harness = harness(ServerConfig::default());
    let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);

    let (response, _) = client
        .open_secure_channel(
            SecurityTokenRequestType::Issue,
            MessageSecurityMode::None,
            300_000,
        )
        .await;

    assert_ne!(response.security_token.channel_id, 0);
    assert_eq!(response.security_token.token_id, 1);
    assert_eq!(response.security_token.revised_lifetime, 300_000);
    assert!(response.server_nonce.is_null_or_empty());
    assert!(response.response_header.service_result.is_good());

    // The symmetric handler is now front-most in the pipeline
    assert_eq!(harness.installs.load(Ordering::SeqCst), 1);
    assert!(harness
        .server
        .registry()
        .get(response.security_token.channel_id)
        .is_some());
}

#[tokio::test]
async fn fresh_issue_basic256_sha256_sign_and_encrypt() {
    let harness = harness(ServerConfig::default());
    let mut client = harness.connect(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );

    let (response, client_nonce) = client
        .open_secure_channel(
            SecurityTokenRequestType::Issue,
            MessageSecurityMode::SignAndEncrypt,
            300_000,
        )
        .await;

    assert_eq!(response.server_nonce.as_ref().len(), 32);

    // The server derived its keys from the two nonces per the policy
    let channel = harness
        .server
        .registry()
        .get(response.security_token.channel_id)
        .unwrap();
    let channel = channel.lock();
    let security = channel.security().unwrap();
    assert!(security.previous().is_none());
    let secrets = security.current().local_secrets().unwrap();
    assert_eq!(secrets.signing_key.len(), 32);
    assert_eq!(secrets.encryption_key.value().len(), 32);
    assert_eq!(secrets.initialization_vector.len(), 16);

    let (expected_signing, expected_encryption, expected_iv) = SecurityPolicy::Basic256Sha256
        .make_secure_channel_keys(client_nonce.as_ref(), response.server_nonce.as_ref())
        .unwrap();
    assert_eq!(secrets.signing_key, expected_signing);
    assert_eq!(secrets.encryption_key.value(), expected_encryption.value());
    assert_eq!(secrets.initialization_vector, expected_iv);

    let remote = security.current().remote_secrets().unwrap();
    assert_eq!(remote.signing_key.len(), 32);
    assert_eq!(remote.encryption_key.value().len(), 32);
    assert_eq!(remote.initialization_vector.len(), 16);
}

#[tokio::test]
async fn renewal_on_same_transport() {
    let harness = harness(ServerConfig::default());
    let mut client = harness.connect(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );

    let (issued, _) = client
        .open_secure_channel(
            SecurityTokenRequestType::Issue,
            MessageSecurityMode::SignAndEncrypt,
            300_000,
        )
        .await;
    let channel_id = issued.security_token.channel_id;
    client.channel.set_secure_channel_id(channel_id);

    let transport_before = {
        let channel = harness.server.registry().get(channel_id).unwrap();
        let id = channel.lock().transport_id();
        id.unwrap()
    };

    let (renewed, _) = client
        .open_secure_channel(
            SecurityTokenRequestType::Renew,
            MessageSecurityMode::SignAndEncrypt,
            300_000,
        )
        .await;

    assert_eq!(renewed.security_token.channel_id, channel_id);
    assert_eq!(
        renewed.security_token.token_id,
        issued.security_token.token_id + 1
    );
    assert_ne!(renewed.server_nonce, issued.server_nonce);

    let channel = harness.server.registry().get(channel_id).unwrap();
    let channel = channel.lock();
    // The superseded epoch stays available for in-flight messages
    let security = channel.security().unwrap();
    assert_eq!(
        security.current().token.token_id,
        renewed.security_token.token_id
    );
    let previous = security.previous().unwrap();
    assert_eq!(previous.token.token_id, issued.security_token.token_id);
    assert!(previous.token.token_id < security.current().token.token_id);
    // Bound transport unchanged, symmetric handler not reinstalled
    assert_eq!(channel.transport_id(), Some(transport_before));
    assert_eq!(harness.installs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn renewal_with_mode_change_is_rejected() {
    let harness = harness(ServerConfig::default());
    let mut client = harness.connect(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );

    let (issued, _) = client
        .open_secure_channel(
            SecurityTokenRequestType::Issue,
            MessageSecurityMode::SignAndEncrypt,
            300_000,
        )
        .await;
    client
        .channel
        .set_secure_channel_id(issued.security_token.channel_id);

    // Same certificate, same transport, but the mode changed
    let (message, _) = client.open_request(
        SecurityTokenRequestType::Renew,
        MessageSecurityMode::Sign,
        300_000,
    );
    client.send_message(&message, 0).await;

    let status = client.expect_closed().await;
    assert_eq!(status, StatusCode::BadSecurityChecksFailed);
}

#[tokio::test]
async fn renewal_from_wrong_transport_is_rejected() {
    let harness = harness(ServerConfig::default());
    let mut client = harness.connect(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );

    let (issued, _) = client
        .open_secure_channel(
            SecurityTokenRequestType::Issue,
            MessageSecurityMode::SignAndEncrypt,
            300_000,
        )
        .await;
    let channel_id = issued.security_token.channel_id;

    // A second connection tries to renew the first connection's channel
    let mut intruder = harness.connect(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );
    intruder.channel.set_secure_channel_id(channel_id);
    let (message, _) = intruder.open_request(
        SecurityTokenRequestType::Renew,
        MessageSecurityMode::SignAndEncrypt,
        300_000,
    );
    intruder.send_message(&message, 0).await;

    let status = intruder.expect_closed().await;
    assert_eq!(status, StatusCode::BadSecurityChecksFailed);

    // The original channel remains live
    assert!(harness.server.registry().get(channel_id).is_some());
}

#[tokio::test]
async fn lifetime_expiry_closes_the_channel() {
    let config = ServerConfig {
        secure_channel_lifetime_ms: 200,
        min_secure_channel_lifetime_ms: 50,
        ..Default::default()
    };
    let harness = harness(config);
    let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);

    let (issued, _) = client
        .open_secure_channel(
            SecurityTokenRequestType::Issue,
            MessageSecurityMode::None,
            100,
        )
        .await;
    let channel_id = issued.security_token.channel_id;
    assert_eq!(issued.security_token.revised_lifetime, 100);

    // Wait beyond the revised lifetime without renewing
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(harness.server.registry().get(channel_id).is_none());

    // A message referencing the expired channel is rejected
    client.channel.set_secure_channel_id(channel_id);
    let (message, _) = client.open_request(
        SecurityTokenRequestType::Renew,
        MessageSecurityMode::None,
        100,
    );
    client.send_message(&message, 0).await;
    let status = client.expect_closed().await;
    assert_eq!(status, StatusCode::BadTcpSecureChannelUnknown);
}

#[tokio::test]
async fn multi_chunk_open_succeeds_and_reversed_order_fails() {
    let harness = harness(ServerConfig::default());
    let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);

    // A large client nonce forces the request across two chunks, C then F
    let message = RequestMessage::from(OpenSecureChannelRequest {
        request_header: RequestHeader::new(DateTime::now(), 1),
        client_protocol_version: 0,
        request_type: SecurityTokenRequestType::Issue,
        security_mode: MessageSecurityMode::None,
        client_nonce: ByteString::from(vec![0xABu8; 9_000]),
        requested_lifetime: 300_000,
    });
    let chunks = Chunker::encode(1, 1, 0, 8_196, &client.channel, &message).unwrap();
    assert_eq!(chunks.len(), 2);
    client.sequence_number += chunks.len() as u32;
    client.next_request_id += 1;
    client.send_chunks(&chunks).await;
    let response = client.recv_open_response().await;
    assert!(response.response_header.service_result.is_good());

    // Reversing the chunk order must fail and close the transport
    let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);
    let mut chunks = Chunker::encode(1, 1, 0, 8_196, &client.channel, &message).unwrap();
    chunks.reverse();
    client.send_chunks(&chunks).await;
    let status = client.expect_closed().await;
    assert!(status.is_bad());
}

#[tokio::test]
async fn abort_discards_pending_chunks() {
    let harness = harness(ServerConfig::default());
    let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);

    // Send the intermediate chunk of a two-chunk message, abort, then a fresh request
    let message = RequestMessage::from(OpenSecureChannelRequest {
        request_header: RequestHeader::new(DateTime::now(), 1),
        client_protocol_version: 0,
        request_type: SecurityTokenRequestType::Issue,
        security_mode: MessageSecurityMode::None,
        client_nonce: ByteString::from(vec![0xABu8; 9_000]),
        requested_lifetime: 300_000,
    });
    let chunks = Chunker::encode(1, 1, 0, 8_196, &client.channel, &message).unwrap();
    assert!(chunks.len() > 1);
    client.send_chunks(&chunks[..1]).await;
    client.send_raw(&abort_chunk()).await;

    // The next final chunk starts a fresh message with a fresh header
    let (response, _) = client
        .open_secure_channel(
            SecurityTokenRequestType::Issue,
            MessageSecurityMode::None,
            300_000,
        )
        .await;
    assert!(response.response_header.service_result.is_good());
}

#[tokio::test]
async fn chunk_count_limit_is_enforced() {
    let config = ServerConfig {
        max_chunk_count: 2,
        ..Default::default()
    };
    let harness = harness(config);

    let message = RequestMessage::from(OpenSecureChannelRequest {
        request_header: RequestHeader::new(DateTime::now(), 1),
        client_protocol_version: 0,
        request_type: SecurityTokenRequestType::Issue,
        security_mode: MessageSecurityMode::None,
        client_nonce: ByteString::from(vec![0xABu8; 9_000]),
        requested_lifetime: 300_000,
    });

    // Exactly max_chunk_count chunks succeeds
    let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);
    let chunks = Chunker::encode(1, 1, 0, 8_196, &client.channel, &message).unwrap();
    assert_eq!(chunks.len(), 2);
    client.sequence_number += chunks.len() as u32;
    client.next_request_id += 1;
    client.send_chunks(&chunks).await;
    let response = client.recv_open_response().await;
    assert!(response.response_header.service_result.is_good());

    // One chunk more fails with BadTcpMessageTooLarge
    let message = RequestMessage::from(OpenSecureChannelRequest {
        request_header: RequestHeader::new(DateTime::now(), 1),
        client_protocol_version: 0,
        request_type: SecurityTokenRequestType::Issue,
        security_mode: MessageSecurityMode::None,
        client_nonce: ByteString::from(vec![0xABu8; 17_000]),
        requested_lifetime: 300_000,
    });
    let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);
    let chunks = Chunker::encode(1, 1, 0, 8_196, &client.channel, &message).unwrap();
    assert!(chunks.len() > 2);
    client.send_chunks(&chunks).await;
    let status = client.expect_closed().await;
    assert_eq!(status, StatusCode::BadTcpMessageTooLarge);
}

#[tokio::test]
async fn message_before_handshake_is_rejected() {
    let harness = harness(ServerConfig::default());
    let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);

    // A MSG chunk with no channel established
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"MSG");
    bytes.push(b'F');
    bytes.extend_from_slice(&((MESSAGE_CHUNK_HEADER_SIZE + 12) as u32).to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 12]);
    client.send_raw(&bytes).await;

    let status = client.expect_closed().await;
    assert_eq!(status, StatusCode::BadTcpMessageTypeInvalid);
}

#[tokio::test]
async fn unknown_message_type_closes_the_transport() {
    let harness = harness(ServerConfig::default());
    let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);

    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"XYZ");
    bytes.push(b'F');
    bytes.extend_from_slice(&(MESSAGE_CHUNK_HEADER_SIZE as u32).to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    client.send_raw(&bytes).await;

    let status = client.expect_closed().await;
    assert_eq!(status, StatusCode::BadTcpMessageTypeInvalid);
}

#[tokio::test]
async fn close_secure_channel_is_terminal_and_silent() {
    let harness = harness(ServerConfig::default());
    let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);

    let (issued, _) = client
        .open_secure_channel(
            SecurityTokenRequestType::Issue,
            MessageSecurityMode::None,
            300_000,
        )
        .await;
    let channel_id = issued.security_token.channel_id;
    client.channel.set_secure_channel_id(channel_id);

    let message = RequestMessage::from(CloseSecureChannelRequest {
        request_header: RequestHeader::new(DateTime::now(), 2),
    });
    client.send_message(&message, 0).await;

    // No response, a clean close, and the channel is gone
    let status = client.expect_closed().await;
    assert_eq!(status, StatusCode::Good);
    assert!(harness.server.registry().get(channel_id).is_none());
}

#[tokio::test]
async fn transport_close_releases_the_channel() {
    let harness = harness(ServerConfig::default());
    let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);

    let (issued, _) = client
        .open_secure_channel(
            SecurityTokenRequestType::Issue,
            MessageSecurityMode::None,
            300_000,
        )
        .await;
    let channel_id = issued.security_token.channel_id;
    assert!(harness.server.registry().get(channel_id).is_some());

    // Dropping the client ends the stream; the server releases everything
    let server_task = client.server_task;
    drop(client.read);
    drop(client.write);
    let status = server_task.await.unwrap();
    assert_eq!(status, StatusCode::BadConnectionClosed);
    assert!(harness.server.registry().get(channel_id).is_none());
}

#[tokio::test]
async fn token_ids_are_unique_across_channels() {
    let harness = harness(ServerConfig::default());
    let mut seen = Vec::new();
    for _ in 0..3 {
        let mut client = harness.connect(SecurityPolicy::None, MessageSecurityMode::None);
        let (response, _) = client
            .open_secure_channel(
                SecurityTokenRequestType::Issue,
                MessageSecurityMode::None,
                300_000,
            )
            .await;
        let token_id = response.security_token.token_id;
        assert!(!seen.contains(&token_id));
        seen.push(token_id);
    }
}
