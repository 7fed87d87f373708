// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

use std::sync::{Arc, OnceLock};

use uasc_crypto::{CertificateStore, SecurityPolicy};
use uasc_types::{
    ByteString, ChannelSecurityToken, CloseSecureChannelRequest, DateTime, DecodingOptions,
    MessageSecurityMode, OpenSecureChannelRequest, RequestHeader, SecurityTokenRequestType,
    StatusCode,
};

use crate::{
    comms::{
        chunker::Chunker,
        secure_channel::{Role, SecureChannel},
    },
    messages::{CodecRegistry, RequestMessage},
};

// Key generation is slow, so the client and server stores are shared across tests.
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

fn open_request(policy: SecurityPolicy, mode: MessageSecurityMode) -> RequestMessage {
    let nonce = if policy == SecurityPolicy::None {
        ByteString::null()
    } else {
        uasc_crypto::random::byte_string(policy.secure_channel_nonce_length())
    };
    RequestMessage::from(OpenSecureChannelRequest {
        request_header: RequestHeader::new(DateTime::now(), 77),
        client_protocol_version: 0,
        request_type: SecurityTokenRequestType::Issue,
        security_mode: mode,
        client_nonce: nonce,
        requested_lifetime: 300_000,
    })
}

/// A connected pair of channels with certificates exchanged and, for secured policies,
/// nonces swapped so both sides can derive the same keys.
fn channel_pair(
    policy: SecurityPolicy,
    mode: MessageSecurityMode,
) -> (SecureChannel, SecureChannel) {
    let mut client = SecureChannel::new(Role::Client, client_store(), DecodingOptions::test());
    let mut server = SecureChannel::new(Role::Server, server_store(), DecodingOptions::test());
    client.set_security_policy(policy);
    client.set_security_mode(mode);
    client.set_secure_channel_id(1);
    server.set_security_mode(mode);
    server.set_secure_channel_id(1);
    if policy != SecurityPolicy::None {
        client.set_remote_cert(Some(server_store().own_cert().clone()));
        server.set_remote_cert(Some(client_store().own_cert().clone()));
    }
    (client, server)
}

fn exchange_nonces_and_issue(
    client: &mut SecureChannel,
    server: &mut SecureChannel,
    token_id: u32,
) {
    server.set_security_policy(client.security_policy());
    client.create_random_nonce();
    server.set_remote_nonce(client.local_nonce());
    server.create_random_nonce();
    client.set_remote_nonce(server.local_nonce());
    let token = ChannelSecurityToken {
        channel_id: 1,
        token_id,
        created_at: DateTime::now(),
        revised_lifetime: 300_000,
    };
    if token_id == 1 {
        client.issue_token(token).unwrap();
        server.issue_token(token).unwrap();
    } else {
        client.renew_token(token).unwrap();
        server.renew_token(token).unwrap();
    }
}

/// Encode a message on `from`, apply security, then remove security on `to` and decode it back.
fn round_trip(
    from: &SecureChannel,
    to: &mut SecureChannel,
    message: RequestMessage,
    sequence_number: u32,
) -> RequestMessage {
    let chunks = Chunker::encode(sequence_number, 1, 0, 0, from, &message).unwrap();
    assert_eq!(chunks.len(), 1);

    let mut wire = vec![0u8; 8192];
    let size = from.apply_security(&chunks[0], &mut wire).unwrap();

    let plain_chunk = to.verify_and_remove_security(&wire[..size]).unwrap();
    Chunker::validate_chunks(sequence_number, to, std::slice::from_ref(&plain_chunk)).unwrap();
    Chunker::decode(
        &[plain_chunk],
        to,
        &CodecRegistry::<RequestMessage>::server_handshake(),
    )
    .unwrap()
}

#[test]
fn open_secure_channel_plain_round_trip() {
    let (client, mut server) = channel_pair(SecurityPolicy::None, MessageSecurityMode::None);
    let message = open_request(SecurityPolicy::None, MessageSecurityMode::None);
    let decoded = round_trip(&client, &mut server, message.clone(), 1);
    assert_eq!(decoded, message);
}

#[test]
fn open_secure_channel_encrypted_round_trip() {
    for policy in [
        SecurityPolicy::Basic128Rsa15,
        SecurityPolicy::Basic256,
        SecurityPolicy::Basic256Sha256,
        SecurityPolicy::Aes128Sha256RsaOaep,
        SecurityPolicy::Aes256Sha256RsaPss,
    ] {
        let (client, mut server) =
            channel_pair(policy, MessageSecurityMode::SignAndEncrypt);
        let message = open_request(policy, MessageSecurityMode::SignAndEncrypt);
        let decoded = round_trip(&client, &mut server, message.clone(), 1);
        assert_eq!(decoded, message, "policy {policy}");
        // Removing security resolves the policy from the security header
        assert_eq!(server.security_policy(), policy);
    }
}

#[test]
fn tampered_open_secure_channel_fails() {
    let (client, mut server) = channel_pair(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );
    let message = open_request(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );
    let chunks = Chunker::encode(1, 1, 0, 0, &client, &message).unwrap();
    let mut wire = vec![0u8; 8192];
    let size = client.apply_security(&chunks[0], &mut wire).unwrap();

    // Flip a bit inside the encrypted body
    wire[size - 10] ^= 0x1;
    let err = server.verify_and_remove_security(&wire[..size]).unwrap_err();
    assert_eq!(err.status(), StatusCode::BadSecurityChecksFailed);
}

#[test]
fn symmetric_round_trip() {
    let (mut client, mut server) = channel_pair(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );
    exchange_nonces_and_issue(&mut client, &mut server, 1);

    let message = RequestMessage::from(CloseSecureChannelRequest {
        request_header: RequestHeader::dummy(),
    });
    let decoded = round_trip(&client, &mut server, message.clone(), 1);
    assert_eq!(decoded, message);
}

#[test]
fn symmetric_sign_only_round_trip() {
    let (mut client, mut server) =
        channel_pair(SecurityPolicy::Basic256Sha256, MessageSecurityMode::Sign);
    exchange_nonces_and_issue(&mut client, &mut server, 1);

    let message = RequestMessage::from(CloseSecureChannelRequest {
        request_header: RequestHeader::dummy(),
    });
    let decoded = round_trip(&client, &mut server, message.clone(), 1);
    assert_eq!(decoded, message);
}

#[test]
fn renewal_keeps_previous_epoch_until_activation() {
    let (mut client, mut server) = channel_pair(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );
    exchange_nonces_and_issue(&mut client, &mut server, 1);

    // Secure a message under token 1, then renew before delivering it
    let message = RequestMessage::from(CloseSecureChannelRequest {
        request_header: RequestHeader::dummy(),
    });
    let chunks = Chunker::encode(1, 1, 0, 0, &client, &message).unwrap();
    let mut wire = vec![0u8; 8192];
    let size = client.apply_security(&chunks[0], &mut wire).unwrap();

    exchange_nonces_and_issue(&mut client, &mut server, 2);
    {
        let security = server.security().unwrap();
        assert_eq!(security.current().token.token_id, 2);
        assert_eq!(security.previous().unwrap().token.token_id, 1);
    }

    // The in-flight message still decrypts under the superseded epoch
    let plain_chunk = server.verify_and_remove_security(&wire[..size]).unwrap();
    let decoded = Chunker::decode(
        &[plain_chunk],
        &server,
        &CodecRegistry::<RequestMessage>::server_handshake(),
    )
    .unwrap();
    assert_eq!(decoded, message);
    // An old-token message does not activate the new token
    assert!(server.security().unwrap().previous().is_some());

    // The first message under the new token ends the overlap window
    let chunks = Chunker::encode(2, 2, 0, 0, &client, &message).unwrap();
    let size = client.apply_security(&chunks[0], &mut wire).unwrap();
    server.verify_and_remove_security(&wire[..size]).unwrap();
    assert!(server.security().unwrap().previous().is_none());
}

#[test]
fn unknown_token_rejected() {
    let (mut client, mut server) = channel_pair(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );
    exchange_nonces_and_issue(&mut client, &mut server, 1);

    // Secure a message under token 1, then renew twice without any traffic so that
    // token 1's epoch is pushed out entirely
    let message = RequestMessage::from(CloseSecureChannelRequest {
        request_header: RequestHeader::dummy(),
    });
    let chunks = Chunker::encode(1, 1, 0, 0, &client, &message).unwrap();
    let mut wire = vec![0u8; 8192];
    let size = client.apply_security(&chunks[0], &mut wire).unwrap();

    exchange_nonces_and_issue(&mut client, &mut server, 2);
    exchange_nonces_and_issue(&mut client, &mut server, 3);
    {
        let security = server.security().unwrap();
        assert_eq!(security.current().token.token_id, 3);
        assert_eq!(security.previous().unwrap().token.token_id, 2);
        assert!(security.epoch_for_token(1).is_none());
    }

    // Token 1's keys are gone, so a message secured under it is rejected
    let err = server.verify_and_remove_security(&wire[..size]).unwrap_err();
    assert_eq!(err.status(), StatusCode::BadSecureChannelTokenUnknown);
}

#[test]
fn multi_chunk_message_round_trip() {
    let (client, mut server) = channel_pair(SecurityPolicy::None, MessageSecurityMode::None);
    // A nonce far larger than the chunk size forces the message to split
    let message = RequestMessage::from(OpenSecureChannelRequest {
        request_header: RequestHeader::new(DateTime::now(), 77),
        client_protocol_version: 0,
        request_type: SecurityTokenRequestType::Issue,
        security_mode: MessageSecurityMode::None,
        client_nonce: ByteString::from(vec![0xABu8; 20000]),
        requested_lifetime: 300_000,
    });
    let chunks = Chunker::encode(1, 1, 0, 8196, &client, &message).unwrap();
    assert!(chunks.len() > 1);

    let mut plain_chunks = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let mut wire = vec![0u8; 2 * 8196];
        let size = client.apply_security(chunk, &mut wire).unwrap();
        plain_chunks.push(server.verify_and_remove_security(&wire[..size]).unwrap());
    }
    let last = Chunker::validate_chunks(1, &server, &plain_chunks).unwrap();
    assert_eq!(last, chunks.len() as u32);

    let decoded = Chunker::decode(
        &plain_chunks,
        &server,
        &CodecRegistry::<RequestMessage>::server_handshake(),
    )
    .unwrap();
    assert_eq!(decoded, message);
}

#[test]
fn out_of_order_chunks_rejected() {
    let (client, server) = channel_pair(SecurityPolicy::None, MessageSecurityMode::None);
    let message = RequestMessage::from(OpenSecureChannelRequest {
        request_header: RequestHeader::new(DateTime::now(), 77),
        client_protocol_version: 0,
        request_type: SecurityTokenRequestType::Issue,
        security_mode: MessageSecurityMode::None,
        client_nonce: ByteString::from(vec![0xABu8; 20000]),
        requested_lifetime: 300_000,
    });
    let mut chunks = Chunker::encode(1, 1, 0, 8196, &client, &message).unwrap();
    assert!(chunks.len() > 1);
    // Final chunk first is invalid
    chunks.reverse();
    assert!(Chunker::validate_chunks(1, &server, &chunks).is_err());
}

#[test]
fn missing_certificate_store_rejected() {
    let (client, _server) = channel_pair(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );
    let message = open_request(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );
    let chunks = Chunker::encode(1, 1, 0, 0, &client, &message).unwrap();
    let mut wire = vec![0u8; 8192];
    let size = client.apply_security(&chunks[0], &mut wire).unwrap();

    // A channel with no key pairs at all cannot resolve the receiver thumbprint
    let mut bare = SecureChannel::new_no_certificate_store();
    let err = bare.verify_and_remove_security(&wire[..size]).unwrap_err();
    assert_eq!(err.status(), StatusCode::BadSecurityChecksFailed);
}

#[test]
fn nonce_length_is_validated() {
    let (_, mut server) = channel_pair(
        SecurityPolicy::Basic256Sha256,
        MessageSecurityMode::SignAndEncrypt,
    );
    server.set_security_policy(SecurityPolicy::Basic256Sha256);
    let err = server
        .set_remote_nonce_from_byte_string(&ByteString::from(vec![1u8; 16]))
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BadNonceInvalid);
    server
        .set_remote_nonce_from_byte_string(&ByteString::from(vec![1u8; 32]))
        .unwrap();
}
