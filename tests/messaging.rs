mod common;

use common::{init_tracing, issue_ticket, keyed_context, TicketParams};
use krb5_messaging::crypto::key_usages::KRB_SAFE_CKSUM;
use krb5_messaging::crypto::{make_checksum, ENCTYPE_AES256_CTS_HMAC_SHA1_96};
use krb5_messaging::messages::KrbSafe;
use krb5_messaging::{
    mk_1cred, mk_cred, mk_priv, mk_safe, rd_cred, rd_priv, rd_safe, AuthContext, AuthContextFlags, ErrorKind,
    KeyBlock, ReplayData, SequenceFlags,
};
use picky_asn1::wrapper::{ExplicitContextTag1, OctetStringAsn1};

const CLIENT_ADDR: [u8; 4] = [10, 0, 0, 1];
const SERVER_ADDR: [u8; 4] = [10, 0, 0, 2];

fn session_key() -> KeyBlock {
    KeyBlock::random(ENCTYPE_AES256_CTS_HMAC_SHA1_96).unwrap()
}

fn context_pair(flags: AuthContextFlags) -> (AuthContext, AuthContext) {
    let key = session_key();

    (
        keyed_context(&key, flags, CLIENT_ADDR, SERVER_ADDR),
        keyed_context(&key, flags, SERVER_ADDR, CLIENT_ADDR),
    )
}

#[test]
fn safe_message_is_accepted_once() {
    init_tracing();

    let (mut client, mut server) = context_pair(AuthContextFlags::DO_TIME | AuthContextFlags::DO_SEQUENCE);

    let message = mk_safe(&mut client, b"hello", None).unwrap();
    assert_eq!(client.local_seq_number(), 1);

    assert_eq!(rd_safe(&mut server, &message, None).unwrap(), b"hello");
    assert_eq!(server.remote_seq_number(), 1);

    let err = rd_safe(&mut server, &message, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReplayDetected);
}

#[test]
fn tampered_safe_message_is_rejected() {
    let (mut client, mut server) = context_pair(AuthContextFlags::DO_SEQUENCE);

    let message = mk_safe(&mut client, b"transfer 10", None).unwrap();

    let mut krb_safe: KrbSafe = picky_asn1_der::from_bytes(&message).unwrap();
    krb_safe.0.safe_body.0.user_data.0 = OctetStringAsn1::from(b"transfer 99".to_vec());
    let tampered = picky_asn1_der::to_vec(&krb_safe).unwrap();

    let err = rd_safe(&mut server, &tampered, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Modified);
    assert_eq!(server.remote_seq_number(), 0);
}

#[test]
fn safe_checksum_over_body_only_is_accepted() {
    let key = session_key();
    let mut client = keyed_context(&key, AuthContextFlags::DO_SEQUENCE, CLIENT_ADDR, SERVER_ADDR);
    let mut server = keyed_context(&key, AuthContextFlags::DO_SEQUENCE, SERVER_ADDR, CLIENT_ADDR);

    let message = mk_safe(&mut client, b"legacy peer", None).unwrap();

    // Older senders checksum only the KRB-SAFE-BODY.
    let mut krb_safe: KrbSafe = picky_asn1_der::from_bytes(&message).unwrap();
    let body = picky_asn1_der::to_vec(&krb_safe.0.safe_body.0).unwrap();
    let cksumtype = i32::from(krb_safe.0.cksum.0.cksumtype.0 .0[0]);
    let checksum = make_checksum(cksumtype, Some(&key), KRB_SAFE_CKSUM, &body).unwrap();
    krb_safe.0.cksum.0.checksum = ExplicitContextTag1::from(OctetStringAsn1::from(checksum));
    let legacy = picky_asn1_der::to_vec(&krb_safe).unwrap();

    assert_eq!(rd_safe(&mut server, &legacy, None).unwrap(), b"legacy peer");
}

#[test]
fn private_messages_keep_order_and_cipher_state() {
    let (mut client, mut server) = context_pair(AuthContextFlags::DO_TIME | AuthContextFlags::DO_SEQUENCE);
    server.set_flags(server.flags() | AuthContextFlags::RET_SEQUENCE | AuthContextFlags::RET_TIME);
    client.init_ivector().unwrap();
    server.init_ivector().unwrap();

    for (expected_seq, data) in [b"first".as_slice(), b"second", b"third"].into_iter().enumerate() {
        let message = mk_priv(&mut client, data, None).unwrap();

        let mut replay_data = ReplayData::default();
        let received = rd_priv(&mut server, &message, Some(&mut replay_data)).unwrap();

        assert_eq!(received, data);
        assert_eq!(replay_data.seq, expected_seq as u32);
        assert_ne!(replay_data.timestamp, 0);
    }

    assert_eq!(client.ivector(), server.ivector());
}

#[test]
fn out_of_order_message_is_rejected_until_the_gap_is_filled() {
    let (mut client, mut server) = context_pair(AuthContextFlags::DO_SEQUENCE);

    let first = mk_priv(&mut client, b"first", None).unwrap();
    let second = mk_priv(&mut client, b"second", None).unwrap();

    let err = rd_priv(&mut server, &second, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadOrder);
    assert_eq!(server.remote_seq_number(), 0);

    assert_eq!(rd_priv(&mut server, &first, None).unwrap(), b"first");
    assert_eq!(rd_priv(&mut server, &second, None).unwrap(), b"second");
}

#[test]
fn message_from_unexpected_sender_is_rejected() {
    let key = session_key();
    let mut client = keyed_context(&key, AuthContextFlags::DO_SEQUENCE, CLIENT_ADDR, SERVER_ADDR);
    let mut server = keyed_context(&key, AuthContextFlags::DO_SEQUENCE, SERVER_ADDR, [10, 0, 0, 3]);

    let message = mk_safe(&mut client, b"hello", None).unwrap();

    let err = rd_safe(&mut server, &message, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadAddress);
}

#[test]
fn private_message_is_accepted_once() {
    let (mut client, mut server) = context_pair(AuthContextFlags::DO_TIME);

    let message = mk_priv(&mut client, b"once", None).unwrap();
    assert_eq!(rd_priv(&mut server, &message, None).unwrap(), b"once");

    let err = rd_priv(&mut server, &message, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReplayDetected);
}

#[test]
fn message_for_another_receiver_is_rejected() {
    let key = session_key();
    let mut client = keyed_context(&key, AuthContextFlags::DO_SEQUENCE, CLIENT_ADDR, [10, 0, 0, 5]);
    let mut server = keyed_context(&key, AuthContextFlags::DO_SEQUENCE, SERVER_ADDR, CLIENT_ADDR);

    let message = mk_priv(&mut client, b"hello", None).unwrap();

    let err = rd_priv(&mut server, &message, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadAddress);
    assert_eq!(server.remote_seq_number(), 0);
}

#[test]
fn heimdal_sequence_numbers_are_recognized() {
    let (mut client, mut server) = context_pair(AuthContextFlags::DO_SEQUENCE);

    // A first number an old Heimdal peer may send while zero is still expected.
    client.set_local_seq_number(0x100);
    let message = mk_priv(&mut client, b"first", None).unwrap();

    assert_eq!(rd_priv(&mut server, &message, None).unwrap(), b"first");
    assert!(server.seq_flags().contains(SequenceFlags::HEIMDAL_SEQ));
    assert_eq!(server.remote_seq_number(), 0x101);

    // 0x80 encoded as a negative INTEGER.
    client.set_local_seq_number(0xffff_ff80);
    server.set_remote_seq_number(0x80);
    let message = mk_safe(&mut client, b"second", None).unwrap();

    assert_eq!(rd_safe(&mut server, &message, None).unwrap(), b"second");
    assert_eq!(server.remote_seq_number(), 0x81);
}

#[test]
fn replay_protection_needs_a_cache_and_an_output() {
    let key = session_key();

    let mut without_cache = AuthContext::new();
    without_cache.set_key(Some(key.clone()));
    without_cache.set_addrs(Some(common::ipv4(CLIENT_ADDR)), None);
    assert!(without_cache.flags().contains(AuthContextFlags::DO_TIME));

    let err = mk_safe(&mut without_cache, b"hello", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RcRequired);

    let mut without_output = keyed_context(&key, AuthContextFlags::RET_SEQUENCE, CLIENT_ADDR, SERVER_ADDR);
    let err = mk_priv(&mut without_output, b"hello", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RcRequired);
    assert_eq!(without_output.local_seq_number(), 0);
}

#[test]
fn forwarded_credentials_without_key() {
    let issued = issue_ticket(TicketParams::default());

    let mut sender = AuthContext::new();
    sender.set_flags(AuthContextFlags::empty());
    let mut receiver = AuthContext::new();
    receiver.set_flags(AuthContextFlags::empty());

    let message = mk_1cred(&mut sender, &issued.credentials, None).unwrap();
    let received = rd_cred(&mut receiver, &message, None).unwrap();

    assert_eq!(received, vec![issued.credentials]);
}

#[test]
fn forwarded_credentials_with_session_key() {
    let first = issue_ticket(TicketParams::default());
    let second = issue_ticket(TicketParams::default());
    let credentials = vec![first.credentials, second.credentials];

    let flags = AuthContextFlags::DO_TIME | AuthContextFlags::DO_SEQUENCE;
    let (mut sender, mut receiver) = context_pair(flags);
    receiver.set_flags(flags | AuthContextFlags::RET_SEQUENCE);

    let message = mk_cred(&mut sender, &credentials, None).unwrap();

    let mut replay_data = ReplayData::default();
    let received = rd_cred(&mut receiver, &message, Some(&mut replay_data)).unwrap();

    assert_eq!(received, credentials);
    assert_eq!(replay_data.seq, 0);
    assert_eq!(receiver.remote_seq_number(), 1);

    let err = rd_cred(&mut receiver, &message, Some(&mut replay_data)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReplayDetected);
}
