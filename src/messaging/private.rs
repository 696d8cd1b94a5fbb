use picky_asn1::wrapper::{
    ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3, ExplicitContextTag4,
    ExplicitContextTag5, IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::constants::key_usages::KRB_PRIV_ENC_PART;
use picky_krb::data_types::EncryptedData;

use super::{
    check_addresses, check_header, check_message_tag, check_replay, check_replay_requirements, check_sequence,
    generate_addresses, generate_replay_fields, return_replay_data, store_sent_replay, with_seq_rollback, ReplayData,
    ReplayFields,
};
use crate::address::Address;
use crate::auth_context::AuthContext;
use crate::crypto::{decrypt, encrypt, replay_tag_from_ciphertext};
use crate::messages::{
    EncKrbPrivPart, EncKrbPrivPartInner, KrbPriv, KrbPrivInner, KRB_PRIV_FIRST_BYTE, KRB_PRIV_MSG_TYPE,
};
use crate::utils::encode_integer;
use crate::{Error, ErrorKind, Result, KERBEROS_VERSION};

/// Builds a KRB-PRIV message carrying `user_data`.
///
/// When the context has a cipher state, it advances only once the message is built.
///
/// [KRB_PRIV Exchange](https://www.rfc-editor.org/rfc/rfc4120#section-3.5)
#[instrument(level = "debug", skip_all)]
pub fn mk_priv(
    auth_context: &mut AuthContext,
    user_data: &[u8],
    mut replay_data: Option<&mut ReplayData>,
) -> Result<Vec<u8>> {
    check_replay_requirements(auth_context, replay_data.is_some())?;

    with_seq_rollback(auth_context, |auth_context| {
        let key = auth_context
            .send_key()
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::NoKey, "the context has no key to protect KRB-PRIV"))?;

        let fields = generate_replay_fields(auth_context, replay_data.as_deref_mut());
        let (local, remote) = generate_addresses(auth_context, true)?;
        let local = local.ok_or_else(|| Error::new(ErrorKind::LocalAddrRequired, "the context has no local address"))?;
        let timestamp = fields.encoded_timestamp()?;

        let enc_part = EncKrbPrivPart::from(EncKrbPrivPartInner {
            user_data: ExplicitContextTag0::from(OctetStringAsn1::from(user_data.to_vec())),
            timestamp: Optional::from(timestamp.as_ref().map(|(time, _)| ExplicitContextTag1::from(time.clone()))),
            usec: Optional::from(timestamp.map(|(_, usec)| ExplicitContextTag2::from(usec))),
            seq_number: Optional::from(fields.encoded_seq().map(ExplicitContextTag3::from)),
            s_address: ExplicitContextTag4::from(local.to_host_address()),
            r_address: Optional::from(remote.map(|remote| ExplicitContextTag5::from(remote.to_host_address()))),
        });
        let encoded_enc_part = picky_asn1_der::to_vec(&enc_part)?;

        let mut cipher_state = auth_context.ivector().cloned();
        let cipher = encrypt(&key, KRB_PRIV_ENC_PART, cipher_state.as_mut(), &encoded_enc_part)?;

        trace!(plain = ?encoded_enc_part, encrypted = ?cipher, "KRB-PRIV encrypted part");

        let tag = replay_tag_from_ciphertext(key.enctype, &cipher)?;

        let krb_priv = KrbPriv::from(KrbPrivInner {
            pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
            msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![KRB_PRIV_MSG_TYPE])),
            enc_part: ExplicitContextTag3::from(EncryptedData {
                etype: ExplicitContextTag0::from(encode_integer(i64::from(key.enctype))),
                kvno: Optional::from(None),
                cipher: ExplicitContextTag2::from(OctetStringAsn1::from(cipher)),
            }),
        });

        let encoded = picky_asn1_der::to_vec(&krb_priv)?;
        store_sent_replay(auth_context, &fields, tag)?;

        if cipher_state.is_some() {
            auth_context.set_ivector(cipher_state);
        }

        Ok(encoded)
    })
}

/// Parses a KRB-PRIV message and returns its decrypted user data.
#[instrument(level = "debug", skip_all)]
pub fn rd_priv(
    auth_context: &mut AuthContext,
    input: &[u8],
    mut replay_data: Option<&mut ReplayData>,
) -> Result<Vec<u8>> {
    check_message_tag(input, KRB_PRIV_FIRST_BYTE, "KRB-PRIV")?;
    check_replay_requirements(auth_context, replay_data.is_some())?;

    let key = auth_context
        .recv_key()
        .cloned()
        .ok_or_else(|| Error::new(ErrorKind::NoKey, "the context has no key to decrypt KRB-PRIV"))?;

    let krb_priv: KrbPriv = picky_asn1_der::from_bytes(input)?;
    let KrbPrivInner {
        pvno,
        msg_type,
        enc_part,
    } = krb_priv.0;
    check_header(&pvno.0, &msg_type.0, KRB_PRIV_MSG_TYPE)?;

    // The cipher state only advances for an accepted message.
    let mut cipher_state = auth_context.ivector().cloned();
    let cipher = enc_part.0.cipher.0 .0;
    let encoded_enc_part = decrypt(&key, KRB_PRIV_ENC_PART, cipher_state.as_mut(), &cipher)?;
    let enc_part: EncKrbPrivPart = picky_asn1_der::from_bytes(&encoded_enc_part)?;
    let enc_part = enc_part.0;

    let sender = Address::from_host_address(&enc_part.s_address.0)?;
    let receiver = enc_part
        .r_address
        .0
        .as_ref()
        .map(|address| Address::from_host_address(&address.0))
        .transpose()?;
    check_addresses(auth_context, Some(&sender), receiver.as_ref())?;

    let fields = ReplayFields::from_message(
        enc_part.timestamp.0.as_ref().map(|timestamp| &timestamp.0),
        enc_part.usec.0.as_ref().map(|usec| &usec.0),
        enc_part.seq_number.0.as_ref().map(|seq| &seq.0),
    )?;

    check_replay(auth_context, &fields, replay_tag_from_ciphertext(key.enctype, &cipher)?)?;
    check_sequence(auth_context, &fields)?;
    return_replay_data(auth_context, &fields, replay_data.as_deref_mut());

    if cipher_state.is_some() {
        auth_context.set_ivector(cipher_state);
    }

    Ok(enc_part.user_data.0 .0)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use super::*;
    use crate::crypto::KeyBlock;
    use crate::flags::AuthContextFlags;
    use crate::replay::{ReplayCache, ReplayRecord};

    fn context(local: [u8; 4], remote: [u8; 4]) -> AuthContext {
        let mut auth_context = AuthContext::new();
        auth_context.set_flags(AuthContextFlags::DO_SEQUENCE);
        auth_context.set_key(Some(KeyBlock::new(17, vec![0x17; 16])));
        auth_context.set_addrs(
            Some(Address::from(Ipv4Addr::from(local))),
            Some(Address::from(Ipv4Addr::from(remote))),
        );

        auth_context
    }

    #[test]
    fn chained_cipher_state_round_trip() {
        let mut sender = context([10, 0, 0, 1], [10, 0, 0, 2]);
        let mut receiver = context([10, 0, 0, 2], [10, 0, 0, 1]);
        sender.init_ivector().unwrap();
        receiver.init_ivector().unwrap();

        let payloads: [&[u8]; 3] = [b"first", b"second", b"third"];
        for payload in payloads {
            let message = mk_priv(&mut sender, payload, None).unwrap();
            assert_eq!(message[0], KRB_PRIV_FIRST_BYTE);

            assert_eq!(rd_priv(&mut receiver, &message, None).unwrap(), payload);
        }

        assert_eq!(sender.ivector(), receiver.ivector());
        assert_eq!(receiver.remote_seq_number(), 3);
    }

    #[test]
    fn missing_local_address_rolls_back_sequence() {
        let mut sender = context([10, 0, 0, 1], [10, 0, 0, 2]);
        sender.set_addrs(None, None);
        sender.set_local_seq_number(7);

        let err = mk_priv(&mut sender, b"data", None).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LocalAddrRequired);
        assert_eq!(sender.local_seq_number(), 7);
    }

    #[test]
    fn rejected_message_keeps_cipher_state() {
        let mut sender = context([10, 0, 0, 1], [10, 0, 0, 2]);
        let mut receiver = context([10, 0, 0, 2], [10, 0, 0, 1]);
        sender.init_ivector().unwrap();
        receiver.init_ivector().unwrap();

        let first = mk_priv(&mut sender, b"first", None).unwrap();
        let second = mk_priv(&mut sender, b"second", None).unwrap();
        let initial = receiver.ivector().cloned();

        // Decrypts fine but arrives out of order.
        let err = rd_priv(&mut receiver, &second, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadOrder);
        assert_eq!(receiver.ivector().cloned(), initial);

        assert_eq!(rd_priv(&mut receiver, &first, None).unwrap(), b"first");
        assert_ne!(receiver.ivector().cloned(), initial);
    }

    #[derive(Debug)]
    struct FullReplayCache;

    impl ReplayCache for FullReplayCache {
        fn store(&self, _: &ReplayRecord) -> Result<()> {
            Err(Error::new(ErrorKind::ReplayDetected, "message was already received"))
        }

        fn expunge(&self, _: i64) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_mk_priv_keeps_cipher_state() {
        let mut sender = context([10, 0, 0, 1], [10, 0, 0, 2]);
        sender.set_flags(AuthContextFlags::DO_TIME | AuthContextFlags::DO_SEQUENCE);
        sender.set_rcache(Some(Arc::new(FullReplayCache)));
        sender.init_ivector().unwrap();
        let initial = sender.ivector().cloned();

        // Fails after the encryption, when the sent message is recorded.
        let err = mk_priv(&mut sender, b"data", None).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ReplayDetected);
        assert_eq!(sender.ivector().cloned(), initial);
        assert_eq!(sender.local_seq_number(), 0);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let mut sender = context([10, 0, 0, 1], [10, 0, 0, 2]);
        let mut receiver = context([10, 0, 0, 2], [10, 0, 0, 1]);
        receiver.set_key(Some(KeyBlock::new(17, vec![0x18; 16])));

        let message = mk_priv(&mut sender, b"data", None).unwrap();

        assert_eq!(
            rd_priv(&mut receiver, &message, None).unwrap_err().kind(),
            ErrorKind::DecryptFailure
        );
    }

    #[test]
    fn ret_sequence_reports_numbers() {
        let mut sender = context([10, 0, 0, 1], [10, 0, 0, 2]);
        let mut receiver = context([10, 0, 0, 2], [10, 0, 0, 1]);
        sender.set_flags(AuthContextFlags::DO_SEQUENCE | AuthContextFlags::RET_SEQUENCE);
        receiver.set_flags(AuthContextFlags::DO_SEQUENCE | AuthContextFlags::RET_SEQUENCE);
        sender.set_local_seq_number(0x1234);
        receiver.set_remote_seq_number(0x1234);

        let mut sent = ReplayData::default();
        let message = mk_priv(&mut sender, b"data", Some(&mut sent)).unwrap();
        let mut received = ReplayData::default();
        rd_priv(&mut receiver, &message, Some(&mut received)).unwrap();

        assert_eq!(sent.seq, 0x1234);
        assert_eq!(received.seq, 0x1234);
        assert_eq!(
            rd_priv(&mut receiver, &message, None).unwrap_err().kind(),
            ErrorKind::RcRequired
        );
    }
}
