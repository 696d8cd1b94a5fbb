use picky_asn1::wrapper::{
    ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3, ExplicitContextTag4,
    ExplicitContextTag5, IntegerAsn1, OctetStringAsn1, Optional,
};

use super::{
    check_addresses, check_header, check_message_tag, check_replay, check_replay_requirements, check_sequence,
    generate_addresses, generate_replay_fields, return_replay_data, store_sent_replay, with_seq_rollback, ReplayData,
    ReplayFields,
};
use crate::address::Address;
use crate::auth_context::AuthContext;
use crate::credentials::ChecksumData;
use crate::crypto::{
    is_collision_proof_checksum_type, is_keyed_checksum_type, is_valid_checksum_type, key_usages::KRB_SAFE_CKSUM,
    keyed_checksum_types, make_checksum, mandatory_checksum_type, verify_checksum, KeyBlock,
};
use crate::messages::{KrbSafe, KrbSafeBody, KrbSafeInner, KRB_SAFE_FIRST_BYTE, KRB_SAFE_MSG_TYPE};
use crate::{Error, ErrorKind, Result, KERBEROS_VERSION};

/// Checksum type for KRB-SAFE: the context preference when it suits the key, else the mandatory one.
fn safe_checksum_type(auth_context: &AuthContext, key: &KeyBlock) -> Result<i32> {
    let preferred = auth_context.safe_cksumtype();
    if preferred != 0 && keyed_checksum_types(key.enctype).contains(&preferred) {
        return Ok(preferred);
    }

    mandatory_checksum_type(key.enctype)
}

fn encode_krb_safe(body: KrbSafeBody, checksum: &ChecksumData) -> Result<Vec<u8>> {
    let krb_safe = KrbSafe::from(KrbSafeInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![KRB_SAFE_MSG_TYPE])),
        safe_body: ExplicitContextTag2::from(body),
        cksum: ExplicitContextTag3::from(checksum.to_checksum()),
    });

    Ok(picky_asn1_der::to_vec(&krb_safe)?)
}

/// The checksum covers the whole message with an empty checksum of type 0 in place.
fn zero_checksum() -> ChecksumData {
    ChecksumData {
        cksumtype: 0,
        contents: Vec::new(),
    }
}

/// Builds a KRB-SAFE message carrying `user_data`.
///
/// [KRB_SAFE Exchange](https://www.rfc-editor.org/rfc/rfc4120#section-3.4)
#[instrument(level = "debug", skip_all)]
pub fn mk_safe(
    auth_context: &mut AuthContext,
    user_data: &[u8],
    mut replay_data: Option<&mut ReplayData>,
) -> Result<Vec<u8>> {
    check_replay_requirements(auth_context, replay_data.is_some())?;

    with_seq_rollback(auth_context, |auth_context| {
        let key = auth_context
            .send_key()
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::NoKey, "the context has no key to protect KRB-SAFE"))?;
        let cksumtype = safe_checksum_type(auth_context, &key)?;

        let fields = generate_replay_fields(auth_context, replay_data.as_deref_mut());
        let (local, remote) = generate_addresses(auth_context, true)?;
        let local = local.ok_or_else(|| Error::new(ErrorKind::LocalAddrRequired, "the context has no local address"))?;
        let timestamp = fields.encoded_timestamp()?;

        let body = KrbSafeBody {
            user_data: ExplicitContextTag0::from(OctetStringAsn1::from(user_data.to_vec())),
            timestamp: Optional::from(timestamp.as_ref().map(|(time, _)| ExplicitContextTag1::from(time.clone()))),
            usec: Optional::from(timestamp.map(|(_, usec)| ExplicitContextTag2::from(usec))),
            seq_number: Optional::from(fields.encoded_seq().map(ExplicitContextTag3::from)),
            s_address: ExplicitContextTag4::from(local.to_host_address()),
            r_address: Optional::from(remote.map(|remote| ExplicitContextTag5::from(remote.to_host_address()))),
        };

        let unsigned = encode_krb_safe(body.clone(), &zero_checksum())?;
        let checksum = ChecksumData {
            cksumtype,
            contents: make_checksum(cksumtype, Some(&key), KRB_SAFE_CKSUM, &unsigned)?,
        };
        let encoded = encode_krb_safe(body, &checksum)?;

        store_sent_replay(auth_context, &fields, checksum.contents)?;

        trace!(?encoded, "KRB-SAFE message");

        Ok(encoded)
    })
}

/// Verifies the checksum over the re-zeroed message, then over the body alone.
///
/// Strict RFC 1510 senders checksum only the KRB-SAFE-BODY.
fn verify_safe_checksum(key: &KeyBlock, checksum: &ChecksumData, message: &[u8], body: &[u8]) -> Result<bool> {
    if verify_checksum(checksum.cksumtype, Some(key), KRB_SAFE_CKSUM, message, &checksum.contents)? {
        return Ok(true);
    }

    debug!("KRB-SAFE checksum does not cover the whole message, trying the body alone");

    verify_checksum(checksum.cksumtype, Some(key), KRB_SAFE_CKSUM, body, &checksum.contents)
}

/// Parses a KRB-SAFE message and returns its user data.
#[instrument(level = "debug", skip_all)]
pub fn rd_safe(
    auth_context: &mut AuthContext,
    input: &[u8],
    mut replay_data: Option<&mut ReplayData>,
) -> Result<Vec<u8>> {
    check_message_tag(input, KRB_SAFE_FIRST_BYTE, "KRB-SAFE")?;
    check_replay_requirements(auth_context, replay_data.is_some())?;

    let key = auth_context
        .recv_key()
        .cloned()
        .ok_or_else(|| Error::new(ErrorKind::NoKey, "the context has no key to verify KRB-SAFE"))?;

    let krb_safe: KrbSafe = picky_asn1_der::from_bytes(input)?;
    let KrbSafeInner {
        pvno,
        msg_type,
        safe_body,
        cksum,
    } = krb_safe.0;
    check_header(&pvno.0, &msg_type.0, KRB_SAFE_MSG_TYPE)?;

    let checksum = ChecksumData::from_checksum(&cksum.0)?;
    if !is_valid_checksum_type(checksum.cksumtype) {
        return Err(Error::new(
            ErrorKind::UnsupportedChecksumType,
            format!("unsupported checksum type: {}", checksum.cksumtype),
        ));
    }
    if !is_collision_proof_checksum_type(checksum.cksumtype) || !is_keyed_checksum_type(checksum.cksumtype) {
        warn!(cksumtype = checksum.cksumtype, "KRB-SAFE checksum is not keyed and collision-proof");

        return Err(Error::new(
            ErrorKind::InappropriateChecksum,
            format!("checksum type {} is not keyed and collision-proof", checksum.cksumtype),
        ));
    }

    let body = safe_body.0;
    let sender = Address::from_host_address(&body.s_address.0)?;
    let receiver = body
        .r_address
        .0
        .as_ref()
        .map(|address| Address::from_host_address(&address.0))
        .transpose()?;
    check_addresses(auth_context, Some(&sender), receiver.as_ref())?;

    let message = encode_krb_safe(body.clone(), &zero_checksum())?;
    let encoded_body = picky_asn1_der::to_vec(&body)?;
    if !verify_safe_checksum(&key, &checksum, &message, &encoded_body)? {
        warn!("KRB-SAFE checksum verification failed");

        return Err(Error::new(ErrorKind::Modified, "KRB-SAFE checksum verification failed"));
    }

    let fields = ReplayFields::from_message(
        body.timestamp.0.as_ref().map(|timestamp| &timestamp.0),
        body.usec.0.as_ref().map(|usec| &usec.0),
        body.seq_number.0.as_ref().map(|seq| &seq.0),
    )?;

    check_replay(auth_context, &fields, checksum.contents)?;
    check_sequence(auth_context, &fields)?;
    return_replay_data(auth_context, &fields, replay_data.as_deref_mut());

    Ok(body.user_data.0 .0)
}
