use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag10, ExplicitContextTag2,
    ExplicitContextTag3, ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag7,
    ExplicitContextTag8, ExplicitContextTag9, IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::data_types::{EncryptedData, KerberosTime, Ticket};

use super::{
    check_header, check_message_tag, check_replay, check_replay_requirements, check_timestamp, generate_addresses,
    generate_replay_fields, return_replay_data, with_seq_rollback, ReplayData, ReplayFields,
};
use crate::auth_context::AuthContext;
use crate::credentials::{addresses_from_host_addresses, host_addresses_from_addresses, Credentials, Principal, TicketTimes};
use crate::crypto::{decrypt, encrypt, key_usages::KRB_CRED_ENC_PART, replay_tag_from_ciphertext, KeyBlock, ENCTYPE_NULL};
use crate::flags::{AuthContextFlags, TicketFlags};
use crate::messages::{
    EncKrbCredPart, EncKrbCredPartInner, KrbCred, KrbCredInfo, KrbCredInner, KRB_CRED_FIRST_BYTE, KRB_CRED_MSG_TYPE,
};
use crate::utils::{
    decode_i32, encode_integer, flags_from_bit_string, kerberos_flags, kerberos_time, secs_from_kerberos_time,
};
use crate::{Error, ErrorKind, Result, KERBEROS_VERSION};

fn krb_cred_info(credentials: &Credentials) -> Result<KrbCredInfo> {
    let times = &credentials.times;

    Ok(KrbCredInfo {
        key: ExplicitContextTag0::from(credentials.keyblock.to_encryption_key()),
        prealm: Optional::from(Some(ExplicitContextTag1::from(credentials.client.to_realm()?))),
        pname: Optional::from(Some(ExplicitContextTag2::from(credentials.client.to_principal_name()?))),
        flags: Optional::from(Some(ExplicitContextTag3::from(kerberos_flags(
            credentials.ticket_flags.bits(),
        )))),
        auth_time: Optional::from(Some(ExplicitContextTag4::from(kerberos_time(times.auth_time)?))),
        start_time: Optional::from(
            times
                .start_time
                .map(|start_time| kerberos_time(start_time).map(ExplicitContextTag5::from))
                .transpose()?,
        ),
        end_time: Optional::from(Some(ExplicitContextTag6::from(kerberos_time(times.end_time)?))),
        renew_till: Optional::from(
            times
                .renew_till
                .map(|renew_till| kerberos_time(renew_till).map(ExplicitContextTag7::from))
                .transpose()?,
        ),
        srealm: Optional::from(Some(ExplicitContextTag8::from(credentials.server.to_realm()?))),
        sname: Optional::from(Some(ExplicitContextTag9::from(credentials.server.to_principal_name()?))),
        caddr: Optional::from(if credentials.addresses.is_empty() {
            None
        } else {
            Some(ExplicitContextTag10::from(host_addresses_from_addresses(
                &credentials.addresses,
            )))
        }),
    })
}

/// Builds a KRB-CRED message forwarding `credentials`.
///
/// The encrypted part is protected with the send subkey or the session key. Without any key it
/// goes out in the clear with etype 0.
///
/// [KRB_CRED Exchange](https://www.rfc-editor.org/rfc/rfc4120#section-3.6)
#[instrument(level = "debug", skip_all, fields(count = credentials.len()))]
pub fn mk_cred(
    auth_context: &mut AuthContext,
    credentials: &[Credentials],
    mut replay_data: Option<&mut ReplayData>,
) -> Result<Vec<u8>> {
    if credentials.is_empty() {
        return Err(Error::new(ErrorKind::InvalidParameter, "no credentials to forward"));
    }

    if auth_context
        .flags()
        .intersects(AuthContextFlags::RET_TIME | AuthContextFlags::RET_SEQUENCE)
        && replay_data.is_none()
    {
        return Err(Error::new(
            ErrorKind::RcRequired,
            "RET_TIME or RET_SEQUENCE is set but no replay data output is supplied",
        ));
    }

    let tickets = credentials
        .iter()
        .map(Credentials::decode_ticket)
        .collect::<Result<Vec<Ticket>>>()?;
    let ticket_info = credentials.iter().map(krb_cred_info).collect::<Result<Vec<_>>>()?;

    with_seq_rollback(auth_context, |auth_context| {
        let key = auth_context.send_key().cloned();

        let fields = generate_replay_fields(auth_context, replay_data.as_deref_mut());
        let (local, remote) = generate_addresses(auth_context, false)?;
        let timestamp = fields.encoded_timestamp()?;

        let enc_part = EncKrbCredPart::from(EncKrbCredPartInner {
            ticket_info: ExplicitContextTag0::from(Asn1SequenceOf::from(ticket_info)),
            nonce: Optional::from(fields.encoded_seq().map(ExplicitContextTag1::from)),
            timestamp: Optional::from(timestamp.as_ref().map(|(time, _)| ExplicitContextTag2::from(time.clone()))),
            usec: Optional::from(timestamp.map(|(_, usec)| ExplicitContextTag3::from(usec))),
            s_address: Optional::from(local.map(|local| ExplicitContextTag4::from(local.to_host_address()))),
            r_address: Optional::from(remote.map(|remote| ExplicitContextTag5::from(remote.to_host_address()))),
        });
        let encoded_enc_part = picky_asn1_der::to_vec(&enc_part)?;

        let (etype, cipher) = match &key {
            Some(key) => (
                key.enctype,
                encrypt(key, KRB_CRED_ENC_PART, None, &encoded_enc_part)?,
            ),
            None => {
                debug!("No key in the context, sending KRB-CRED unencrypted");

                (ENCTYPE_NULL, encoded_enc_part)
            }
        };

        let krb_cred = KrbCred::from(KrbCredInner {
            pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
            msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![KRB_CRED_MSG_TYPE])),
            tickets: ExplicitContextTag2::from(Asn1SequenceOf::from(tickets)),
            enc_part: ExplicitContextTag3::from(EncryptedData {
                etype: ExplicitContextTag0::from(encode_integer(i64::from(etype))),
                kvno: Optional::from(None),
                cipher: ExplicitContextTag2::from(OctetStringAsn1::from(cipher)),
            }),
        });

        Ok(picky_asn1_der::to_vec(&krb_cred)?)
    })
}

/// Builds a KRB-CRED message forwarding a single credential.
pub fn mk_1cred(
    auth_context: &mut AuthContext,
    credentials: &Credentials,
    replay_data: Option<&mut ReplayData>,
) -> Result<Vec<u8>> {
    mk_cred(auth_context, std::slice::from_ref(credentials), replay_data)
}

/// Decrypts the KRB-CRED encrypted part with the receive subkey, falling back to the session key.
///
/// Returns the plaintext and the key that opened it. No key at all means the part is not encrypted.
fn decrypt_cred_part<'a>(
    recv_subkey: Option<&'a KeyBlock>,
    session_key: Option<&'a KeyBlock>,
    cipher: &[u8],
) -> Result<(Vec<u8>, Option<&'a KeyBlock>)> {
    if let Some(subkey) = recv_subkey {
        match decrypt(subkey, KRB_CRED_ENC_PART, None, cipher) {
            Ok(plaintext) => return Ok((plaintext, Some(subkey))),
            Err(err) if session_key.is_none() => return Err(err),
            Err(err) => debug!(%err, "KRB-CRED subkey decryption failed, trying the session key"),
        }
    }

    match session_key {
        Some(key) => Ok((decrypt(key, KRB_CRED_ENC_PART, None, cipher)?, Some(key))),
        None => Ok((cipher.to_vec(), None)),
    }
}

fn optional_time(time: Option<&KerberosTime>) -> Result<Option<i64>> {
    time.map(secs_from_kerberos_time).transpose()
}

fn credentials_from_info(ticket: &Ticket, info: &KrbCredInfo) -> Result<Credentials> {
    let client = match (info.pname.0.as_ref(), info.prealm.0.as_ref()) {
        (Some(pname), Some(prealm)) => Principal::from_principal_name(&pname.0, &prealm.0)?,
        _ => Principal::default(),
    };
    let server = match (info.sname.0.as_ref(), info.srealm.0.as_ref()) {
        (Some(sname), Some(srealm)) => Principal::from_principal_name(&sname.0, &srealm.0)?,
        _ => Principal::from_principal_name(&ticket.0.sname.0, &ticket.0.realm.0)?,
    };

    Ok(Credentials {
        client,
        server,
        keyblock: KeyBlock::from_encryption_key(&info.key.0)?,
        times: TicketTimes {
            auth_time: optional_time(info.auth_time.0.as_ref().map(|time| &time.0))?.unwrap_or_default(),
            start_time: optional_time(info.start_time.0.as_ref().map(|time| &time.0))?,
            end_time: optional_time(info.end_time.0.as_ref().map(|time| &time.0))?.unwrap_or_default(),
            renew_till: optional_time(info.renew_till.0.as_ref().map(|time| &time.0))?,
        },
        ticket_flags: info
            .flags
            .0
            .as_ref()
            .map(|flags| TicketFlags::from_bits_retain(flags_from_bit_string(&flags.0 .0)))
            .unwrap_or_else(TicketFlags::empty),
        addresses: info
            .caddr
            .0
            .as_ref()
            .map(|caddr| addresses_from_host_addresses(&caddr.0))
            .transpose()?
            .unwrap_or_default(),
        ticket: picky_asn1_der::to_vec(ticket)?,
    })
}

/// Parses a KRB-CRED message and returns the forwarded credentials.
#[instrument(level = "debug", skip_all)]
pub fn rd_cred(
    auth_context: &mut AuthContext,
    input: &[u8],
    mut replay_data: Option<&mut ReplayData>,
) -> Result<Vec<Credentials>> {
    check_message_tag(input, KRB_CRED_FIRST_BYTE, "KRB-CRED")?;
    check_replay_requirements(auth_context, replay_data.is_some())?;

    let krb_cred: KrbCred = picky_asn1_der::from_bytes(input)?;
    let KrbCredInner {
        pvno,
        msg_type,
        tickets,
        enc_part,
    } = krb_cred.0;
    check_header(&pvno.0, &msg_type.0, KRB_CRED_MSG_TYPE)?;

    let etype = decode_i32(&enc_part.0.etype.0)?;
    let cipher = enc_part.0.cipher.0 .0;

    let (encoded_enc_part, key) = decrypt_cred_part(auth_context.recv_subkey(), auth_context.key(), &cipher)?;
    let key = key.cloned();
    if key.is_none() && etype != ENCTYPE_NULL {
        return Err(Error::new(
            ErrorKind::NoKey,
            format!("KRB-CRED is encrypted with etype {} but the context has no key", etype),
        ));
    }

    let enc_part: EncKrbCredPart = picky_asn1_der::from_bytes(&encoded_enc_part)?;
    let enc_part = enc_part.0;

    let tickets = tickets.0 .0;
    let ticket_info = enc_part.ticket_info.0 .0;
    if tickets.len() != ticket_info.len() {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!(
                "KRB-CRED carries {} tickets but {} ticket infos",
                tickets.len(),
                ticket_info.len()
            ),
        ));
    }

    let fields = ReplayFields::from_message(
        enc_part.timestamp.0.as_ref().map(|timestamp| &timestamp.0),
        enc_part.usec.0.as_ref().map(|usec| &usec.0),
        enc_part.nonce.0.as_ref().map(|nonce| &nonce.0),
    )?;

    // Decoded before any replay or sequence state is touched.
    let credentials = tickets
        .iter()
        .zip(ticket_info.iter())
        .map(|(ticket, info)| credentials_from_info(ticket, info))
        .collect::<Result<Vec<_>>>()?;

    match &key {
        Some(key) => check_replay(auth_context, &fields, replay_tag_from_ciphertext(key.enctype, &cipher)?)?,
        None => check_timestamp(auth_context, &fields)?,
    }

    if auth_context.flags().contains(AuthContextFlags::DO_SEQUENCE) {
        let expected = auth_context.remote_seq_number();
        let received = fields.seq.unwrap_or_default();
        if fields.seq != Some(expected) {
            warn!(expected, received, "KRB-CRED nonce does not match the remote sequence number");

            return Err(Error::new(
                ErrorKind::BadOrder,
                format!("unexpected KRB-CRED nonce: expected {} but got {}", expected, received),
            ));
        }
        auth_context.set_remote_seq_number(expected.wrapping_add(1));
    }

    return_replay_data(auth_context, &fields, replay_data.as_deref_mut());

    Ok(credentials)
}
