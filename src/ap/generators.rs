use picky_asn1::bit_string::BitString;
use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3,
    ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag7, ExplicitContextTag8,
    IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::constants::key_usages::{AP_REP_ENC, AP_REQ_AUTHENTICATOR};
use picky_krb::constants::types::{AP_REP_MSG_TYPE, AP_REQ_MSG_TYPE};
use picky_krb::data_types::{
    ApOptions as ApOptionsAsn1, Authenticator, AuthenticatorInner, EncApRepPart, EncApRepPartInner, EncryptedData,
    Ticket,
};
use picky_krb::messages::{ApRep, ApRepInner, ApReq, ApReqInner};

use crate::credentials::{authorization_data_from_entries, AuthDataEntry, ChecksumData, Principal};
use crate::crypto::{encrypt, KeyBlock};
use crate::flags::ApOptions;
use crate::messages::{EtypeList, AD_ETYPE_NEGOTIATION, AD_IF_RELEVANT};
use crate::utils::{encode_integer, encode_seq_number, kerberos_time};
use crate::{Result, KERBEROS_VERSION};

/// Input parameters for generating an AP-REQ authenticator.
#[derive(Debug)]
pub(super) struct GenerateAuthenticatorOptions<'a> {
    pub client: &'a Principal,
    pub checksum: Option<&'a ChecksumData>,
    pub ctime: i64,
    pub cusec: u32,
    pub subkey: Option<&'a KeyBlock>,
    pub seq_number: Option<u32>,
    pub authorization_data: &'a [AuthDataEntry],
}

#[instrument(level = "trace", skip_all)]
pub(super) fn generate_authenticator(options: GenerateAuthenticatorOptions<'_>) -> Result<Authenticator> {
    let GenerateAuthenticatorOptions {
        client,
        checksum,
        ctime,
        cusec,
        subkey,
        seq_number,
        authorization_data,
    } = options;

    Ok(Authenticator::from(AuthenticatorInner {
        authenticator_vno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        crealm: ExplicitContextTag1::from(client.to_realm()?),
        cname: ExplicitContextTag2::from(client.to_principal_name()?),
        cksum: Optional::from(checksum.map(|checksum| ExplicitContextTag3::from(checksum.to_checksum()))),
        cusec: ExplicitContextTag4::from(encode_integer(i64::from(cusec))),
        ctime: ExplicitContextTag5::from(kerberos_time(ctime)?),
        subkey: Optional::from(subkey.map(|subkey| ExplicitContextTag6::from(subkey.to_encryption_key()))),
        seq_number: Optional::from(seq_number.map(|seq_number| ExplicitContextTag7::from(encode_seq_number(seq_number)))),
        authorization_data: Optional::from(if authorization_data.is_empty() {
            None
        } else {
            Some(ExplicitContextTag8::from(authorization_data_from_entries(
                authorization_data,
            )))
        }),
    }))
}

/// Builds the `AD-IF-RELEVANT` wrapped `ETYPE-NEGOTIATION` element.
///
/// The list holds the permitted enctypes preferred over the session key enctype.
/// Returns `None` when the session key already uses the top preference.
///
/// [RFC 4537](https://www.rfc-editor.org/rfc/rfc4537#section-3)
pub(super) fn generate_etype_negotiation(permitted_etypes: &[i32], session_etype: i32) -> Result<Option<AuthDataEntry>> {
    let preferred = permitted_etypes
        .iter()
        .take_while(|etype| **etype != session_etype)
        .map(|etype| encode_integer(i64::from(*etype)))
        .collect::<Vec<_>>();

    if preferred.is_empty() {
        return Ok(None);
    }

    let etype_list: EtypeList = Asn1SequenceOf::from(preferred);
    let etype_negotiation = AuthDataEntry::new(AD_ETYPE_NEGOTIATION as i32, picky_asn1_der::to_vec(&etype_list)?);
    let if_relevant = authorization_data_from_entries(&[etype_negotiation]);

    Ok(Some(AuthDataEntry::new(
        AD_IF_RELEVANT as i32,
        picky_asn1_der::to_vec(&if_relevant)?,
    )))
}

#[instrument(level = "trace", skip_all)]
pub(super) fn generate_ap_req(
    ticket: Ticket,
    session_key: &KeyBlock,
    authenticator: &Authenticator,
    options: ApOptions,
) -> Result<ApReq> {
    let encoded_authenticator = picky_asn1_der::to_vec(authenticator)?;
    let encrypted_authenticator = encrypt(session_key, AP_REQ_AUTHENTICATOR, None, &encoded_authenticator)?;

    trace!(
        plain = ?encoded_authenticator,
        encrypted = ?encrypted_authenticator,
        "AP_REQ authenticator",
    );

    Ok(ApReq::from(ApReqInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![AP_REQ_MSG_TYPE])),
        ap_options: ExplicitContextTag2::from(ApOptionsAsn1::from(BitString::with_bytes(
            options.wire_bits().to_be_bytes().to_vec(),
        ))),
        ticket: ExplicitContextTag3::from(ticket),
        authenticator: ExplicitContextTag4::from(EncryptedData {
            etype: ExplicitContextTag0::from(encode_integer(i64::from(session_key.enctype))),
            kvno: Optional::from(None),
            cipher: ExplicitContextTag2::from(OctetStringAsn1::from(encrypted_authenticator)),
        }),
    }))
}

/// Content of the encrypted part of an AP-REP.
#[derive(Debug)]
pub(super) struct GenerateApRepOptions<'a> {
    pub ctime: i64,
    pub cusec: u32,
    pub subkey: Option<&'a KeyBlock>,
    pub seq_number: Option<u32>,
}

#[instrument(level = "trace", skip_all)]
pub(super) fn generate_ap_rep(session_key: &KeyBlock, options: GenerateApRepOptions<'_>) -> Result<ApRep> {
    let GenerateApRepOptions {
        ctime,
        cusec,
        subkey,
        seq_number,
    } = options;

    let enc_ap_rep_part = EncApRepPart::from(EncApRepPartInner {
        ctime: ExplicitContextTag0::from(kerberos_time(ctime)?),
        cusec: ExplicitContextTag1::from(encode_integer(i64::from(cusec))),
        subkey: Optional::from(subkey.map(|subkey| ExplicitContextTag2::from(subkey.to_encryption_key()))),
        seq_number: Optional::from(seq_number.map(|seq_number| ExplicitContextTag3::from(encode_seq_number(seq_number)))),
    });

    let encoded_enc_ap_rep_part = picky_asn1_der::to_vec(&enc_ap_rep_part)?;
    let encrypted_enc_ap_rep_part = encrypt(session_key, AP_REP_ENC, None, &encoded_enc_ap_rep_part)?;

    trace!(
        plain = ?encoded_enc_ap_rep_part,
        encrypted = ?encrypted_enc_ap_rep_part,
        "AP_REP encrypted part",
    );

    Ok(ApRep::from(ApRepInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![AP_REP_MSG_TYPE])),
        enc_part: ExplicitContextTag2::from(EncryptedData {
            etype: ExplicitContextTag0::from(encode_integer(i64::from(session_key.enctype))),
            kvno: Optional::from(None),
            cipher: ExplicitContextTag2::from(OctetStringAsn1::from(encrypted_enc_ap_rep_part)),
        }),
    }))
}
