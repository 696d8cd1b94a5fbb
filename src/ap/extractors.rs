use picky_krb::constants::key_usages::{AP_REP_ENC, AP_REQ_AUTHENTICATOR, TICKET_REP};
use picky_krb::data_types::{Authenticator, AuthorizationData, EncApRepPart, EncTicketPart};
use picky_krb::messages::{ApRep, ApReq};

use crate::credentials::{entries_from_authorization_data, ApReplyInfo, AuthDataEntry, TicketTimes};
use crate::crypto::{decrypt, KeyBlock};
use crate::flags::TicketFlags;
use crate::messages::{EtypeList, AD_ETYPE_NEGOTIATION, AD_IF_RELEVANT};
use crate::utils::{decode_i32, decode_microseconds, decode_seq_number, secs_from_kerberos_time};
use crate::{Error, ErrorKind, Result};

/// Decrypts the [ApReq] ticket and returns decoded encrypted part of the ticket.
pub(super) fn decrypt_ap_req_ticket(key: &KeyBlock, ap_req: &ApReq) -> Result<EncTicketPart> {
    let ticket_enc_part = &ap_req.0.ticket.0 .0.enc_part.0;

    let encoded_enc_part = decrypt(key, TICKET_REP, None, &ticket_enc_part.cipher.0 .0)?;

    Ok(picky_asn1_der::from_bytes(&encoded_enc_part)?)
}

/// Decrypts [ApReq] Authenticator and returns decoded authenticator.
pub(super) fn decrypt_ap_req_authenticator(session_key: &KeyBlock, ap_req: &ApReq) -> Result<Authenticator> {
    let encrypted_authenticator = &ap_req.0.authenticator.0;

    let encoded_authenticator = decrypt(
        session_key,
        AP_REQ_AUTHENTICATOR,
        None,
        &encrypted_authenticator.cipher.0 .0,
    )?;

    Ok(picky_asn1_der::from_bytes(&encoded_authenticator)?)
}

/// Decrypts the [ApRep] encrypted part.
pub(super) fn decrypt_ap_rep_part(session_key: &KeyBlock, ap_rep: &ApRep) -> Result<ApReplyInfo> {
    let encoded_enc_part = decrypt(session_key, AP_REP_ENC, None, &ap_rep.0.enc_part.0.cipher.0 .0)?;
    let enc_part: EncApRepPart = picky_asn1_der::from_bytes(&encoded_enc_part)?;
    let enc_part = enc_part.0;

    Ok(ApReplyInfo {
        ctime: secs_from_kerberos_time(&enc_part.ctime.0)?,
        cusec: decode_microseconds(&enc_part.cusec.0)?,
        subkey: enc_part
            .subkey
            .0
            .as_ref()
            .map(|subkey| KeyBlock::from_encryption_key(&subkey.0))
            .transpose()?,
        seq_number: enc_part
            .seq_number
            .0
            .as_ref()
            .map(|seq_number| decode_seq_number(&seq_number.0))
            .transpose()?,
    })
}

/// Extracts the client enctype preference list from the authenticator authorization data.
///
/// The list is only looked for inside `AD-IF-RELEVANT` containers.
pub(super) fn extract_client_etypes(authorization_data: &[AuthDataEntry]) -> Result<Option<Vec<i32>>> {
    for entry in authorization_data
        .iter()
        .filter(|entry| i64::from(entry.ad_type) == AD_IF_RELEVANT)
    {
        let if_relevant: AuthorizationData = picky_asn1_der::from_bytes(&entry.contents)?;
        let inner = entries_from_authorization_data(&if_relevant)?;

        if let Some(negotiation) = inner
            .iter()
            .find(|inner| i64::from(inner.ad_type) == AD_ETYPE_NEGOTIATION)
        {
            let etype_list: EtypeList = picky_asn1_der::from_bytes(&negotiation.contents)?;

            return etype_list.0.iter().map(decode_i32).collect::<Result<Vec<_>>>().map(Some);
        }
    }

    Ok(None)
}

/// Picks the first client enctype the acceptor permits.
///
/// The ticket session enctype is the last candidate: when none of the offered enctypes is permitted,
/// the session key is kept as it is.
pub(super) fn negotiate_etype(client_etypes: &[i32], session_etype: i32, permitted_etypes: &[i32]) -> Result<i32> {
    client_etypes
        .iter()
        .copied()
        .chain(std::iter::once(session_etype))
        .find(|etype| permitted_etypes.contains(etype))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::UnsupportedEncryptionType,
                format!(
                    "none of the client enctypes {:?} is permitted ({:?})",
                    client_etypes, permitted_etypes
                ),
            )
        })
}

/// Checks the ticket lifetime against the current time with the allowed clock skew.
pub(crate) fn check_ticket_times(times: &TicketTimes, flags: TicketFlags, now: i64, clockskew: time::Duration) -> Result<()> {
    let skew = clockskew.whole_seconds();

    // [5.3.  Tickets](https://www.rfc-editor.org/rfc/rfc4120#section-5.3)
    // If the starttime field is absent from the ticket, then the authtime field SHOULD be used in its place to determine
    // the life of the ticket.
    let start_time = times.effective_start_time();
    if start_time - now > skew {
        warn!(start_time, now, "Ticket is not yet valid");

        return Err(Error::new(
            ErrorKind::TicketNotYetValid,
            "ticket not yet valid: ticket start time is greater than current time + max time skew",
        ));
    }

    if now - times.end_time > skew {
        warn!(end_time = times.end_time, now, "Ticket is expired");

        return Err(Error::new(
            ErrorKind::TicketExpired,
            "ticket is expired: current time is greater than ticket end time + max time skew",
        ));
    }

    if flags.contains(TicketFlags::INVALID) {
        return Err(Error::new(
            ErrorKind::TicketNotYetValid,
            "ticket has the INVALID flag set and must be validated first",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ap::generators::generate_etype_negotiation;
    use crate::crypto::{ENCTYPE_AES128_CTS_HMAC_SHA1_96, ENCTYPE_AES256_CTS_HMAC_SHA1_96, ENCTYPE_DES3_CBC_SHA1};

    fn times(start_time: i64, end_time: i64) -> TicketTimes {
        TicketTimes {
            auth_time: start_time,
            start_time: None,
            end_time,
            renew_till: None,
        }
    }

    #[test]
    fn ticket_times_allow_clock_skew() {
        let skew = time::Duration::minutes(5);

        check_ticket_times(&times(1_000, 2_000), TicketFlags::empty(), 1_500, skew).unwrap();
        check_ticket_times(&times(1_200, 2_000), TicketFlags::empty(), 1_000, skew).unwrap();
        check_ticket_times(&times(1_000, 2_000), TicketFlags::empty(), 2_200, skew).unwrap();

        assert_eq!(
            check_ticket_times(&times(2_000, 3_000), TicketFlags::empty(), 1_000, skew)
                .unwrap_err()
                .kind(),
            ErrorKind::TicketNotYetValid
        );
        assert_eq!(
            check_ticket_times(&times(1_000, 2_000), TicketFlags::empty(), 3_000, skew)
                .unwrap_err()
                .kind(),
            ErrorKind::TicketExpired
        );
    }

    #[test]
    fn invalid_ticket_is_rejected() {
        assert_eq!(
            check_ticket_times(
                &times(1_000, 2_000),
                TicketFlags::INVALID,
                1_500,
                time::Duration::minutes(5)
            )
            .unwrap_err()
            .kind(),
            ErrorKind::TicketNotYetValid
        );
    }

    #[test]
    fn client_etypes_round_trip_through_authorization_data() {
        let permitted = [
            ENCTYPE_AES256_CTS_HMAC_SHA1_96,
            ENCTYPE_AES128_CTS_HMAC_SHA1_96,
            ENCTYPE_DES3_CBC_SHA1,
        ];
        let entry = generate_etype_negotiation(&permitted, ENCTYPE_DES3_CBC_SHA1)
            .unwrap()
            .unwrap();
        let authorization_data = vec![AuthDataEntry::new(64, vec![0x01]), entry];

        let client_etypes = extract_client_etypes(&authorization_data).unwrap().unwrap();

        assert_eq!(
            client_etypes,
            vec![ENCTYPE_AES256_CTS_HMAC_SHA1_96, ENCTYPE_AES128_CTS_HMAC_SHA1_96]
        );
        assert_eq!(
            negotiate_etype(&client_etypes, ENCTYPE_DES3_CBC_SHA1, &[ENCTYPE_AES128_CTS_HMAC_SHA1_96]).unwrap(),
            ENCTYPE_AES128_CTS_HMAC_SHA1_96
        );
        // Nothing offered is permitted, the session enctype is.
        assert_eq!(
            negotiate_etype(&client_etypes, ENCTYPE_DES3_CBC_SHA1, &[ENCTYPE_DES3_CBC_SHA1]).unwrap(),
            ENCTYPE_DES3_CBC_SHA1
        );
        assert_eq!(
            negotiate_etype(&client_etypes, ENCTYPE_AES128_CTS_HMAC_SHA1_96, &[ENCTYPE_DES3_CBC_SHA1])
                .unwrap_err()
                .kind(),
            ErrorKind::UnsupportedEncryptionType
        );
    }

    #[test]
    fn no_etype_list_without_if_relevant() {
        assert_eq!(extract_client_etypes(&[AuthDataEntry::new(64, vec![0x01])]).unwrap(), None);
    }
}
