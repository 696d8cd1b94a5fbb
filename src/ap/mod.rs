//! AP-REQ / AP-REP exchange: authenticates the client to a service and sets up the
//! [AuthContext] keys and sequence numbers used by the protected messages.
//!
//! [3.2. The Client/Server Authentication Exchange](https://www.rfc-editor.org/rfc/rfc4120#section-3.2)

mod extractors;
mod generators;

use picky_krb::constants::types::{AP_REP_MSG_TYPE, AP_REQ_MSG_TYPE};
use picky_krb::messages::{ApRep, ApReq};

use self::extractors::{
    check_ticket_times, decrypt_ap_rep_part, decrypt_ap_req_authenticator, decrypt_ap_req_ticket,
    extract_client_etypes, negotiate_etype,
};
use self::generators::{
    generate_ap_rep, generate_ap_req, generate_authenticator, generate_etype_negotiation, GenerateApRepOptions,
    GenerateAuthenticatorOptions,
};
use crate::address::address_search;
use crate::auth_context::AuthContext;
use crate::credentials::{
    ApReplyInfo, AuthenticatorInfo, ChecksumData, Credentials, DecodedTicket, Principal, TicketEncPart,
};
use crate::crypto::{
    is_keyed_checksum_type, key_usages::AP_REQ_AUTHENTICATOR_CKSUM, keyed_checksum_types, make_checksum,
    mandatory_checksum_type, replay_tag_from_ciphertext, verify_checksum, KeyBlock, CKSUMTYPE_GSSAPI,
};
use crate::flags::{ApOptions, AuthContextFlags};
use crate::keytab::KeyTable;
use crate::messages::{AP_REP_FIRST_BYTE, AP_REQ_FIRST_BYTE};
use crate::messaging::{check_header, check_message_tag};
use crate::replay::ReplayRecord;
use crate::sequence::generate_seq_number;
use crate::utils::{decode_i32, flags_from_bit_string, in_clock_skew, now_secs, us_timeofday};
use crate::{Error, ErrorKind, Result};

/// An AP-REQ accepted by [rd_req].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApRequest {
    /// Options as they were sent on the wire.
    pub ap_options: ApOptions,
    pub ticket: DecodedTicket,
}

fn sequence_requested(auth_context: &AuthContext) -> bool {
    auth_context
        .flags()
        .intersects(AuthContextFlags::DO_SEQUENCE | AuthContextFlags::RET_SEQUENCE)
}

fn ensure_local_seq_number(auth_context: &mut AuthContext) -> Result<()> {
    if sequence_requested(auth_context) && auth_context.local_seq_number() == 0 {
        auth_context.set_local_seq_number(generate_seq_number()?);
    }

    Ok(())
}

/// Checksum type of the authenticator checksum: the context preference when it suits the key, else the mandatory one.
fn request_checksum_type(auth_context: &AuthContext, key: &KeyBlock) -> Result<i32> {
    let preferred = auth_context.req_cksumtype();
    if preferred != 0 && keyed_checksum_types(key.enctype).contains(&preferred) {
        return Ok(preferred);
    }

    mandatory_checksum_type(key.enctype)
}

fn request_checksum(auth_context: &mut AuthContext, data: Option<&[u8]>, key: &KeyBlock) -> Result<Option<ChecksumData>> {
    let data = match data {
        Some(data) => Some(data.to_vec()),
        None => match auth_context.checksum_func() {
            Some(checksum_func) => Some(checksum_func()?),
            None => None,
        },
    };
    let Some(data) = data else {
        return Ok(None);
    };

    // Legacy GSS-API callers put the prepared checksum value into the data verbatim.
    if auth_context.req_cksumtype() == CKSUMTYPE_GSSAPI {
        return Ok(Some(ChecksumData {
            cksumtype: CKSUMTYPE_GSSAPI,
            contents: data,
        }));
    }

    let cksumtype = request_checksum_type(auth_context, key)?;

    Ok(Some(ChecksumData {
        cksumtype,
        contents: make_checksum(cksumtype, Some(key), AP_REQ_AUTHENTICATOR_CKSUM, &data)?,
    }))
}

/// Builds an AP-REQ for the service of `credentials`.
///
/// A new [AuthContext] is created when `auth_context` is `None`. The credentials session key becomes
/// the context key, and the sent authenticator is kept in the context to verify the AP-REP.
#[instrument(level = "debug", skip_all, fields(server = %credentials.server))]
pub fn mk_req_extended(
    auth_context: &mut Option<AuthContext>,
    ap_options: ApOptions,
    data: Option<&[u8]>,
    credentials: &Credentials,
) -> Result<Vec<u8>> {
    let ticket = credentials.decode_ticket()?;

    if ap_options.contains(ApOptions::ETYPE_NEGOTIATION) && !ap_options.contains(ApOptions::MUTUAL_REQUIRED) {
        return Err(Error::new(
            ErrorKind::InvalidParameter,
            "enctype negotiation requires mutual authentication",
        ));
    }

    let auth_context = auth_context.get_or_insert_with(AuthContext::new);
    check_ticket_times(
        &credentials.times,
        credentials.ticket_flags,
        now_secs(),
        auth_context.config().clockskew,
    )?;

    // Nothing is stored in the context until the request is built.
    let session_key = credentials.keyblock.clone();

    let seq_number = if sequence_requested(auth_context) {
        match auth_context.local_seq_number() {
            0 => Some(generate_seq_number()?),
            seq_number => Some(seq_number),
        }
    } else {
        None
    };

    let (subkey, new_subkey) = match auth_context.send_subkey() {
        Some(subkey) => (Some(subkey.clone()), false),
        None if ap_options.contains(ApOptions::USE_SUBKEY) => (Some(KeyBlock::random(session_key.enctype)?), true),
        None => (None, false),
    };

    let checksum = request_checksum(auth_context, data, &session_key)?;

    let mut authorization_data = auth_context.authorization_data().to_vec();
    if ap_options.contains(ApOptions::ETYPE_NEGOTIATION) {
        if let Some(etype_negotiation) =
            generate_etype_negotiation(auth_context.permitted_etypes(), session_key.enctype)?
        {
            authorization_data.push(etype_negotiation);
        }
    }

    let (ctime, cusec) = us_timeofday();
    let authenticator = generate_authenticator(GenerateAuthenticatorOptions {
        client: &credentials.client,
        checksum: checksum.as_ref(),
        ctime,
        cusec,
        subkey: subkey.as_ref(),
        seq_number,
        authorization_data: &authorization_data,
    })?;

    let ap_req = generate_ap_req(ticket, &session_key, &authenticator, ap_options)?;
    let authenticator = AuthenticatorInfo::from_authenticator(&authenticator)?;
    let encoded = picky_asn1_der::to_vec(&ap_req)?;

    auth_context.set_key(Some(session_key));
    if let Some(seq_number) = seq_number {
        auth_context.set_local_seq_number(seq_number);
    }
    if new_subkey {
        auth_context.set_send_subkey(subkey.clone());
        auth_context.set_recv_subkey(subkey);
    }
    auth_context.set_authenticator(Some(authenticator));

    Ok(encoded)
}

/// Parses and verifies an AP-REQ.
///
/// See [rd_req_decoded] for the checks performed.
#[instrument(level = "debug", skip_all)]
pub fn rd_req(
    auth_context: &mut Option<AuthContext>,
    input: &[u8],
    server: Option<&Principal>,
    keytab: &dyn KeyTable,
) -> Result<ApRequest> {
    check_message_tag(input, AP_REQ_FIRST_BYTE, "AP-REQ")?;

    let ap_req: ApReq = picky_asn1_der::from_bytes(input)?;

    rd_req_decoded(auth_context, &ap_req, server, keytab)
}

/// Verifies an already decoded AP-REQ.
///
/// The ticket is decrypted with the service key from `keytab` (or with the context key for user-to-user
/// requests), the authenticator with the ticket session key. On success the context holds the session
/// key, the client subkey, the client sequence number and the authenticator.
#[instrument(level = "debug", skip_all)]
pub fn rd_req_decoded(
    auth_context: &mut Option<AuthContext>,
    ap_req: &ApReq,
    server: Option<&Principal>,
    keytab: &dyn KeyTable,
) -> Result<ApRequest> {
    check_header(&ap_req.0.pvno.0, &ap_req.0.msg_type.0, AP_REQ_MSG_TYPE)?;

    let auth_context = auth_context.get_or_insert_with(AuthContext::new);

    let ticket = &ap_req.0.ticket.0 .0;
    let ticket_server = Principal::from_principal_name(&ticket.sname.0, &ticket.realm.0)?;
    if let Some(server) = server {
        if !server.same_as(&ticket_server) {
            warn!(expected = %server, actual = %ticket_server, "AP-REQ ticket is issued for another service");

            return Err(Error::new(
                ErrorKind::WrongPrincipal,
                format!("ticket is issued for {} but not for {}", ticket_server, server),
            ));
        }
    }

    let ap_options = ApOptions::from_bits_retain(flags_from_bit_string(&ap_req.0.ap_options.0 .0));
    let ticket_etype = decode_i32(&ticket.enc_part.0.etype.0)?;
    let kvno = ticket
        .enc_part
        .0
        .kvno
        .0
        .as_ref()
        .map(|kvno| decode_i32(&kvno.0).map(|kvno| kvno as u32))
        .transpose()?;

    let ticket_key = if ap_options.contains(ApOptions::USE_SESSION_KEY) {
        auth_context
            .key()
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::NoKey, "user-to-user AP-REQ requires a context key"))?
    } else {
        keytab.get_key(&ticket_server, kvno, ticket_etype)?
    };

    let enc_ticket_part = TicketEncPart::from_enc_ticket_part(&decrypt_ap_req_ticket(&ticket_key, ap_req)?)?;
    let session_key = enc_ticket_part.session_key.clone();

    let authenticator = AuthenticatorInfo::from_authenticator(&decrypt_ap_req_authenticator(&session_key, ap_req)?)?;

    // [3.2.3.  Receipt of KRB_AP_REQ Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.2.3)
    // The name and realm of the client from the ticket are compared against the same fields in the authenticator.
    if !authenticator.client.same_as(&enc_ticket_part.client) {
        warn!(
            ticket_client = %enc_ticket_part.client,
            authenticator_client = %authenticator.client,
            "AP-REQ client mismatch"
        );

        return Err(Error::new(
            ErrorKind::BadMatch,
            "the name and realm of the client in ticket and authenticator do not match",
        ));
    }

    let (_, remote_addr) = auth_context.addrs();
    if let Some(remote_addr) = remote_addr {
        if !address_search(remote_addr, &enc_ticket_part.addresses) {
            warn!(?remote_addr, "AP-REQ sender is not among the ticket addresses");

            return Err(Error::new(ErrorKind::BadAddress, "ticket is not valid for the sender address"));
        }
    }

    let clockskew = auth_context.config().clockskew;
    let now = now_secs();
    if !in_clock_skew(clockskew, authenticator.ctime, now) {
        warn!(ctime = authenticator.ctime, now, "AP-REQ authenticator is outside of the allowed clock skew");

        return Err(Error::new(
            ErrorKind::ClockSkew,
            "invalid authenticator ctime: time skew is too big",
        ));
    }

    check_ticket_times(&enc_ticket_part.times, enc_ticket_part.flags, now, clockskew)?;

    match auth_context.rcache() {
        Some(rcache) => {
            let tag = replay_tag_from_ciphertext(session_key.enctype, &ap_req.0.authenticator.0.cipher.0 .0)?;
            rcache.store(&ReplayRecord::new(
                authenticator.client.to_string(),
                ticket_server.to_string(),
                tag,
                authenticator.ctime,
                authenticator.cusec,
            ))?;
        }
        None if auth_context.flags().contains(AuthContextFlags::DO_TIME) => {
            return Err(Error::new(
                ErrorKind::RcRequired,
                "DO_TIME is set but the context has no replay cache for the AP-REQ",
            ));
        }
        None => {}
    }

    let negotiated_etype = match extract_client_etypes(&authenticator.authorization_data)? {
        Some(client_etypes) => {
            negotiate_etype(&client_etypes, session_key.enctype, auth_context.permitted_etypes())?
        }
        None => session_key.enctype,
    };
    if negotiated_etype != session_key.enctype {
        debug!(
            negotiated_etype,
            session_etype = session_key.enctype,
            "Negotiated a stronger enctype, the AP-REP will carry a subkey"
        );

        auth_context.set_flags(auth_context.flags() | AuthContextFlags::USE_SUBKEY);
    }
    auth_context.set_negotiated_etype(Some(negotiated_etype));

    auth_context.set_key(Some(session_key));
    auth_context.set_remote_seq_number(authenticator.seq_number.unwrap_or_default());
    if let Some(subkey) = &authenticator.subkey {
        auth_context.set_recv_subkey(Some(subkey.clone()));
        auth_context.set_send_subkey(Some(subkey.clone()));
    }
    auth_context.set_authenticator(Some(authenticator));

    debug!(server = %ticket_server, "AP-REQ ticket and authenticator are valid");

    Ok(ApRequest {
        ap_options,
        ticket: DecodedTicket {
            server: ticket_server,
            kvno,
            enc_part: enc_ticket_part,
        },
    })
}

/// Verifies the authenticator checksum of the last accepted AP-REQ over the application `data`.
///
/// A GSS-API checksum (0x8003) carries the data verbatim and is compared as is.
pub fn verify_authenticator_checksum(auth_context: &AuthContext, data: &[u8]) -> Result<()> {
    let authenticator = auth_context
        .authenticator()
        .ok_or_else(|| Error::new(ErrorKind::InvalidParameter, "the context has no authenticator"))?;
    let Some(checksum) = &authenticator.checksum else {
        return Ok(());
    };

    let valid = if checksum.cksumtype == CKSUMTYPE_GSSAPI {
        checksum.contents == data
    } else {
        if !is_keyed_checksum_type(checksum.cksumtype) {
            return Err(Error::new(
                ErrorKind::InappropriateChecksum,
                format!("authenticator checksum type {} is not keyed", checksum.cksumtype),
            ));
        }

        let key = auth_context
            .key()
            .ok_or_else(|| Error::new(ErrorKind::NoKey, "the context has no session key"))?;

        verify_checksum(
            checksum.cksumtype,
            Some(key),
            AP_REQ_AUTHENTICATOR_CKSUM,
            data,
            &checksum.contents,
        )?
    };

    if !valid {
        warn!("AP-REQ authenticator checksum verification failed");

        return Err(Error::new(ErrorKind::Modified, "authenticator checksum verification failed"));
    }

    Ok(())
}

fn mk_rep_impl(auth_context: &mut AuthContext, dce_style: bool) -> Result<Vec<u8>> {
    let session_key = auth_context
        .key()
        .cloned()
        .ok_or_else(|| Error::new(ErrorKind::NoKey, "the context has no session key"))?;
    let (authenticator_ctime, authenticator_cusec) = auth_context
        .authenticator()
        .map(|authenticator| (authenticator.ctime, authenticator.cusec))
        .ok_or_else(|| Error::new(ErrorKind::InvalidParameter, "the context has no authenticator to answer"))?;

    ensure_local_seq_number(auth_context)?;

    let options = if dce_style {
        let (ctime, cusec) = us_timeofday();

        GenerateApRepOptions {
            ctime,
            cusec,
            subkey: None,
            seq_number: Some(auth_context.remote_seq_number()),
        }
    } else {
        if auth_context.flags().contains(AuthContextFlags::USE_SUBKEY) {
            let etype = auth_context.negotiated_etype().unwrap_or(session_key.enctype);
            let subkey = KeyBlock::random(etype)?;

            auth_context.set_send_subkey(Some(subkey.clone()));
            auth_context.set_recv_subkey(Some(subkey));
        }

        GenerateApRepOptions {
            ctime: authenticator_ctime,
            cusec: authenticator_cusec,
            subkey: auth_context.send_subkey(),
            seq_number: sequence_requested(auth_context).then(|| auth_context.local_seq_number()),
        }
    };

    let ap_rep = generate_ap_rep(&session_key, options)?;

    Ok(picky_asn1_der::to_vec(&ap_rep)?)
}

/// Builds the AP-REP answering the authenticator accepted by [rd_req].
///
/// It echoes the authenticator time. When enctype negotiation selected another enctype, a fresh
/// subkey of that enctype is generated, installed in the context and sent.
#[instrument(level = "debug", skip_all)]
pub fn mk_rep(auth_context: &mut AuthContext) -> Result<Vec<u8>> {
    mk_rep_impl(auth_context, false)
}

/// DCE-style AP-REP: carries the current time and the remote sequence number, never a subkey.
#[instrument(level = "debug", skip_all)]
pub fn mk_rep_dce(auth_context: &mut AuthContext) -> Result<Vec<u8>> {
    mk_rep_impl(auth_context, true)
}

fn decode_ap_rep(auth_context: &AuthContext, input: &[u8]) -> Result<ApReplyInfo> {
    check_message_tag(input, AP_REP_FIRST_BYTE, "AP-REP")?;

    let ap_rep: ApRep = picky_asn1_der::from_bytes(input)?;
    check_header(&ap_rep.0.pvno.0, &ap_rep.0.msg_type.0, AP_REP_MSG_TYPE)?;

    let session_key = auth_context
        .key()
        .ok_or_else(|| Error::new(ErrorKind::NoKey, "the context has no session key"))?;

    decrypt_ap_rep_part(session_key, &ap_rep)
}

/// Parses the AP-REP answering the authenticator sent by [mk_req_extended].
///
/// The reply must echo the authenticator time exactly. A returned subkey becomes both the send and
/// the receive subkey.
#[instrument(level = "debug", skip_all)]
pub fn rd_rep(auth_context: &mut AuthContext, input: &[u8]) -> Result<ApReplyInfo> {
    let reply = decode_ap_rep(auth_context, input)?;

    let authenticator = auth_context
        .authenticator()
        .ok_or_else(|| Error::new(ErrorKind::MutualFailed, "no authenticator was sent"))?;
    if reply.ctime != authenticator.ctime || reply.cusec != authenticator.cusec {
        warn!(
            reply_ctime = reply.ctime,
            reply_cusec = reply.cusec,
            ctime = authenticator.ctime,
            cusec = authenticator.cusec,
            "AP-REP does not echo the authenticator time"
        );

        return Err(Error::new(
            ErrorKind::MutualFailed,
            "AP-REP time does not match the authenticator",
        ));
    }

    if let Some(subkey) = &reply.subkey {
        auth_context.set_recv_subkey(Some(subkey.clone()));
        auth_context.set_send_subkey(Some(subkey.clone()));
        auth_context.set_negotiated_etype(Some(subkey.enctype));
    }
    auth_context.set_remote_seq_number(reply.seq_number.unwrap_or_default());

    Ok(reply)
}

/// Parses a DCE-style AP-REP and returns its nonce.
///
/// The nonce must equal the local sequence number and the reply must not carry a subkey.
#[instrument(level = "debug", skip_all)]
pub fn rd_rep_dce(auth_context: &mut AuthContext, input: &[u8]) -> Result<u32> {
    let reply = decode_ap_rep(auth_context, input)?;

    if reply.subkey.is_some() {
        warn!("DCE-style AP-REP carries a subkey");

        return Err(Error::new(ErrorKind::MutualFailed, "DCE-style AP-REP must not carry a subkey"));
    }

    let nonce = reply.seq_number.unwrap_or_default();
    if nonce != auth_context.local_seq_number() {
        warn!(
            nonce,
            local_seq_number = auth_context.local_seq_number(),
            "DCE-style AP-REP nonce mismatch"
        );

        return Err(Error::new(
            ErrorKind::MutualFailed,
            "DCE-style AP-REP nonce does not match the local sequence number",
        ));
    }

    Ok(nonce)
}
