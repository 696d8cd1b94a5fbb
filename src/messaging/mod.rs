//! KRB-SAFE, KRB-PRIV and KRB-CRED messages.
//!
//! The helpers below are shared by the three message kinds: replay data generation,
//! sender/receiver address binding, replay cache and sequence number checks.

mod cred;
mod private;
mod safe;

pub use cred::{mk_1cred, mk_cred, rd_cred};
pub use private::{mk_priv, rd_priv};
pub use safe::{mk_safe, rd_safe};

use picky_asn1::wrapper::IntegerAsn1;
use picky_krb::data_types::KerberosTime;

use crate::address::{address_search, make_full_address, Address};
use crate::auth_context::AuthContext;
use crate::flags::AuthContextFlags;
use crate::replay::{ReplayRecord, DEFAULT_CLIENT};
use crate::sequence::classify_and_check;
use crate::utils::{
    decode_integer, decode_microseconds, decode_seq_number, encode_integer, encode_seq_number, in_clock_skew,
    kerberos_time, secs_from_kerberos_time, us_timeofday,
};
use crate::{Error, ErrorKind, Result, KERBEROS_VERSION};

/// Timestamp and sequence number of a message, reported when `RET_TIME`/`RET_SEQUENCE` are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayData {
    pub timestamp: i64,
    pub usec: u32,
    pub seq: u32,
}

/// Replay protection fields of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ReplayFields {
    pub timestamp: Option<(i64, u32)>,
    pub seq: Option<u32>,
}

impl ReplayFields {
    pub(crate) fn from_message(
        timestamp: Option<&KerberosTime>,
        usec: Option<&IntegerAsn1>,
        seq: Option<&IntegerAsn1>,
    ) -> Result<Self> {
        let timestamp = match timestamp {
            Some(timestamp) => Some((
                secs_from_kerberos_time(timestamp)?,
                usec.map(decode_microseconds).transpose()?.unwrap_or_default(),
            )),
            None => None,
        };

        Ok(Self {
            timestamp,
            seq: seq.map(decode_seq_number).transpose()?,
        })
    }

    /// Timestamp and microseconds as they go on the wire.
    pub(crate) fn encoded_timestamp(&self) -> Result<Option<(KerberosTime, IntegerAsn1)>> {
        self.timestamp
            .map(|(timestamp, usec)| Ok((kerberos_time(timestamp)?, encode_integer(i64::from(usec)))))
            .transpose()
    }

    pub(crate) fn encoded_seq(&self) -> Option<IntegerAsn1> {
        self.seq.map(encode_seq_number)
    }

    fn write_to(&self, out: Option<&mut ReplayData>) {
        if let Some(out) = out {
            let (timestamp, usec) = self.timestamp.unwrap_or_default();
            *out = ReplayData {
                timestamp,
                usec,
                seq: self.seq.unwrap_or_default(),
            };
        }
    }
}

/// Requested outputs need a destination, and timestamps need a replay cache.
pub(crate) fn check_replay_requirements(auth_context: &AuthContext, has_output: bool) -> Result<()> {
    let flags = auth_context.flags();

    if flags.intersects(AuthContextFlags::RET_TIME | AuthContextFlags::RET_SEQUENCE) && !has_output {
        return Err(Error::new(
            ErrorKind::RcRequired,
            "RET_TIME or RET_SEQUENCE is set but no replay data output is supplied",
        ));
    }

    if flags.contains(AuthContextFlags::DO_TIME) && auth_context.rcache().is_none() {
        return Err(Error::new(
            ErrorKind::RcRequired,
            "DO_TIME is set but the context has no replay cache",
        ));
    }

    Ok(())
}

/// Replay fields of an outgoing message. Consumes a local sequence number when sequencing is on.
pub(crate) fn generate_replay_fields(auth_context: &mut AuthContext, out: Option<&mut ReplayData>) -> ReplayFields {
    let flags = auth_context.flags();
    let mut fields = ReplayFields::default();

    if flags.intersects(AuthContextFlags::DO_TIME | AuthContextFlags::RET_TIME) {
        fields.timestamp = Some(us_timeofday());
    }

    if flags.intersects(AuthContextFlags::DO_SEQUENCE | AuthContextFlags::RET_SEQUENCE) {
        let seq = auth_context.local_seq_number();
        auth_context.set_local_seq_number(seq.wrapping_add(1));
        fields.seq = Some(seq);
    }

    fields.write_to(out);

    fields
}

/// Runs a message builder and gives back the consumed sequence number if it fails.
pub(crate) fn with_seq_rollback<T>(
    auth_context: &mut AuthContext,
    build: impl FnOnce(&mut AuthContext) -> Result<T>,
) -> Result<T> {
    let local_seq_number = auth_context.local_seq_number();

    let result = build(auth_context);
    if result.is_err() && auth_context.local_seq_number() != local_seq_number {
        debug!(local_seq_number, "Message build failed, rolling back the sequence number");
        auth_context.set_local_seq_number(local_seq_number);
    }

    result
}

fn bound_address(address: Option<&Address>, port: Option<&Address>) -> Result<Option<Address>> {
    match (address, port) {
        (Some(address), Some(port)) => Ok(Some(make_full_address(address, port)?)),
        (Some(address), None) => Ok(Some(address.clone())),
        (None, _) => Ok(None),
    }
}

/// Sender and receiver addresses of an outgoing message.
pub(crate) fn generate_addresses(
    auth_context: &AuthContext,
    local_required: bool,
) -> Result<(Option<Address>, Option<Address>)> {
    let (local_addr, remote_addr) = auth_context.addrs();
    let (local_port, remote_port) = auth_context.ports();

    let local = bound_address(local_addr, local_port)?;
    if local.is_none() && local_required {
        return Err(Error::new(
            ErrorKind::LocalAddrRequired,
            "the context has no local address",
        ));
    }

    Ok((local, bound_address(remote_addr, remote_port)?))
}

/// Verifies the addresses of an incoming message against the context binding.
pub(crate) fn check_addresses(
    auth_context: &AuthContext,
    sender: Option<&Address>,
    receiver: Option<&Address>,
) -> Result<()> {
    let (local_addr, remote_addr) = auth_context.addrs();
    let (local_port, remote_port) = auth_context.ports();

    if let Some(remote) = bound_address(remote_addr, remote_port)? {
        if sender != Some(&remote) {
            warn!(?sender, expected = ?remote, "Message sender address mismatch");

            return Err(Error::new(ErrorKind::BadAddress, "sender address does not match"));
        }
    }

    if let Some(receiver) = receiver {
        match bound_address(local_addr, local_port)? {
            Some(local) => {
                if receiver != &local {
                    warn!(?receiver, expected = ?local, "Message receiver address mismatch");

                    return Err(Error::new(ErrorKind::BadAddress, "receiver address does not match"));
                }
            }
            None => {
                let local_addresses = auth_context.config().local_addresses();
                if local_addresses.is_empty() || !address_search(receiver, &local_addresses) {
                    warn!(?receiver, "Message receiver is not a local address");

                    return Err(Error::new(ErrorKind::BadAddress, "receiver is not a local address"));
                }
            }
        }
    }

    Ok(())
}

/// Stores the tag of an outgoing message so a reflected copy is rejected.
pub(crate) fn store_sent_replay(auth_context: &AuthContext, fields: &ReplayFields, tag: Vec<u8>) -> Result<()> {
    if !auth_context.flags().contains(AuthContextFlags::DO_TIME) {
        return Ok(());
    }

    let rcache = auth_context
        .rcache()
        .ok_or_else(|| Error::new(ErrorKind::RcRequired, "the context has no replay cache"))?;
    let (timestamp, usec) = fields.timestamp.unwrap_or_else(us_timeofday);

    rcache.store(&ReplayRecord::new(DEFAULT_CLIENT, "", tag, timestamp, usec))
}

/// Clock skew check of an incoming message timestamp.
pub(crate) fn check_timestamp(auth_context: &AuthContext, fields: &ReplayFields) -> Result<()> {
    if !auth_context.flags().contains(AuthContextFlags::DO_TIME) {
        return Ok(());
    }

    let (timestamp, _) = fields.timestamp.unwrap_or_default();
    let (now, _) = us_timeofday();
    if !in_clock_skew(auth_context.config().clockskew, timestamp, now) {
        warn!(timestamp, now, "Message timestamp is outside of the allowed clock skew");

        return Err(Error::new(ErrorKind::ClockSkew, "message timestamp is out of clock skew"));
    }

    Ok(())
}

/// Timestamp and replay cache checks of an incoming message.
pub(crate) fn check_replay(auth_context: &AuthContext, fields: &ReplayFields, tag: Vec<u8>) -> Result<()> {
    if !auth_context.flags().contains(AuthContextFlags::DO_TIME) {
        return Ok(());
    }

    check_timestamp(auth_context, fields)?;

    let (timestamp, usec) = fields.timestamp.unwrap_or_default();
    let rcache = auth_context
        .rcache()
        .ok_or_else(|| Error::new(ErrorKind::RcRequired, "the context has no replay cache"))?;

    rcache.store(&ReplayRecord::new(DEFAULT_CLIENT, "", tag, timestamp, usec))
}

/// Sequence number check of an incoming message. Advances the remote sequence number on success.
pub(crate) fn check_sequence(auth_context: &mut AuthContext, fields: &ReplayFields) -> Result<()> {
    if !auth_context.flags().contains(AuthContextFlags::DO_SEQUENCE) {
        return Ok(());
    }

    let expected = auth_context.remote_seq_number();
    let received = fields.seq.unwrap_or_default();
    let check = classify_and_check(expected, received, auth_context.seq_flags());

    if !check.accepted {
        warn!(expected, received, "Message sequence number rejected");

        return Err(Error::new(
            ErrorKind::BadOrder,
            format!("unexpected sequence number: expected {} but got {}", expected, received),
        ));
    }

    auth_context.set_seq_flags(check.flags);
    auth_context.set_remote_seq_number(check.expected.wrapping_add(1));

    Ok(())
}

/// Reports the replay data of an accepted incoming message.
pub(crate) fn return_replay_data(auth_context: &AuthContext, fields: &ReplayFields, out: Option<&mut ReplayData>) {
    if auth_context
        .flags()
        .intersects(AuthContextFlags::RET_TIME | AuthContextFlags::RET_SEQUENCE)
    {
        fields.write_to(out);
    }
}

/// Checks the first byte of an encoded message before decoding it.
pub(crate) fn check_message_tag(data: &[u8], first_byte: u8, name: &str) -> Result<()> {
    match data.first() {
        Some(byte) if *byte == first_byte => Ok(()),
        _ => Err(Error::new(ErrorKind::MessageType, format!("input is not a {} message", name))),
    }
}

pub(crate) fn check_header(pvno: &IntegerAsn1, msg_type: &IntegerAsn1, expected_msg_type: u8) -> Result<()> {
    let version = decode_integer(pvno)?;
    if version != i64::from(KERBEROS_VERSION) {
        return Err(Error::new(
            ErrorKind::BadVersion,
            format!("unsupported protocol version: {}", version),
        ));
    }

    let message_type = decode_integer(msg_type)?;
    if message_type != i64::from(expected_msg_type) {
        return Err(Error::new(
            ErrorKind::MessageType,
            format!("expected message type {} but got {}", expected_msg_type, message_type),
        ));
    }

    Ok(())
}
