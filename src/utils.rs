use picky_asn1::bit_string::BitString;
use picky_asn1::date::GeneralizedTime;
use picky_asn1::restricted_string::IA5String;
use picky_asn1::wrapper::IntegerAsn1;
use picky_krb::data_types::{KerberosFlags, KerberosStringAsn1, KerberosTime};
use time::OffsetDateTime;

use crate::{Error, ErrorKind, Result};

/// [Microseconds](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.4)
/// ```not_rust
/// Microseconds    ::= INTEGER (0..999999)
/// ```
pub const MAX_MICROSECONDS: u32 = 999_999;

/// Current time as Kerberos (seconds, microseconds) pair.
pub(crate) fn us_timeofday() -> (i64, u32) {
    let now = OffsetDateTime::now_utc();

    (now.unix_timestamp(), now.microsecond().min(MAX_MICROSECONDS))
}

pub(crate) fn now_secs() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub(crate) fn in_clock_skew(clockskew: time::Duration, date: i64, now: i64) -> bool {
    (date - now).abs() < clockskew.whole_seconds()
}

pub(crate) fn kerberos_time(secs: i64) -> Result<KerberosTime> {
    let date = OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|err| Error::new(ErrorKind::InvalidParameter, format!("invalid timestamp {}: {:?}", secs, err)))?;

    Ok(KerberosTime::from(GeneralizedTime::from(date)))
}

pub(crate) fn secs_from_kerberos_time(time: &KerberosTime) -> Result<i64> {
    let date = OffsetDateTime::try_from(time.0.clone())
        .map_err(|err| Error::new(ErrorKind::InvalidToken, format!("invalid KerberosTime: {:?}", err)))?;

    Ok(date.unix_timestamp())
}

/// Encodes the value as a minimal two's-complement DER INTEGER.
pub(crate) fn encode_integer(value: i64) -> IntegerAsn1 {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }

    IntegerAsn1::from(bytes[start..].to_vec())
}

/// Decodes a DER INTEGER as a signed value.
pub(crate) fn decode_integer(integer: &IntegerAsn1) -> Result<i64> {
    let bytes = &integer.0;
    if bytes.is_empty() || bytes.len() > 9 {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!("invalid INTEGER length: {}", bytes.len()),
        ));
    }

    // 9 bytes are only valid for a positive value with a leading zero octet.
    let bytes = if bytes.len() == 9 {
        if bytes[0] != 0 {
            return Err(Error::new(ErrorKind::InvalidToken, "INTEGER does not fit into 64 bits"));
        }
        &bytes[1..]
    } else {
        bytes.as_slice()
    };

    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in bytes {
        value = (value << 8) | i64::from(*byte);
    }

    Ok(value)
}

pub(crate) fn decode_i32(integer: &IntegerAsn1) -> Result<i32> {
    let value = decode_integer(integer)?;

    i32::try_from(value)
        .map_err(|_| Error::new(ErrorKind::InvalidToken, format!("INTEGER {} does not fit into 32 bits", value)))
}

/// Sequence numbers keep their 32-bit pattern: a peer that sends a negative
/// INTEGER (0xff80 == -128) ends up as 0xffffff80.
pub(crate) fn encode_seq_number(seq_number: u32) -> IntegerAsn1 {
    encode_integer(i64::from(seq_number))
}

/// Accepts values from `i32::MIN` to `u32::MAX`. Anything wider is not a 32-bit sequence number.
pub(crate) fn decode_seq_number(integer: &IntegerAsn1) -> Result<u32> {
    let value = decode_integer(integer)?;

    if !(i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&value) {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!("sequence number {} does not fit into 32 bits", value),
        ));
    }

    Ok(value as u32)
}

pub(crate) fn decode_microseconds(integer: &IntegerAsn1) -> Result<u32> {
    let usec = decode_integer(integer)?;

    u32::try_from(usec)
        .ok()
        .filter(|usec| *usec <= MAX_MICROSECONDS)
        .ok_or_else(|| Error::new(ErrorKind::InvalidToken, format!("invalid microseconds value: {}", usec)))
}

pub(crate) fn kerberos_string(value: &str) -> Result<KerberosStringAsn1> {
    Ok(KerberosStringAsn1::from(IA5String::from_string(value.to_owned())?))
}

pub(crate) fn kerberos_flags(flags: u32) -> KerberosFlags {
    KerberosFlags::from(BitString::with_bytes(flags.to_be_bytes().to_vec()))
}

/// Reads the first 32 bits of a KerberosFlags bit string.
pub(crate) fn flags_from_bit_string(bit_string: &BitString) -> u32 {
    let bytes = bit_string.payload_view();
    let mut flags = [0_u8; 4];
    for (dst, src) in flags.iter_mut().zip(bytes.iter()) {
        *dst = *src;
    }

    u32::from_be_bytes(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_encoding_is_minimal() {
        assert_eq!(encode_integer(0).0, vec![0x00]);
        assert_eq!(encode_integer(127).0, vec![0x7f]);
        assert_eq!(encode_integer(128).0, vec![0x00, 0x80]);
        assert_eq!(encode_integer(-128).0, vec![0x80]);
        assert_eq!(encode_integer(0x0101).0, vec![0x01, 0x01]);
    }

    #[test]
    fn seq_number_preserves_bit_pattern() {
        assert_eq!(decode_seq_number(&encode_seq_number(0xffff_ff80)).unwrap(), 0xffff_ff80);
        // A peer that encodes 0x80 as a negative one-byte INTEGER.
        assert_eq!(decode_seq_number(&IntegerAsn1::from(vec![0x80])).unwrap(), 0xffff_ff80);
        assert_eq!(decode_seq_number(&IntegerAsn1::from(vec![0x00, 0x80])).unwrap(), 0x80);
    }

    #[test]
    fn wide_seq_number_is_rejected() {
        // 2^32 + 5 would otherwise wrap around to 5.
        let err = decode_seq_number(&encode_integer(0x1_0000_0005)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToken);

        let err = decode_seq_number(&encode_integer(i64::from(i32::MIN) - 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToken);

        assert_eq!(decode_seq_number(&encode_integer(i64::from(i32::MIN))).unwrap(), 0x8000_0000);
        assert_eq!(decode_seq_number(&encode_integer(i64::from(u32::MAX))).unwrap(), u32::MAX);
    }

    #[test]
    fn flags_read_from_bit_string() {
        let flags = kerberos_flags(0x4080_0000);

        assert_eq!(flags_from_bit_string(&flags.0), 0x4080_0000);
    }

    #[test]
    fn kerberos_time_round_trip() {
        let time = kerberos_time(1_700_000_000).unwrap();

        assert_eq!(secs_from_kerberos_time(&time).unwrap(), 1_700_000_000);
    }
}
