use std::{error, fmt, io, result};

use picky_krb::constants::error_codes::{
    KDC_ERR_ETYPE_NOSUPP, KDC_ERR_SUMTYPE_NOSUPP, KRB_AP_ERR_BADADDR, KRB_AP_ERR_BADMATCH, KRB_AP_ERR_BADORDER,
    KRB_AP_ERR_BADVERSION, KRB_AP_ERR_BAD_INTEGRITY, KRB_AP_ERR_INAPP_CKSUM, KRB_AP_ERR_MODIFIED,
    KRB_AP_ERR_MSG_TYPE, KRB_AP_ERR_MUT_FAIL, KRB_AP_ERR_NOKEY, KRB_AP_ERR_NOT_US, KRB_AP_ERR_REPEAT,
    KRB_AP_ERR_SKEW, KRB_AP_ERR_TKT_EXPIRED, KRB_AP_ERR_TKT_NYV,
};
use picky_krb::crypto::KerberosCryptoError;

pub type Result<T> = result::Result<T, Error>;

/// The kind of a messaging error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Sender or receiver address in the message does not match the context binding.
    BadAddress,
    /// A replay cache or a replay data destination is required but was not supplied.
    RcRequired,
    /// The sequence number of an inbound message was rejected.
    BadOrder,
    /// The message was already seen by the replay cache.
    ReplayDetected,
    /// Checksum verification failed.
    Modified,
    /// The checksum type is known but is not keyed or not collision-proof.
    InappropriateChecksum,
    UnsupportedChecksumType,
    UnsupportedEncryptionType,
    /// AP-REP does not echo the authenticator or violates the DCE-style rules.
    MutualFailed,
    NoTicketSupplied,
    /// Message type tag does not match the expected message.
    MessageType,
    BadVersion,
    LocalAddrRequired,
    RemoteAddrRequired,
    ClockSkew,
    TicketNotYetValid,
    TicketExpired,
    /// Client principal of the ticket and of the authenticator differ.
    BadMatch,
    /// The ticket was issued for another service.
    WrongPrincipal,
    /// No key is available for the requested operation.
    NoKey,
    /// The key table has no matching entry.
    KeyNotFound,
    /// Used in cases when supplied data is missing or cannot be decoded.
    InvalidToken,
    InvalidParameter,
    EncryptFailure,
    DecryptFailure,
    /// May correspond to any internal error (I/O error, poisoned lock, etc.).
    InternalError,
}

impl ErrorKind {
    /// Returns the RFC 4120 `error-code` a server would put into a KRB-ERROR for this kind.
    pub fn protocol_code(self) -> Option<i32> {
        match self {
            ErrorKind::BadAddress => Some(KRB_AP_ERR_BADADDR as i32),
            ErrorKind::BadOrder => Some(KRB_AP_ERR_BADORDER as i32),
            ErrorKind::ReplayDetected => Some(KRB_AP_ERR_REPEAT as i32),
            ErrorKind::Modified => Some(KRB_AP_ERR_MODIFIED as i32),
            ErrorKind::InappropriateChecksum => Some(KRB_AP_ERR_INAPP_CKSUM as i32),
            ErrorKind::UnsupportedChecksumType => Some(KDC_ERR_SUMTYPE_NOSUPP as i32),
            ErrorKind::UnsupportedEncryptionType => Some(KDC_ERR_ETYPE_NOSUPP as i32),
            ErrorKind::MutualFailed => Some(KRB_AP_ERR_MUT_FAIL as i32),
            ErrorKind::MessageType => Some(KRB_AP_ERR_MSG_TYPE as i32),
            ErrorKind::BadVersion => Some(KRB_AP_ERR_BADVERSION as i32),
            ErrorKind::ClockSkew => Some(KRB_AP_ERR_SKEW as i32),
            ErrorKind::TicketNotYetValid => Some(KRB_AP_ERR_TKT_NYV as i32),
            ErrorKind::TicketExpired => Some(KRB_AP_ERR_TKT_EXPIRED as i32),
            ErrorKind::BadMatch => Some(KRB_AP_ERR_BADMATCH as i32),
            ErrorKind::WrongPrincipal => Some(KRB_AP_ERR_NOT_US as i32),
            ErrorKind::KeyNotFound => Some(KRB_AP_ERR_NOKEY as i32),
            ErrorKind::DecryptFailure => Some(KRB_AP_ERR_BAD_INTEGRITY as i32),
            _ => None,
        }
    }
}

/// Holds the [`ErrorKind`] and the description of the error.
#[derive(Debug, Clone)]
pub struct Error {
    pub error_type: ErrorKind,
    pub description: String,
}

impl Error {
    /// Allows to fill a new error easily, supplying it with a coherent description.
    pub fn new(error_type: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            error_type,
            description: description.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error_type
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.description)
    }
}

impl From<picky_asn1_der::Asn1DerError> for Error {
    fn from(err: picky_asn1_der::Asn1DerError) -> Self {
        Self::new(ErrorKind::InvalidToken, format!("ASN.1 DER error: {:?}", err))
    }
}

impl From<KerberosCryptoError> for Error {
    fn from(err: KerberosCryptoError) -> Self {
        match err {
            KerberosCryptoError::IntegrityCheck => Self::new(ErrorKind::Modified, "integrity check failed"),
            err => Self::new(ErrorKind::InternalError, format!("crypto error: {:?}", err)),
        }
    }
}

impl From<picky_asn1::restricted_string::CharSetError> for Error {
    fn from(err: picky_asn1::restricted_string::CharSetError) -> Self {
        Self::new(ErrorKind::InvalidParameter, format!("invalid Kerberos string: {:?}", err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::InternalError, format!("IO error: {:?}", err))
    }
}

impl From<rand::Error> for Error {
    fn from(err: rand::Error) -> Self {
        Self::new(ErrorKind::InternalError, format!("Rand error: {:?}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::new(ErrorKind::InternalError, "replay cache lock is poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_codes_follow_rfc4120() {
        assert_eq!(ErrorKind::BadAddress.protocol_code(), Some(38));
        assert_eq!(ErrorKind::ReplayDetected.protocol_code(), Some(34));
        assert_eq!(ErrorKind::BadOrder.protocol_code(), Some(42));
        assert_eq!(ErrorKind::MutualFailed.protocol_code(), Some(46));
        assert_eq!(ErrorKind::InappropriateChecksum.protocol_code(), Some(50));
        assert_eq!(ErrorKind::RcRequired.protocol_code(), None);
    }

    #[test]
    fn integrity_failure_maps_to_modified() {
        let err = Error::from(KerberosCryptoError::IntegrityCheck);

        assert_eq!(err.kind(), ErrorKind::Modified);
    }
}
