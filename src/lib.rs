#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

pub mod address;
pub mod ap;
pub mod auth_context;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod flags;
pub mod keytab;
pub mod krb;
pub mod messages;
pub mod messaging;
pub mod replay;
pub mod secret;
pub mod sequence;
pub(crate) mod utils;

pub use address::Address;
pub use ap::{
    mk_rep, mk_rep_dce, mk_req_extended, rd_rep, rd_rep_dce, rd_req, rd_req_decoded, verify_authenticator_checksum,
    ApRequest,
};
pub use auth_context::{AuthContext, ChecksumFunc};
pub use config::MessagingConfig;
pub use credentials::{
    ApReplyInfo, AuthDataEntry, AuthenticatorInfo, ChecksumData, Credentials, DecodedTicket, Principal,
    TicketEncPart, TicketTimes,
};
pub use crypto::{CipherState, KeyBlock};
pub use error::{Error, ErrorKind, Result};
pub use flags::{ApOptions, AuthContextFlags, GenAddrsFlags, TicketFlags};
pub use keytab::{KeyTable, MemoryKeyTable};
pub use messaging::{mk_1cred, mk_cred, mk_priv, mk_safe, rd_cred, rd_priv, rd_safe, ReplayData};
pub use replay::{FileReplayCache, MemoryReplayCache, ReplayCache, ReplayRecord};
pub use secret::Secret;
pub use sequence::SequenceFlags;

/// Kerberos protocol version number (`pvno`).
pub const KERBEROS_VERSION: u8 = 0x05;
