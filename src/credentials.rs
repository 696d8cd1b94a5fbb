use std::fmt;

use picky_asn1::wrapper::{Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, OctetStringAsn1};
use picky_krb::data_types::{
    AuthorizationData, AuthorizationDataInner, Authenticator, Checksum, EncTicketPart, HostAddresses, PrincipalName,
    Realm, Ticket,
};

use crate::address::Address;
use crate::crypto::KeyBlock;
use crate::flags::TicketFlags;
use crate::utils::{
    decode_i32, decode_microseconds, decode_seq_number, encode_integer, flags_from_bit_string, kerberos_string,
    secs_from_kerberos_time,
};
use crate::{Error, ErrorKind, Result};

/// Kerberos principal: realm plus name components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Principal {
    pub realm: String,
    pub name_type: i32,
    pub components: Vec<String>,
}

impl Principal {
    pub fn new(realm: impl Into<String>, name_type: i32, components: Vec<String>) -> Self {
        Self {
            realm: realm.into(),
            name_type,
            components,
        }
    }

    /// Compares realm and name components, ignoring the name type.
    pub fn same_as(&self, other: &Principal) -> bool {
        self.realm == other.realm && self.components == other.components
    }

    pub fn to_principal_name(&self) -> Result<PrincipalName> {
        let name_string = self
            .components
            .iter()
            .map(|component| kerberos_string(component))
            .collect::<Result<Vec<_>>>()?;

        Ok(PrincipalName {
            name_type: ExplicitContextTag0::from(encode_integer(i64::from(self.name_type))),
            name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(name_string)),
        })
    }

    pub fn to_realm(&self) -> Result<Realm> {
        kerberos_string(&self.realm)
    }

    pub fn from_principal_name(name: &PrincipalName, realm: &Realm) -> Result<Self> {
        Ok(Self {
            realm: realm.to_string(),
            name_type: decode_i32(&name.name_type.0)?,
            components: name.name_string.0 .0.iter().map(|component| component.to_string()).collect(),
        })
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.components.join("/"), self.realm)
    }
}

/// Ticket lifetime, as UNIX timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TicketTimes {
    pub auth_time: i64,
    pub start_time: Option<i64>,
    pub end_time: i64,
    pub renew_till: Option<i64>,
}

impl TicketTimes {
    /// [5.3. Tickets](https://www.rfc-editor.org/rfc/rfc4120#section-5.3)
    /// If the starttime field is absent from the ticket, then the authtime field SHOULD be used in its place.
    pub fn effective_start_time(&self) -> i64 {
        self.start_time.unwrap_or(self.auth_time)
    }
}

/// A ticket together with the client-side knowledge needed to use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client: Principal,
    pub server: Principal,
    pub keyblock: KeyBlock,
    pub times: TicketTimes,
    pub ticket_flags: TicketFlags,
    pub addresses: Vec<Address>,
    /// DER encoded [Ticket].
    pub ticket: Vec<u8>,
}

impl Credentials {
    pub(crate) fn decode_ticket(&self) -> Result<Ticket> {
        if self.ticket.is_empty() {
            return Err(Error::new(ErrorKind::NoTicketSupplied, "credentials do not carry a ticket"));
        }

        Ok(picky_asn1_der::from_bytes(&self.ticket)?)
    }
}

/// One element of authorization data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDataEntry {
    pub ad_type: i32,
    pub contents: Vec<u8>,
}

impl AuthDataEntry {
    pub fn new(ad_type: i32, contents: Vec<u8>) -> Self {
        Self { ad_type, contents }
    }
}

pub(crate) fn authorization_data_from_entries(entries: &[AuthDataEntry]) -> AuthorizationData {
    AuthorizationData::from(
        entries
            .iter()
            .map(|entry| AuthorizationDataInner {
                ad_type: ExplicitContextTag0::from(encode_integer(i64::from(entry.ad_type))),
                ad_data: ExplicitContextTag1::from(OctetStringAsn1::from(entry.contents.clone())),
            })
            .collect::<Vec<_>>(),
    )
}

pub(crate) fn entries_from_authorization_data(data: &AuthorizationData) -> Result<Vec<AuthDataEntry>> {
    data.0
        .iter()
        .map(|inner| Ok(AuthDataEntry::new(decode_i32(&inner.ad_type.0)?, inner.ad_data.0 .0.clone())))
        .collect()
}

pub(crate) fn addresses_from_host_addresses(addresses: &HostAddresses) -> Result<Vec<Address>> {
    addresses.0.iter().map(Address::from_host_address).collect()
}

pub(crate) fn host_addresses_from_addresses(addresses: &[Address]) -> HostAddresses {
    HostAddresses::from(addresses.iter().map(Address::to_host_address).collect::<Vec<_>>())
}

/// Checksum type and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumData {
    pub cksumtype: i32,
    pub contents: Vec<u8>,
}

impl ChecksumData {
    pub(crate) fn from_checksum(checksum: &Checksum) -> Result<Self> {
        Ok(Self {
            cksumtype: decode_i32(&checksum.cksumtype.0)?,
            contents: checksum.checksum.0 .0.clone(),
        })
    }

    pub(crate) fn to_checksum(&self) -> Checksum {
        Checksum {
            cksumtype: ExplicitContextTag0::from(encode_integer(i64::from(self.cksumtype))),
            checksum: ExplicitContextTag1::from(OctetStringAsn1::from(self.contents.clone())),
        }
    }
}

/// Decoded authenticator, kept by the context between the AP-REQ and the AP-REP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorInfo {
    pub client: Principal,
    pub checksum: Option<ChecksumData>,
    pub ctime: i64,
    pub cusec: u32,
    pub subkey: Option<KeyBlock>,
    pub seq_number: Option<u32>,
    pub authorization_data: Vec<AuthDataEntry>,
}

impl AuthenticatorInfo {
    pub(crate) fn from_authenticator(authenticator: &Authenticator) -> Result<Self> {
        let inner = &authenticator.0;

        Ok(Self {
            client: Principal::from_principal_name(&inner.cname.0, &inner.crealm.0)?,
            checksum: inner
                .cksum
                .0
                .as_ref()
                .map(|cksum| ChecksumData::from_checksum(&cksum.0))
                .transpose()?,
            ctime: secs_from_kerberos_time(&inner.ctime.0)?,
            cusec: decode_microseconds(&inner.cusec.0)?,
            subkey: inner
                .subkey
                .0
                .as_ref()
                .map(|subkey| KeyBlock::from_encryption_key(&subkey.0))
                .transpose()?,
            seq_number: inner
                .seq_number
                .0
                .as_ref()
                .map(|seq_number| decode_seq_number(&seq_number.0))
                .transpose()?,
            authorization_data: inner
                .authorization_data
                .0
                .as_ref()
                .map(|data| entries_from_authorization_data(&data.0))
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

/// Decrypted part of a ticket received in an AP-REQ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketEncPart {
    pub flags: TicketFlags,
    pub session_key: KeyBlock,
    pub client: Principal,
    pub times: TicketTimes,
    pub addresses: Vec<Address>,
    pub authorization_data: Vec<AuthDataEntry>,
}

impl TicketEncPart {
    pub(crate) fn from_enc_ticket_part(enc_part: &EncTicketPart) -> Result<Self> {
        let inner = &enc_part.0;

        Ok(Self {
            flags: TicketFlags::from_bits_retain(flags_from_bit_string(&inner.flags.0 .0)),
            session_key: KeyBlock::from_encryption_key(&inner.key.0)?,
            client: Principal::from_principal_name(&inner.cname.0, &inner.crealm.0)?,
            times: TicketTimes {
                auth_time: secs_from_kerberos_time(&inner.auth_time.0)?,
                start_time: inner
                    .starttime
                    .0
                    .as_ref()
                    .map(|time| secs_from_kerberos_time(&time.0))
                    .transpose()?,
                end_time: secs_from_kerberos_time(&inner.endtime.0)?,
                renew_till: inner
                    .renew_till
                    .0
                    .as_ref()
                    .map(|time| secs_from_kerberos_time(&time.0))
                    .transpose()?,
            },
            addresses: inner
                .caddr
                .0
                .as_ref()
                .map(|caddr| addresses_from_host_addresses(&caddr.0))
                .transpose()?
                .unwrap_or_default(),
            authorization_data: inner
                .authorization_data
                .0
                .as_ref()
                .map(|data| entries_from_authorization_data(&data.0))
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

/// A ticket accepted by [rd_req](crate::ap::rd_req).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTicket {
    pub server: Principal,
    /// Key version number of the service key that decrypted the ticket.
    pub kvno: Option<u32>,
    pub enc_part: TicketEncPart,
}

/// Decrypted AP-REP content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApReplyInfo {
    pub ctime: i64,
    pub cusec: u32,
    pub subkey: Option<KeyBlock>,
    pub seq_number: Option<u32>,
}
