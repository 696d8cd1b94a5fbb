//! Wire structures that `picky_krb::messages` does not provide.
//!
//! AP-REQ, AP-REP and the ticket/authenticator types come from `picky_krb`. KRB-PRIV is defined
//! here because the `picky_krb` encrypted part types `usec` as a `KerberosTime`.

use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag10, ExplicitContextTag2,
    ExplicitContextTag3, ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag7,
    ExplicitContextTag8, ExplicitContextTag9, IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_asn1_der::application_tag::ApplicationTag;
use picky_krb::data_types::{
    Checksum, EncryptedData, EncryptionKey, HostAddress, HostAddresses, KerberosFlags, KerberosTime, Microseconds,
    PrincipalName, Realm, Ticket,
};
use serde::{Deserialize, Serialize};

pub const KRB_SAFE_MSG_TYPE: u8 = 20;
pub const KRB_PRIV_MSG_TYPE: u8 = 21;
pub const KRB_CRED_MSG_TYPE: u8 = 22;
pub const ENC_KRB_PRIV_PART_TYPE: u8 = 28;
pub const ENC_KRB_CRED_PART_TYPE: u8 = 29;

/// First byte of the DER encoding of each protected message (`[APPLICATION n]`, constructed).
pub const AP_REQ_FIRST_BYTE: u8 = 0x6e;
pub const AP_REP_FIRST_BYTE: u8 = 0x6f;
pub const KRB_SAFE_FIRST_BYTE: u8 = 0x74;
pub const KRB_PRIV_FIRST_BYTE: u8 = 0x75;
pub const KRB_CRED_FIRST_BYTE: u8 = 0x76;

/// [Authorization Data](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.6)
pub const AD_IF_RELEVANT: i64 = 1;
/// [RFC 4537](https://www.rfc-editor.org/rfc/rfc4537#section-3)
pub const AD_ETYPE_NEGOTIATION: i64 = 129;

/// [KRB_SAFE Message](https://www.rfc-editor.org/rfc/rfc4120#section-5.6.1)
/// ```not_rust
/// KRB-SAFE-BODY   ::= SEQUENCE {
///         user-data       [0] OCTET STRING,
///         timestamp       [1] KerberosTime OPTIONAL,
///         usec            [2] Microseconds OPTIONAL,
///         seq-number      [3] UInt32 OPTIONAL,
///         s-address       [4] HostAddress,
///         r-address       [5] HostAddress OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KrbSafeBody {
    pub user_data: ExplicitContextTag0<OctetStringAsn1>,
    #[serde(default)]
    pub timestamp: Optional<Option<ExplicitContextTag1<KerberosTime>>>,
    #[serde(default)]
    pub usec: Optional<Option<ExplicitContextTag2<Microseconds>>>,
    #[serde(default)]
    pub seq_number: Optional<Option<ExplicitContextTag3<IntegerAsn1>>>,
    pub s_address: ExplicitContextTag4<HostAddress>,
    #[serde(default)]
    pub r_address: Optional<Option<ExplicitContextTag5<HostAddress>>>,
}

/// ```not_rust
/// KRB-SAFE        ::= [APPLICATION 20] SEQUENCE {
///         pvno            [0] INTEGER (5),
///         msg-type        [1] INTEGER (20),
///         safe-body       [2] KRB-SAFE-BODY,
///         cksum           [3] Checksum
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KrbSafeInner {
    pub pvno: ExplicitContextTag0<IntegerAsn1>,
    pub msg_type: ExplicitContextTag1<IntegerAsn1>,
    pub safe_body: ExplicitContextTag2<KrbSafeBody>,
    pub cksum: ExplicitContextTag3<Checksum>,
}

pub type KrbSafe = ApplicationTag<KrbSafeInner, 20>;

/// [KRB_PRIV Message](https://www.rfc-editor.org/rfc/rfc4120#section-5.7.1)
/// ```not_rust
/// KRB-PRIV        ::= [APPLICATION 21] SEQUENCE {
///         pvno            [0] INTEGER (5),
///         msg-type        [1] INTEGER (21),
///                         -- NOTE: there is no [2] tag
///         enc-part        [3] EncryptedData -- EncKrbPrivPart
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KrbPrivInner {
    pub pvno: ExplicitContextTag0<IntegerAsn1>,
    pub msg_type: ExplicitContextTag1<IntegerAsn1>,
    pub enc_part: ExplicitContextTag3<EncryptedData>,
}

pub type KrbPriv = ApplicationTag<KrbPrivInner, 21>;

/// ```not_rust
/// EncKrbPrivPart  ::= [APPLICATION 28] SEQUENCE {
///         user-data       [0] OCTET STRING,
///         timestamp       [1] KerberosTime OPTIONAL,
///         usec            [2] Microseconds OPTIONAL,
///         seq-number      [3] UInt32 OPTIONAL,
///         s-address       [4] HostAddress -- sender's addr --,
///         r-address       [5] HostAddress OPTIONAL -- recip's addr
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncKrbPrivPartInner {
    pub user_data: ExplicitContextTag0<OctetStringAsn1>,
    #[serde(default)]
    pub timestamp: Optional<Option<ExplicitContextTag1<KerberosTime>>>,
    #[serde(default)]
    pub usec: Optional<Option<ExplicitContextTag2<Microseconds>>>,
    #[serde(default)]
    pub seq_number: Optional<Option<ExplicitContextTag3<IntegerAsn1>>>,
    pub s_address: ExplicitContextTag4<HostAddress>,
    #[serde(default)]
    pub r_address: Optional<Option<ExplicitContextTag5<HostAddress>>>,
}

pub type EncKrbPrivPart = ApplicationTag<EncKrbPrivPartInner, 28>;

/// [KRB_CRED Message](https://www.rfc-editor.org/rfc/rfc4120#section-5.8.1)
/// ```not_rust
/// KRB-CRED        ::= [APPLICATION 22] SEQUENCE {
///         pvno            [0] INTEGER (5),
///         msg-type        [1] INTEGER (22),
///         tickets         [2] SEQUENCE OF Ticket,
///         enc-part        [3] EncryptedData -- EncKrbCredPart
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KrbCredInner {
    pub pvno: ExplicitContextTag0<IntegerAsn1>,
    pub msg_type: ExplicitContextTag1<IntegerAsn1>,
    pub tickets: ExplicitContextTag2<Asn1SequenceOf<Ticket>>,
    pub enc_part: ExplicitContextTag3<EncryptedData>,
}

pub type KrbCred = ApplicationTag<KrbCredInner, 22>;

/// ```not_rust
/// KrbCredInfo     ::= SEQUENCE {
///         key             [0] EncryptionKey,
///         prealm          [1] Realm OPTIONAL,
///         pname           [2] PrincipalName OPTIONAL,
///         flags           [3] TicketFlags OPTIONAL,
///         authtime        [4] KerberosTime OPTIONAL,
///         starttime       [5] KerberosTime OPTIONAL,
///         endtime         [6] KerberosTime OPTIONAL,
///         renew-till      [7] KerberosTime OPTIONAL,
///         srealm          [8] Realm OPTIONAL,
///         sname           [9] PrincipalName OPTIONAL,
///         caddr           [10] HostAddresses OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KrbCredInfo {
    pub key: ExplicitContextTag0<EncryptionKey>,
    #[serde(default)]
    pub prealm: Optional<Option<ExplicitContextTag1<Realm>>>,
    #[serde(default)]
    pub pname: Optional<Option<ExplicitContextTag2<PrincipalName>>>,
    #[serde(default)]
    pub flags: Optional<Option<ExplicitContextTag3<KerberosFlags>>>,
    #[serde(default)]
    pub auth_time: Optional<Option<ExplicitContextTag4<KerberosTime>>>,
    #[serde(default)]
    pub start_time: Optional<Option<ExplicitContextTag5<KerberosTime>>>,
    #[serde(default)]
    pub end_time: Optional<Option<ExplicitContextTag6<KerberosTime>>>,
    #[serde(default)]
    pub renew_till: Optional<Option<ExplicitContextTag7<KerberosTime>>>,
    #[serde(default)]
    pub srealm: Optional<Option<ExplicitContextTag8<Realm>>>,
    #[serde(default)]
    pub sname: Optional<Option<ExplicitContextTag9<PrincipalName>>>,
    #[serde(default)]
    pub caddr: Optional<Option<ExplicitContextTag10<HostAddresses>>>,
}

/// ```not_rust
/// EncKrbCredPart  ::= [APPLICATION 29] SEQUENCE {
///         ticket-info     [0] SEQUENCE OF KrbCredInfo,
///         nonce           [1] UInt32 OPTIONAL,
///         timestamp       [2] KerberosTime OPTIONAL,
///         usec            [3] Microseconds OPTIONAL,
///         s-address       [4] HostAddress OPTIONAL,
///         r-address       [5] HostAddress OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncKrbCredPartInner {
    pub ticket_info: ExplicitContextTag0<Asn1SequenceOf<KrbCredInfo>>,
    #[serde(default)]
    pub nonce: Optional<Option<ExplicitContextTag1<IntegerAsn1>>>,
    #[serde(default)]
    pub timestamp: Optional<Option<ExplicitContextTag2<KerberosTime>>>,
    #[serde(default)]
    pub usec: Optional<Option<ExplicitContextTag3<Microseconds>>>,
    #[serde(default)]
    pub s_address: Optional<Option<ExplicitContextTag4<HostAddress>>>,
    #[serde(default)]
    pub r_address: Optional<Option<ExplicitContextTag5<HostAddress>>>,
}

pub type EncKrbCredPart = ApplicationTag<EncKrbCredPartInner, 29>;

/// [RFC 4537: Enctype Negotiation](https://www.rfc-editor.org/rfc/rfc4537#section-3)
/// ```not_rust
/// EtypeList ::= SEQUENCE OF Int32
/// ```
pub type EtypeList = Asn1SequenceOf<IntegerAsn1>;
