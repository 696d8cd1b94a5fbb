#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;

use krb5_messaging::crypto::{encrypt, ENCTYPE_AES256_CTS_HMAC_SHA1_96};
use krb5_messaging::{
    Address, AuthContext, AuthContextFlags, Credentials, KeyBlock, MemoryKeyTable, MemoryReplayCache, Principal,
    TicketFlags, TicketTimes,
};
use picky_asn1::bit_string::BitString;
use picky_asn1::date::GeneralizedTime;
use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3,
    ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag7, ExplicitContextTag9, IntegerAsn1, OctetStringAsn1,
    Optional,
};
use picky_krb::constants::key_usages::TICKET_REP;
use picky_krb::data_types::{
    EncTicketPart, EncTicketPartInner, EncryptedData, KerberosFlags, KerberosTime, Ticket, TicketInner,
    TransitedEncoding,
};
use time::OffsetDateTime;

pub const REALM: &str = "EXAMPLE.COM";
pub const SERVICE_KVNO: u32 = 2;

const NT_PRINCIPAL: i32 = 1;
const NT_SRV_HST: i32 = 3;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn client_principal() -> Principal {
    Principal::new(REALM, NT_PRINCIPAL, vec!["alice".to_owned()])
}

pub fn service_principal() -> Principal {
    Principal::new(
        REALM,
        NT_SRV_HST,
        vec!["host".to_owned(), "server.example.com".to_owned()],
    )
}

pub fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn kerberos_time(secs: i64) -> KerberosTime {
    KerberosTime::from(GeneralizedTime::from(OffsetDateTime::from_unix_timestamp(secs).unwrap()))
}

pub struct TicketParams {
    pub client: Principal,
    pub session_etype: i32,
    pub auth_time: i64,
    pub end_time: i64,
    pub flags: TicketFlags,
    pub addresses: Vec<Address>,
}

impl Default for TicketParams {
    fn default() -> Self {
        let now = now();

        Self {
            client: client_principal(),
            session_etype: ENCTYPE_AES256_CTS_HMAC_SHA1_96,
            auth_time: now,
            end_time: now + 8 * 60 * 60,
            flags: TicketFlags::FORWARDABLE | TicketFlags::INITIAL | TicketFlags::PRE_AUTHENT,
            addresses: Vec::new(),
        }
    }
}

/// A service ticket together with the key table able to decrypt it.
pub struct IssuedTicket {
    pub credentials: Credentials,
    pub keytab: MemoryKeyTable,
}

/// Issues a ticket for [service_principal] the way a KDC would.
pub fn issue_ticket(params: TicketParams) -> IssuedTicket {
    let TicketParams {
        client,
        session_etype,
        auth_time,
        end_time,
        flags,
        addresses,
    } = params;

    let service = service_principal();
    let service_key = KeyBlock::random(ENCTYPE_AES256_CTS_HMAC_SHA1_96).unwrap();
    let session_key = KeyBlock::random(session_etype).unwrap();

    let ticket_enc_part = EncTicketPart::from(EncTicketPartInner {
        flags: ExplicitContextTag0::from(KerberosFlags::from(BitString::with_bytes(
            flags.bits().to_be_bytes().to_vec(),
        ))),
        key: ExplicitContextTag1::from(session_key.to_encryption_key()),
        crealm: ExplicitContextTag2::from(client.to_realm().unwrap()),
        cname: ExplicitContextTag3::from(client.to_principal_name().unwrap()),
        transited: ExplicitContextTag4::from(TransitedEncoding {
            tr_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![0])),
            contents: ExplicitContextTag1::from(OctetStringAsn1::from(Vec::new())),
        }),
        auth_time: ExplicitContextTag5::from(kerberos_time(auth_time)),
        starttime: Optional::from(None),
        endtime: ExplicitContextTag7::from(kerberos_time(end_time)),
        renew_till: Optional::from(None),
        caddr: Optional::from(if addresses.is_empty() {
            None
        } else {
            Some(ExplicitContextTag9::from(Asn1SequenceOf::from(
                addresses.iter().map(Address::to_host_address).collect::<Vec<_>>(),
            )))
        }),
        authorization_data: Optional::from(None),
    });

    let cipher = encrypt(
        &service_key,
        TICKET_REP,
        None,
        &picky_asn1_der::to_vec(&ticket_enc_part).unwrap(),
    )
    .unwrap();

    let ticket = Ticket::from(TicketInner {
        tkt_vno: ExplicitContextTag0::from(IntegerAsn1::from(vec![krb5_messaging::KERBEROS_VERSION])),
        realm: ExplicitContextTag1::from(service.to_realm().unwrap()),
        sname: ExplicitContextTag2::from(service.to_principal_name().unwrap()),
        enc_part: ExplicitContextTag3::from(EncryptedData {
            etype: ExplicitContextTag0::from(IntegerAsn1::from(vec![ENCTYPE_AES256_CTS_HMAC_SHA1_96 as u8])),
            kvno: Optional::from(Some(ExplicitContextTag1::from(IntegerAsn1::from(vec![
                SERVICE_KVNO as u8,
            ])))),
            cipher: ExplicitContextTag2::from(OctetStringAsn1::from(cipher)),
        }),
    });

    let mut keytab = MemoryKeyTable::new();
    keytab.add_entry(service.clone(), SERVICE_KVNO, service_key);

    IssuedTicket {
        credentials: Credentials {
            client,
            server: service,
            keyblock: session_key,
            times: TicketTimes {
                auth_time,
                start_time: None,
                end_time,
                renew_till: None,
            },
            ticket_flags: flags,
            addresses,
            ticket: picky_asn1_der::to_vec(&ticket).unwrap(),
        },
        keytab,
    }
}

pub fn ipv4(address: [u8; 4]) -> Address {
    Address::from(Ipv4Addr::from(address))
}

/// A context keyed with `key`, bound to the given addresses, with its own replay cache.
pub fn keyed_context(key: &KeyBlock, flags: AuthContextFlags, local: [u8; 4], remote: [u8; 4]) -> AuthContext {
    let mut auth_context = AuthContext::new();
    auth_context.set_flags(flags);
    auth_context.set_key(Some(key.clone()));
    auth_context.set_addrs(Some(ipv4(local)), Some(ipv4(remote)));
    auth_context.set_rcache(Some(Arc::new(MemoryReplayCache::new(time::Duration::minutes(5)))));

    auth_context
}
