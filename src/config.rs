use std::env;
use std::net::IpAddr;
use std::path::Path;

use crate::address::{os_local_addresses, Address};
use crate::crypto::{
    is_valid_checksum_type, ENCTYPE_AES128_CTS_HMAC_SHA1_96, ENCTYPE_AES256_CTS_HMAC_SHA1_96, ENCTYPE_DES3_CBC_SHA1,
};
use crate::krb::Krb5Conf;
use crate::{Error, ErrorKind, Result};

pub const KRB5_CONFIG_ENV: &str = "KRB5_CONFIG";
pub const DEFAULT_KRB5_CONFIG: &str = "/etc/krb5.conf:/usr/local/etc/krb5.conf";

/// Maximum allowed clock difference between peers (five minutes, as in MIT krb5).
pub const DEFAULT_CLOCKSKEW: time::Duration = time::Duration::seconds(300);

/// Process-level defaults of the `[libdefaults]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingConfig {
    pub clockskew: time::Duration,
    /// Checksum type of KRB-SAFE messages. 0 selects the enctype's mandatory type.
    pub safe_checksum_type: i32,
    /// Checksum type of AP-REQ authenticators. 0 selects the enctype's mandatory type.
    pub ap_req_checksum_type: i32,
    /// Enctypes in order of preference.
    pub permitted_enctypes: Vec<i32>,
    pub replay_lifespan: time::Duration,
    /// Addresses that count as local on top of the interface addresses.
    pub extra_addresses: Vec<Address>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            clockskew: DEFAULT_CLOCKSKEW,
            safe_checksum_type: 0,
            ap_req_checksum_type: 0,
            permitted_enctypes: vec![
                ENCTYPE_AES256_CTS_HMAC_SHA1_96,
                ENCTYPE_AES128_CTS_HMAC_SHA1_96,
                ENCTYPE_DES3_CBC_SHA1,
            ],
            replay_lifespan: DEFAULT_CLOCKSKEW,
            extra_addresses: Vec::new(),
        }
    }
}

impl MessagingConfig {
    /// Loads the first existing file of the `KRB5_CONFIG` path list.
    ///
    /// Falls back to the defaults when no file exists.
    #[instrument(level = "debug", ret)]
    pub fn from_env() -> Result<Self> {
        let paths = env::var(KRB5_CONFIG_ENV).unwrap_or_else(|_| DEFAULT_KRB5_CONFIG.to_owned());

        for path in paths.split(':').filter(|path| !path.is_empty()) {
            if let Some(krb5_conf) = Krb5Conf::from_file(Path::new(path))? {
                debug!(path, "Using Kerberos configuration file");

                return Self::from_krb5_conf(&krb5_conf);
            }
        }

        debug!("No Kerberos configuration file found, using defaults");

        Ok(Self::default())
    }

    pub fn from_krb5_conf_data(data: &str) -> Result<Self> {
        Self::from_krb5_conf(&Krb5Conf::from_data(data)?)
    }

    pub fn from_krb5_conf(krb5_conf: &Krb5Conf) -> Result<Self> {
        let mut config = Self::default();

        if let Some(clockskew) = krb5_conf.get_value(&["libdefaults", "clockskew"]) {
            config.clockskew = time::Duration::seconds(parse_number(clockskew, "clockskew")?);
            config.replay_lifespan = config.clockskew;
        }

        if let Some(cksumtype) = krb5_conf.get_value(&["libdefaults", "safe_checksum_type"]) {
            config.safe_checksum_type = parse_checksum_type(cksumtype)?;
        }

        if let Some(cksumtype) = krb5_conf.get_value(&["libdefaults", "ap_req_checksum_type"]) {
            config.ap_req_checksum_type = parse_checksum_type(cksumtype)?;
        }

        if let Some(enctypes) = krb5_conf.get_value(&["libdefaults", "permitted_enctypes"]) {
            config.permitted_enctypes = parse_enctype_list(enctypes)?;
        }

        for addresses in krb5_conf.get_values(&["libdefaults", "extra_addresses"]) {
            for address in split_list(addresses) {
                let ip: IpAddr = address.parse().map_err(|err| {
                    Error::new(
                        ErrorKind::InvalidParameter,
                        format!("invalid extra address {}: {:?}", address, err),
                    )
                })?;
                config.extra_addresses.push(Address::from(ip));
            }
        }

        Ok(config)
    }

    /// Interface addresses of this host plus the configured extra addresses.
    pub fn local_addresses(&self) -> Vec<Address> {
        let mut addresses = os_local_addresses();
        addresses.extend(self.extra_addresses.iter().cloned());

        addresses
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(|c: char| c == ',' || c.is_ascii_whitespace())
        .filter(|item| !item.is_empty())
}

fn parse_number(value: &str, name: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|err| Error::new(ErrorKind::InvalidParameter, format!("invalid {} value {}: {:?}", name, value, err)))
}

fn parse_checksum_type(value: &str) -> Result<i32> {
    let cksumtype = i32::try_from(parse_number(value, "checksum type")?)
        .map_err(|_| Error::new(ErrorKind::InvalidParameter, format!("invalid checksum type: {}", value)))?;

    if cksumtype != 0 && !is_valid_checksum_type(cksumtype) {
        return Err(Error::new(
            ErrorKind::UnsupportedChecksumType,
            format!("unsupported checksum type: {}", cksumtype),
        ));
    }

    Ok(cksumtype)
}

/// Parses an enctype name or number.
pub fn parse_enctype(name: &str) -> Result<i32> {
    match name.to_ascii_lowercase().as_str() {
        "aes256-cts-hmac-sha1-96" | "aes256-cts" => Ok(ENCTYPE_AES256_CTS_HMAC_SHA1_96),
        "aes128-cts-hmac-sha1-96" | "aes128-cts" => Ok(ENCTYPE_AES128_CTS_HMAC_SHA1_96),
        "des3-cbc-sha1" | "des3-hmac-sha1" | "des3-cbc-sha1-kd" => Ok(ENCTYPE_DES3_CBC_SHA1),
        other => other.parse().map_err(|_| {
            Error::new(
                ErrorKind::UnsupportedEncryptionType,
                format!("unknown encryption type: {}", name),
            )
        }),
    }
}

pub fn parse_enctype_list(value: &str) -> Result<Vec<i32>> {
    let mut enctypes = Vec::new();
    for name in split_list(value) {
        let enctype = parse_enctype(name)?;
        if !enctypes.contains(&enctype) {
            enctypes.push(enctype);
        }
    }

    Ok(enctypes)
}
