use md5::{Digest, Md5};
use picky_asn1::wrapper::{ExplicitContextTag0, ExplicitContextTag1, OctetStringAsn1};
use picky_krb::constants::cksum_types::{CRC32, HMAC_SHA1_96_AES128, HMAC_SHA1_96_AES256, HMAC_SHA1_DES3_KD, RSA_MD5};
use picky_krb::constants::etypes::{AES128_CTS_HMAC_SHA1_96, AES256_CTS_HMAC_SHA1_96, DES3_CBC_SHA1_KD};
use picky_krb::crypto::{ChecksumSuite, CipherSuite};
use picky_krb::data_types::EncryptionKey;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::utils::{decode_i32, encode_integer};
use crate::{Error, ErrorKind, Result, Secret};

pub const ENCTYPE_NULL: i32 = 0;
pub const ENCTYPE_DES3_CBC_SHA1: i32 = DES3_CBC_SHA1_KD as i32;
pub const ENCTYPE_AES128_CTS_HMAC_SHA1_96: i32 = AES128_CTS_HMAC_SHA1_96 as i32;
pub const ENCTYPE_AES256_CTS_HMAC_SHA1_96: i32 = AES256_CTS_HMAC_SHA1_96 as i32;

pub const CKSUMTYPE_CRC32: i32 = CRC32 as i32;
pub const CKSUMTYPE_RSA_MD5: i32 = RSA_MD5 as i32;
pub const CKSUMTYPE_HMAC_SHA1_DES3_KD: i32 = HMAC_SHA1_DES3_KD as i32;
pub const CKSUMTYPE_HMAC_SHA1_96_AES128: i32 = HMAC_SHA1_96_AES128 as i32;
pub const CKSUMTYPE_HMAC_SHA1_96_AES256: i32 = HMAC_SHA1_96_AES256 as i32;
/// GSS-API authenticator checksum: the caller's data is carried as is.
///
/// [RFC 4121: Authenticator Checksum](https://www.rfc-editor.org/rfc/rfc4121#section-4.1.1)
pub const CKSUMTYPE_GSSAPI: i32 = 0x8003;

/// Key usage numbers missing from `picky_krb::constants::key_usages`.
///
/// [RFC 4120: Key Usage Numbers](https://www.rfc-editor.org/rfc/rfc4120#section-7.5.1)
pub mod key_usages {
    pub const AP_REQ_AUTHENTICATOR_CKSUM: i32 = 10;
    pub const KRB_CRED_ENC_PART: i32 = 14;
    pub const KRB_SAFE_CKSUM: i32 = 15;
}

/// Checksum type metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumTypeInfo {
    pub cksumtype: i32,
    pub name: &'static str,
    pub keyed: bool,
    pub collision_proof: bool,
    /// Enctype whose keys drive the keyed checksum.
    pub enctype: i32,
}

const CHECKSUM_TYPES: &[ChecksumTypeInfo] = &[
    ChecksumTypeInfo {
        cksumtype: CKSUMTYPE_CRC32,
        name: "crc32",
        keyed: false,
        collision_proof: false,
        enctype: ENCTYPE_NULL,
    },
    ChecksumTypeInfo {
        cksumtype: CKSUMTYPE_RSA_MD5,
        name: "md5",
        keyed: false,
        collision_proof: true,
        enctype: ENCTYPE_NULL,
    },
    ChecksumTypeInfo {
        cksumtype: CKSUMTYPE_HMAC_SHA1_DES3_KD,
        name: "hmac-sha1-des3-kd",
        keyed: true,
        collision_proof: true,
        enctype: ENCTYPE_DES3_CBC_SHA1,
    },
    ChecksumTypeInfo {
        cksumtype: CKSUMTYPE_HMAC_SHA1_96_AES128,
        name: "hmac-sha1-96-aes128",
        keyed: true,
        collision_proof: true,
        enctype: ENCTYPE_AES128_CTS_HMAC_SHA1_96,
    },
    ChecksumTypeInfo {
        cksumtype: CKSUMTYPE_HMAC_SHA1_96_AES256,
        name: "hmac-sha1-96-aes256",
        keyed: true,
        collision_proof: true,
        enctype: ENCTYPE_AES256_CTS_HMAC_SHA1_96,
    },
];

pub fn checksum_type_info(cksumtype: i32) -> Option<&'static ChecksumTypeInfo> {
    CHECKSUM_TYPES.iter().find(|info| info.cksumtype == cksumtype)
}

pub fn is_valid_checksum_type(cksumtype: i32) -> bool {
    checksum_type_info(cksumtype).is_some()
}

pub fn is_keyed_checksum_type(cksumtype: i32) -> bool {
    checksum_type_info(cksumtype).is_some_and(|info| info.keyed)
}

pub fn is_collision_proof_checksum_type(cksumtype: i32) -> bool {
    checksum_type_info(cksumtype).is_some_and(|info| info.collision_proof)
}

/// Keyed checksum types usable with keys of the given enctype.
pub fn keyed_checksum_types(enctype: i32) -> Vec<i32> {
    CHECKSUM_TYPES
        .iter()
        .filter(|info| info.keyed && info.enctype == enctype)
        .map(|info| info.cksumtype)
        .collect()
}

/// [RFC 3961: Required checksum mechanism](https://www.rfc-editor.org/rfc/rfc3961#section-5.3).
pub fn mandatory_checksum_type(enctype: i32) -> Result<i32> {
    match enctype {
        ENCTYPE_AES256_CTS_HMAC_SHA1_96 => Ok(CKSUMTYPE_HMAC_SHA1_96_AES256),
        ENCTYPE_AES128_CTS_HMAC_SHA1_96 => Ok(CKSUMTYPE_HMAC_SHA1_96_AES128),
        ENCTYPE_DES3_CBC_SHA1 => Ok(CKSUMTYPE_HMAC_SHA1_DES3_KD),
        _ => Err(unsupported_enctype(enctype)),
    }
}

pub fn is_valid_enctype(enctype: i32) -> bool {
    cipher_suite(enctype).is_ok()
}

/// Length of the integrity tag at the end of every ciphertext of this enctype.
pub fn checksum_length(enctype: i32) -> Result<usize> {
    match enctype {
        ENCTYPE_AES256_CTS_HMAC_SHA1_96 | ENCTYPE_AES128_CTS_HMAC_SHA1_96 => Ok(12),
        ENCTYPE_DES3_CBC_SHA1 => Ok(20),
        _ => Err(unsupported_enctype(enctype)),
    }
}

fn block_size(enctype: i32) -> Result<usize> {
    match enctype {
        ENCTYPE_AES256_CTS_HMAC_SHA1_96 | ENCTYPE_AES128_CTS_HMAC_SHA1_96 => Ok(16),
        ENCTYPE_DES3_CBC_SHA1 => Ok(8),
        _ => Err(unsupported_enctype(enctype)),
    }
}

fn unsupported_enctype(enctype: i32) -> Error {
    Error::new(
        ErrorKind::UnsupportedEncryptionType,
        format!("unsupported encryption type: {}", enctype),
    )
}

pub(crate) fn cipher_suite(enctype: i32) -> Result<CipherSuite> {
    let etype = usize::try_from(enctype).map_err(|_| unsupported_enctype(enctype))?;

    CipherSuite::try_from(etype).map_err(|_| unsupported_enctype(enctype))
}

/// Symmetric key together with its encryption type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlock {
    pub enctype: i32,
    contents: Secret<Vec<u8>>,
}

impl KeyBlock {
    pub fn new(enctype: i32, contents: Vec<u8>) -> Self {
        Self {
            enctype,
            contents: Secret::new(contents),
        }
    }

    /// Generates a fresh random key, used for subkeys.
    pub fn random(enctype: i32) -> Result<Self> {
        let key_size = cipher_suite(enctype)?.cipher().key_size();

        let mut contents = vec![0; key_size];
        OsRng.try_fill_bytes(&mut contents)?;

        Ok(Self::new(enctype, contents))
    }

    pub fn contents(&self) -> &[u8] {
        self.contents.as_ref().as_slice()
    }

    pub fn to_encryption_key(&self) -> EncryptionKey {
        EncryptionKey {
            key_type: ExplicitContextTag0::from(encode_integer(i64::from(self.enctype))),
            key_value: ExplicitContextTag1::from(OctetStringAsn1::from(self.contents().to_vec())),
        }
    }

    pub fn from_encryption_key(key: &EncryptionKey) -> Result<Self> {
        Ok(Self::new(decode_i32(&key.key_type.0)?, key.key_value.0 .0.clone()))
    }
}

/// Chaining value tracked across successive KRB-PRIV messages of one context.
///
/// The `picky_krb` ciphers always start from a zero initial vector, so the state is not an
/// input to the encryption. Each accepted message replaces it with the last cipher block of
/// its ciphertext, which lets both peers compare where their streams stand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherState(Secret<Vec<u8>>);

impl CipherState {
    /// Fresh (all zero) state for keys of the given enctype.
    pub fn new(enctype: i32) -> Result<Self> {
        Ok(Self(Secret::new(vec![0; block_size(enctype)?])))
    }

    pub fn from_bytes(state: Vec<u8>) -> Self {
        Self(Secret::new(state))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// The chaining value is the last cipher block before the trailing integrity tag.
    fn chain(&mut self, ciphertext: &[u8], tag_len: usize) {
        let block_len = self.0.len();
        if block_len == 0 || ciphertext.len() < block_len + tag_len {
            return;
        }

        let end = ciphertext.len() - tag_len;
        self.0 = Secret::new(ciphertext[end - block_len..end].to_vec());
    }
}

pub fn encrypt(key: &KeyBlock, usage: i32, state: Option<&mut CipherState>, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_suite(key.enctype)?.cipher();

    let ciphertext = cipher.encrypt(key.contents(), usage, plaintext).map_err(|err| {
        Error::new(
            ErrorKind::EncryptFailure,
            format!("unable to encrypt with enctype {}: {:?}", key.enctype, err),
        )
    })?;

    if let Some(state) = state {
        state.chain(&ciphertext, checksum_length(key.enctype)?);
    }

    Ok(ciphertext)
}

pub fn decrypt(key: &KeyBlock, usage: i32, state: Option<&mut CipherState>, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_suite(key.enctype)?.cipher();

    let plaintext = cipher
        .decrypt(key.contents(), usage, ciphertext)
        .map_err(|err| {
            Error::new(
                ErrorKind::DecryptFailure,
                format!("unable to decrypt with enctype {}: {:?}", key.enctype, err),
            )
        })?;

    if let Some(state) = state {
        state.chain(ciphertext, checksum_length(key.enctype)?);
    }

    Ok(plaintext)
}

/// Integrity tag of a ciphertext: its trailing checksum bytes.
pub fn replay_tag_from_ciphertext(enctype: i32, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let len = checksum_length(enctype)?;
    if ciphertext.len() < len {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!("ciphertext is shorter than its checksum: {} < {}", ciphertext.len(), len),
        ));
    }

    Ok(ciphertext[ciphertext.len() - len..].to_vec())
}

/// Computes a checksum. Keyed types require a key of the matching enctype.
pub fn make_checksum(cksumtype: i32, key: Option<&KeyBlock>, usage: i32, data: &[u8]) -> Result<Vec<u8>> {
    let info = checksum_type_info(cksumtype).ok_or_else(|| {
        Error::new(
            ErrorKind::UnsupportedChecksumType,
            format!("unsupported checksum type: {}", cksumtype),
        )
    })?;

    if info.keyed {
        let key = key.ok_or_else(|| Error::new(ErrorKind::NoKey, "keyed checksum requires a key"))?;
        if key.enctype != info.enctype {
            return Err(Error::new(
                ErrorKind::InappropriateChecksum,
                format!("checksum {} cannot be used with enctype {}", info.name, key.enctype),
            ));
        }

        let suite = usize::try_from(cksumtype)
            .ok()
            .and_then(|cksumtype| ChecksumSuite::try_from(cksumtype).ok())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::UnsupportedChecksumType,
                    format!("unsupported checksum type: {}", cksumtype),
                )
            })?;

        return Ok(suite.hasher().checksum(key.contents(), usage, data)?);
    }

    match cksumtype {
        CKSUMTYPE_RSA_MD5 => Ok(Md5::digest(data).to_vec()),
        _ => Err(Error::new(
            ErrorKind::UnsupportedChecksumType,
            format!("{} checksum computation is not supported", info.name),
        )),
    }
}

pub fn verify_checksum(cksumtype: i32, key: Option<&KeyBlock>, usage: i32, data: &[u8], checksum: &[u8]) -> Result<bool> {
    let computed = make_checksum(cksumtype, key, usage, data)?;

    Ok(computed == checksum)
}
