use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::address::{split_socket_addr, Address};
use crate::config::MessagingConfig;
use crate::credentials::{AuthDataEntry, AuthenticatorInfo};
use crate::crypto::{is_valid_checksum_type, is_valid_enctype, CipherState, KeyBlock, CKSUMTYPE_GSSAPI};
use crate::flags::{AuthContextFlags, GenAddrsFlags};
use crate::replay::ReplayCache;
use crate::sequence::SequenceFlags;
use crate::{Error, ErrorKind, Result};

/// Produces the application data checksummed into an AP-REQ when the caller passes none.
pub type ChecksumFunc = Box<dyn FnMut() -> Result<Vec<u8>> + Send>;

/// State shared by the messages of one session.
///
/// A context is not reentrant: callers that share it between threads serialize access themselves.
/// Only the replay cache may be shared with other contexts.
pub struct AuthContext {
    flags: AuthContextFlags,
    seq_flags: SequenceFlags,
    local_addr: Option<Address>,
    remote_addr: Option<Address>,
    local_port: Option<Address>,
    remote_port: Option<Address>,
    key: Option<KeyBlock>,
    send_subkey: Option<KeyBlock>,
    recv_subkey: Option<KeyBlock>,
    local_seq_number: u32,
    remote_seq_number: u32,
    req_cksumtype: i32,
    safe_cksumtype: i32,
    cstate: Option<CipherState>,
    rcache: Option<Arc<dyn ReplayCache>>,
    authenticator: Option<AuthenticatorInfo>,
    authorization_data: Vec<AuthDataEntry>,
    permitted_etypes: Vec<i32>,
    negotiated_etype: Option<i32>,
    checksum_func: Option<ChecksumFunc>,
    config: MessagingConfig,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::with_config(MessagingConfig::default())
    }

    pub fn with_config(config: MessagingConfig) -> Self {
        Self {
            flags: AuthContextFlags::DO_TIME,
            seq_flags: SequenceFlags::empty(),
            local_addr: None,
            remote_addr: None,
            local_port: None,
            remote_port: None,
            key: None,
            send_subkey: None,
            recv_subkey: None,
            local_seq_number: 0,
            remote_seq_number: 0,
            req_cksumtype: config.ap_req_checksum_type,
            safe_cksumtype: config.safe_checksum_type,
            cstate: None,
            rcache: None,
            authenticator: None,
            authorization_data: Vec::new(),
            permitted_etypes: config.permitted_enctypes.clone(),
            negotiated_etype: None,
            checksum_func: None,
            config,
        }
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    pub fn flags(&self) -> AuthContextFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: AuthContextFlags) {
        self.flags = flags;
    }

    /// What is known about the peer's sequence number encoding.
    pub fn seq_flags(&self) -> SequenceFlags {
        self.seq_flags
    }

    pub(crate) fn set_seq_flags(&mut self, seq_flags: SequenceFlags) {
        if seq_flags != self.seq_flags {
            debug!(old = ?self.seq_flags, new = ?seq_flags, "Peer sequence number encoding classified");
        }

        self.seq_flags = seq_flags;
    }

    pub fn set_addrs(&mut self, local_addr: Option<Address>, remote_addr: Option<Address>) {
        self.local_addr = local_addr;
        self.remote_addr = remote_addr;
    }

    pub fn addrs(&self) -> (Option<&Address>, Option<&Address>) {
        (self.local_addr.as_ref(), self.remote_addr.as_ref())
    }

    pub fn set_ports(&mut self, local_port: Option<Address>, remote_port: Option<Address>) {
        self.local_port = local_port;
        self.remote_port = remote_port;
    }

    pub fn ports(&self) -> (Option<&Address>, Option<&Address>) {
        (self.local_port.as_ref(), self.remote_port.as_ref())
    }

    /// Binds the context to the endpoints of a connection.
    ///
    /// The `*_FULL_ADDR` flags bind the port too; the plain `*_ADDR` flags clear it.
    pub fn genaddrs(&mut self, local: Option<SocketAddr>, remote: Option<SocketAddr>, flags: GenAddrsFlags) {
        let (local_addr, local_port) = endpoint(
            local,
            flags.contains(GenAddrsFlags::LOCAL_ADDR),
            flags.contains(GenAddrsFlags::LOCAL_FULL_ADDR),
        );
        let (remote_addr, remote_port) = endpoint(
            remote,
            flags.contains(GenAddrsFlags::REMOTE_ADDR),
            flags.contains(GenAddrsFlags::REMOTE_FULL_ADDR),
        );

        self.set_addrs(local_addr, remote_addr);
        self.set_ports(local_port, remote_port);
    }

    pub fn key(&self) -> Option<&KeyBlock> {
        self.key.as_ref()
    }

    /// Sets the session key (`setuseruserkey`).
    pub fn set_key(&mut self, key: Option<KeyBlock>) {
        self.key = key;
    }

    pub fn send_subkey(&self) -> Option<&KeyBlock> {
        self.send_subkey.as_ref()
    }

    pub fn set_send_subkey(&mut self, subkey: Option<KeyBlock>) {
        self.send_subkey = subkey;
    }

    pub fn recv_subkey(&self) -> Option<&KeyBlock> {
        self.recv_subkey.as_ref()
    }

    pub fn set_recv_subkey(&mut self, subkey: Option<KeyBlock>) {
        self.recv_subkey = subkey;
    }

    /// Key protecting outgoing messages: the send subkey, else the session key.
    pub fn send_key(&self) -> Option<&KeyBlock> {
        self.send_subkey.as_ref().or(self.key.as_ref())
    }

    /// Key protecting incoming messages: the receive subkey, else the session key.
    pub fn recv_key(&self) -> Option<&KeyBlock> {
        self.recv_subkey.as_ref().or(self.key.as_ref())
    }

    pub fn local_seq_number(&self) -> u32 {
        self.local_seq_number
    }

    pub fn set_local_seq_number(&mut self, seq_number: u32) {
        self.local_seq_number = seq_number;
    }

    pub fn remote_seq_number(&self) -> u32 {
        self.remote_seq_number
    }

    pub fn set_remote_seq_number(&mut self, seq_number: u32) {
        self.remote_seq_number = seq_number;
    }

    /// Authenticator sent or received by the last AP-REQ.
    pub fn authenticator(&self) -> Option<&AuthenticatorInfo> {
        self.authenticator.as_ref()
    }

    pub(crate) fn set_authenticator(&mut self, authenticator: Option<AuthenticatorInfo>) {
        self.authenticator = authenticator;
    }

    /// Authorization data of the last authenticator.
    pub fn authenticator_authorization_data(&self) -> &[AuthDataEntry] {
        self.authenticator
            .as_ref()
            .map(|authenticator| authenticator.authorization_data.as_slice())
            .unwrap_or_default()
    }

    /// Authorization data merged into the authenticator of the next AP-REQ.
    pub fn authorization_data(&self) -> &[AuthDataEntry] {
        &self.authorization_data
    }

    pub fn set_authorization_data(&mut self, authorization_data: Vec<AuthDataEntry>) {
        self.authorization_data = authorization_data;
    }

    pub fn req_cksumtype(&self) -> i32 {
        self.req_cksumtype
    }

    /// 0 selects the mandatory checksum of the session key's enctype.
    pub fn set_req_cksumtype(&mut self, cksumtype: i32) -> Result<()> {
        check_checksum_type(cksumtype, true)?;
        self.req_cksumtype = cksumtype;

        Ok(())
    }

    pub fn safe_cksumtype(&self) -> i32 {
        self.safe_cksumtype
    }

    /// 0 selects the mandatory checksum of the send key's enctype.
    pub fn set_safe_cksumtype(&mut self, cksumtype: i32) -> Result<()> {
        check_checksum_type(cksumtype, false)?;
        self.safe_cksumtype = cksumtype;

        Ok(())
    }

    pub fn rcache(&self) -> Option<&Arc<dyn ReplayCache>> {
        self.rcache.as_ref()
    }

    pub fn set_rcache(&mut self, rcache: Option<Arc<dyn ReplayCache>>) {
        self.rcache = rcache;
    }

    pub fn permitted_etypes(&self) -> &[i32] {
        &self.permitted_etypes
    }

    pub fn set_permitted_etypes(&mut self, etypes: Vec<i32>) -> Result<()> {
        if let Some(etype) = etypes.iter().find(|etype| !is_valid_enctype(**etype)) {
            return Err(Error::new(
                ErrorKind::UnsupportedEncryptionType,
                format!("unsupported encryption type: {}", etype),
            ));
        }

        self.permitted_etypes = etypes;

        Ok(())
    }

    /// Enctype chosen by the acceptor during enctype negotiation.
    pub fn negotiated_etype(&self) -> Option<i32> {
        self.negotiated_etype
    }

    pub(crate) fn set_negotiated_etype(&mut self, etype: Option<i32>) {
        self.negotiated_etype = etype;
    }

    /// Resets the cipher state for the current session key.
    pub fn init_ivector(&mut self) -> Result<()> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NoKey, "cipher state requires a session key"))?;

        self.cstate = Some(CipherState::new(key.enctype)?);

        Ok(())
    }

    pub fn ivector(&self) -> Option<&CipherState> {
        self.cstate.as_ref()
    }

    pub fn set_ivector(&mut self, cstate: Option<CipherState>) {
        self.cstate = cstate;
    }

    pub fn set_checksum_func(&mut self, func: Option<ChecksumFunc>) {
        self.checksum_func = func;
    }

    pub fn checksum_func(&mut self) -> Option<&mut ChecksumFunc> {
        self.checksum_func.as_mut()
    }
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("flags", &self.flags)
            .field("seq_flags", &self.seq_flags)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("local_port", &self.local_port)
            .field("remote_port", &self.remote_port)
            .field("key", &self.key)
            .field("send_subkey", &self.send_subkey)
            .field("recv_subkey", &self.recv_subkey)
            .field("local_seq_number", &self.local_seq_number)
            .field("remote_seq_number", &self.remote_seq_number)
            .field("req_cksumtype", &self.req_cksumtype)
            .field("safe_cksumtype", &self.safe_cksumtype)
            .field("rcache", &self.rcache)
            .field("permitted_etypes", &self.permitted_etypes)
            .field("negotiated_etype", &self.negotiated_etype)
            .field("checksum_func", &self.checksum_func.is_some())
            .finish_non_exhaustive()
    }
}

fn endpoint(socket_addr: Option<SocketAddr>, addr: bool, full: bool) -> (Option<Address>, Option<Address>) {
    match socket_addr {
        Some(socket_addr) if full => {
            let (address, port) = split_socket_addr(&socket_addr);
            (Some(address), Some(port))
        }
        Some(socket_addr) if addr => (Some(Address::from(socket_addr.ip())), None),
        _ => (None, None),
    }
}

fn check_checksum_type(cksumtype: i32, allow_gss: bool) -> Result<()> {
    if cksumtype == 0 || is_valid_checksum_type(cksumtype) || (allow_gss && cksumtype == CKSUMTYPE_GSSAPI) {
        return Ok(());
    }

    Err(Error::new(
        ErrorKind::UnsupportedChecksumType,
        format!("unsupported checksum type: {}", cksumtype),
    ))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::address::ADDRTYPE_IPPORT;

    #[test]
    fn new_context_does_time_only() {
        let context = AuthContext::new();

        assert_eq!(context.flags(), AuthContextFlags::DO_TIME);
        assert!(context.key().is_none());
        assert!(context.addrs().0.is_none());
        assert_eq!(context.permitted_etypes(), &[18, 17, 16]);
    }

    #[test]
    fn subkeys_fall_back_to_session_key() {
        let mut context = AuthContext::new();
        let session_key = KeyBlock::new(18, vec![1; 32]);
        let subkey = KeyBlock::new(18, vec![2; 32]);

        context.set_key(Some(session_key.clone()));
        context.set_send_subkey(Some(subkey.clone()));

        assert_eq!(context.send_key(), Some(&subkey));
        assert_eq!(context.recv_key(), Some(&session_key));

        context.set_send_subkey(None);
        assert_eq!(context.send_key(), Some(&session_key));
    }

    #[test]
    fn genaddrs_binds_ports_only_for_full_addresses() {
        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 4444);
        let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 88);
        let mut context = AuthContext::new();

        context.genaddrs(
            Some(local),
            Some(remote),
            GenAddrsFlags::LOCAL_FULL_ADDR | GenAddrsFlags::REMOTE_ADDR,
        );

        assert_eq!(context.addrs().0, Some(&Address::from(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(context.addrs().1, Some(&Address::from(Ipv4Addr::new(10, 0, 0, 2))));
        assert_eq!(context.ports().0.map(|port| port.addr_type), Some(ADDRTYPE_IPPORT));
        assert!(context.ports().1.is_none());
    }

    #[test]
    fn invalid_preferences_are_rejected() {
        let mut context = AuthContext::new();

        assert_eq!(
            context.set_safe_cksumtype(0x8003).unwrap_err().kind(),
            ErrorKind::UnsupportedChecksumType
        );
        context.set_req_cksumtype(0x8003).unwrap();
        assert_eq!(
            context.set_permitted_etypes(vec![18, 23]).unwrap_err().kind(),
            ErrorKind::UnsupportedEncryptionType
        );
    }

    #[test]
    fn ivector_requires_key() {
        let mut context = AuthContext::new();
        assert_eq!(context.init_ivector().unwrap_err().kind(), ErrorKind::NoKey);

        context.set_key(Some(KeyBlock::new(17, vec![0; 16])));
        context.init_ivector().unwrap();
        assert_eq!(context.ivector().unwrap().as_bytes(), &[0; 16]);
    }
}
