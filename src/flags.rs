use bitflags::bitflags;

bitflags! {
    /// Controls which replay protection an [AuthContext](crate::auth_context::AuthContext) applies
    /// to KRB-SAFE, KRB-PRIV and KRB-CRED messages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct AuthContextFlags: u32 {
        /// Put a timestamp into outgoing messages, check it and the replay cache on receipt.
        const DO_TIME = 0x00000001;
        /// Report the message timestamp to the caller.
        const RET_TIME = 0x00000002;
        /// Put a sequence number into outgoing messages and check it on receipt.
        const DO_SEQUENCE = 0x00000004;
        /// Report the message sequence number to the caller.
        const RET_SEQUENCE = 0x00000008;
        const PERMIT_ALL = 0x00000010;
        /// The acceptor negotiated an enctype other than the ticket's one and must send a subkey.
        const USE_SUBKEY = 0x00000020;
    }
}

bitflags! {
    /// This flags appears in the application request (KRB_AP_REQ) and
    /// affects the way the request is processed.
    ///
    /// The two lowest bits never go on the wire: they only drive [mk_req_extended](crate::ap::mk_req_extended).
    ///
    /// [APOptions](https://www.rfc-editor.org/rfc/rfc4120#section-5.5.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ApOptions: u32 {
        const USE_SESSION_KEY = 0x40000000;
        const MUTUAL_REQUIRED = 0x20000000;
        /// Send an ETYPE-NEGOTIATION authorization data element (RFC 4537).
        const ETYPE_NEGOTIATION = 0x00000002;
        /// Generate a subkey and put it into the authenticator.
        const USE_SUBKEY = 0x00000001;
    }
}

impl ApOptions {
    const WIRE_MASK: u32 = 0xfffffff0;

    /// Options as they are encoded into the AP-REQ.
    pub fn wire_bits(self) -> u32 {
        self.bits() & Self::WIRE_MASK
    }
}

bitflags! {
    /// Selects the addresses [AuthContext::genaddrs](crate::auth_context::AuthContext::genaddrs) derives from a connection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct GenAddrsFlags: u32 {
        const LOCAL_ADDR = 0x00000001;
        const REMOTE_ADDR = 0x00000002;
        /// Local address plus port.
        const LOCAL_FULL_ADDR = 0x00000004;
        /// Remote address plus port.
        const REMOTE_FULL_ADDR = 0x00000008;
    }
}

bitflags! {
    /// [TicketFlags](https://www.rfc-editor.org/rfc/rfc4120#section-5.3)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct TicketFlags: u32 {
        const FORWARDABLE = 0x40000000;
        const FORWARDED = 0x20000000;
        const PROXIABLE = 0x10000000;
        const PROXY = 0x08000000;
        const MAY_POSTDATE = 0x04000000;
        const POSTDATED = 0x02000000;
        const INVALID = 0x01000000;
        const RENEWABLE = 0x00800000;
        const INITIAL = 0x00400000;
        const PRE_AUTHENT = 0x00200000;
        const HW_AUTHENT = 0x00100000;
        const TRANSIT_POLICY_CHECKED = 0x00080000;
        const OK_AS_DELEGATE = 0x00040000;
        const ANONYMOUS = 0x00008000;
    }
}
