use std::fmt;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use byteorder::{LittleEndian, WriteBytesExt};
use picky_asn1::wrapper::{ExplicitContextTag0, ExplicitContextTag1, OctetStringAsn1};
use picky_krb::constants::types::{IP_V4_ADDR_TYPE, IP_V6_ADDR_TYPE, NET_BIOS_ADDR_TYPE};
use picky_krb::data_types::HostAddress;

use crate::utils::{decode_i32, encode_integer};
use crate::{Error, ErrorKind, Result};

pub const ADDRTYPE_INET: i32 = IP_V4_ADDR_TYPE as i32;
pub const ADDRTYPE_INET6: i32 = IP_V6_ADDR_TYPE as i32;
pub const ADDRTYPE_NETBIOS: i32 = NET_BIOS_ADDR_TYPE as i32;
/// Address and port glued together by [make_full_address].
pub const ADDRTYPE_ADDRPORT: i32 = 0x0100;
/// A bare port in network byte order.
pub const ADDRTYPE_IPPORT: i32 = 0x0101;

/// Network address as carried in Kerberos messages.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub addr_type: i32,
    pub contents: Vec<u8>,
}

impl Address {
    pub fn new(addr_type: i32, contents: Vec<u8>) -> Self {
        Self { addr_type, contents }
    }

    pub fn ip_port(port: u16) -> Self {
        Self::new(ADDRTYPE_IPPORT, port.to_be_bytes().to_vec())
    }

    pub fn netbios(name: &str) -> Self {
        Self::new(ADDRTYPE_NETBIOS, name.as_bytes().to_vec())
    }

    pub fn to_host_address(&self) -> HostAddress {
        HostAddress {
            addr_type: ExplicitContextTag0::from(encode_integer(i64::from(self.addr_type))),
            address: ExplicitContextTag1::from(OctetStringAsn1::from(self.contents.clone())),
        }
    }

    pub fn from_host_address(host_address: &HostAddress) -> Result<Self> {
        Ok(Self {
            addr_type: decode_i32(&host_address.addr_type.0)?,
            contents: host_address.address.0 .0.clone(),
        })
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(ip) => Self::new(ADDRTYPE_INET, ip.octets().to_vec()),
            IpAddr::V6(ip) => Self::new(ADDRTYPE_INET6, ip.octets().to_vec()),
        }
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Self::from(IpAddr::V4(ip))
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Self::from(IpAddr::V6(ip))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.addr_type, self.contents.len()) {
            (ADDRTYPE_INET, 4) => {
                let octets: [u8; 4] = [self.contents[0], self.contents[1], self.contents[2], self.contents[3]];
                write!(f, "Address({})", Ipv4Addr::from(octets))
            }
            (ADDRTYPE_IPPORT, 2) => write!(
                f,
                "Address(port {})",
                u16::from_be_bytes([self.contents[0], self.contents[1]])
            ),
            (addr_type, _) => write!(f, "Address({:#06x}, {:02x?})", addr_type, self.contents),
        }
    }
}

/// Glues an address and a port into a single `ADDRTYPE_ADDRPORT` address.
///
/// Layout (integers little-endian):
/// ```not_rust
/// 0x00 0x00 | addrtype: u16 | length: u32 | address | 0x00 0x00 | porttype: u16 | length: u32 | port
/// ```
pub fn make_full_address(address: &Address, port: &Address) -> Result<Address> {
    if port.addr_type != ADDRTYPE_IPPORT {
        return Err(Error::new(
            ErrorKind::InvalidParameter,
            format!("unsupported port address type: {:#06x}", port.addr_type),
        ));
    }

    let mut contents = Vec::with_capacity(address.contents.len() + port.contents.len() + 16);
    write_address_part(&mut contents, address)?;
    write_address_part(&mut contents, port)?;

    Ok(Address::new(ADDRTYPE_ADDRPORT, contents))
}

fn write_address_part(mut buffer: impl Write, address: &Address) -> Result<()> {
    let addr_type = u16::try_from(address.addr_type)
        .map_err(|_| Error::new(ErrorKind::InvalidParameter, "address type does not fit into 16 bits"))?;
    let length = u32::try_from(address.contents.len())
        .map_err(|_| Error::new(ErrorKind::InvalidParameter, "address is too long"))?;

    buffer.write_u16::<LittleEndian>(0)?;
    buffer.write_u16::<LittleEndian>(addr_type)?;
    buffer.write_u32::<LittleEndian>(length)?;
    buffer.write_all(&address.contents)?;

    Ok(())
}

/// Returns `true` when the address is in the list or when the list is empty.
pub fn address_search(address: &Address, list: &[Address]) -> bool {
    list.is_empty() || list.iter().any(|candidate| candidate == address)
}

/// Host address enumeration: the hostname's resolved addresses plus loopback.
pub fn os_local_addresses() -> Vec<Address> {
    let mut addresses = vec![
        Address::from(Ipv4Addr::LOCALHOST),
        Address::from(Ipv6Addr::LOCALHOST),
    ];

    match whoami::fallible::hostname() {
        Ok(hostname) => match (hostname.as_str(), 0).to_socket_addrs() {
            Ok(resolved) => {
                for socket_addr in resolved {
                    let address = Address::from(socket_addr.ip());
                    if !addresses.contains(&address) {
                        addresses.push(address);
                    }
                }
            }
            Err(err) => debug!(?err, %hostname, "unable to resolve local hostname"),
        },
        Err(err) => debug!(?err, "unable to query local hostname"),
    }

    addresses
}

/// Splits a socket address into address and port addresses.
pub(crate) fn split_socket_addr(socket_addr: &SocketAddr) -> (Address, Address) {
    (Address::from(socket_addr.ip()), Address::ip_port(socket_addr.port()))
}
