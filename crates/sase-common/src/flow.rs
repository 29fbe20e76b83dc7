//! Network flow keys for the route cache
//!
//! A [`FlowKey`] is a fixed-width run of 32-bit words (source address,
//! destination address and, optionally, the port pair) plus the protocol,
//! address family and routing-table index. [`PacketMeta::parse`] is the thin
//! header adapter that turns a raw frame into a key.

use crate::error::{FlowKeyError, FlowKeyResult};
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IP protocol number for TCP
pub const IPPROTO_TCP: u8 = 6;
/// IP protocol number for UDP
pub const IPPROTO_UDP: u8 = 17;
/// IP protocol number for SCTP
pub const IPPROTO_SCTP: u8 = 132;

/// Maximum key length in words (two IPv6 addresses plus the port word)
pub const KEY_WORDS: usize = 9;

const ETH_HDR_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;

/// Address family of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

impl AddressFamily {
    /// Family of an address
    #[inline]
    pub const fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }

    /// Words needed for one address
    #[inline(always)]
    pub const fn addr_words(self) -> usize {
        match self {
            Self::Ipv4 => 1,
            Self::Ipv6 => 4,
        }
    }

    /// Short label for logs and metrics
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
        }
    }
}

/// Does this protocol carry a 16-bit port pair at the start of its header?
#[inline(always)]
pub const fn has_ports(protocol: u8) -> bool {
    matches!(protocol, IPPROTO_TCP | IPPROTO_UDP | IPPROTO_SCTP)
}

/// Cache key for one directed flow.
///
/// The stale hint rides along with the key but takes no part in equality or
/// hashing: two keys that differ only in the hint name the same flow.
#[derive(Debug, Clone, Copy)]
pub struct FlowKey {
    words: [u32; KEY_WORDS],
    len: u8,
    family: AddressFamily,
    protocol: u8,
    fib: u32,
    stale_hint: bool,
}

impl FlowKey {
    /// Address-only key: every protocol between the pair shares one entry
    pub fn from_addrs(src: IpAddr, dst: IpAddr, fib: u32) -> FlowKeyResult<Self> {
        Self::build(src, dst, None, 0, fib)
    }

    /// Key including the port pair and protocol
    pub fn from_ports(
        src: IpAddr,
        dst: IpAddr,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
        fib: u32,
    ) -> FlowKeyResult<Self> {
        Self::build(src, dst, Some((src_port, dst_port)), protocol, fib)
    }

    /// Key for a parsed tuple.
    ///
    /// Ports are included only when `hash_ports` is set and the protocol has
    /// them. A TCP segment carrying RST or FIN yields a key with the stale
    /// hint set.
    pub fn from_tuple(tuple: &FlowTuple, fib: u32, hash_ports: bool) -> FlowKeyResult<Self> {
        let key = if hash_ports && has_ports(tuple.protocol) {
            Self::from_ports(
                tuple.src,
                tuple.dst,
                tuple.src_port,
                tuple.dst_port,
                tuple.protocol,
                fib,
            )?
        } else {
            Self::from_addrs(tuple.src, tuple.dst, fib)?
        };
        let closing = tuple.protocol == IPPROTO_TCP && tuple.tcp_flags.closes_connection();
        Ok(key.with_stale_hint(closing))
    }

    fn build(
        src: IpAddr,
        dst: IpAddr,
        ports: Option<(u16, u16)>,
        protocol: u8,
        fib: u32,
    ) -> FlowKeyResult<Self> {
        let family = AddressFamily::of(&src);
        if family != AddressFamily::of(&dst) {
            return Err(FlowKeyError::FamilyMismatch { src, dst });
        }

        let mut words = [0u32; KEY_WORDS];
        let mut len = write_addr(&mut words, 0, src);
        len = write_addr(&mut words, len, dst);
        if let Some((sp, dp)) = ports {
            words[len] = (u32::from(sp) << 16) | u32::from(dp);
            len += 1;
        }

        Ok(Self {
            words,
            len: len as u8,
            family,
            protocol,
            fib,
            stale_hint: false,
        })
    }

    /// Same key with the stale hint replaced
    #[inline]
    pub const fn with_stale_hint(mut self, stale: bool) -> Self {
        self.stale_hint = stale;
        self
    }

    /// Caller asked for this flow not to be cached further
    #[inline(always)]
    pub const fn stale_hint(&self) -> bool {
        self.stale_hint
    }

    /// Key words actually in use
    #[inline(always)]
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len as usize]
    }

    /// Address family
    #[inline(always)]
    pub const fn family(&self) -> AddressFamily {
        self.family
    }

    /// Protocol (zero for address-only keys)
    #[inline(always)]
    pub const fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Routing table index
    #[inline(always)]
    pub const fn fib(&self) -> u32 {
        self.fib
    }

    /// Source address
    pub fn src(&self) -> IpAddr {
        read_addr(&self.words, 0, self.family)
    }

    /// Destination address
    pub fn dst(&self) -> IpAddr {
        read_addr(&self.words, self.family.addr_words(), self.family)
    }

    /// Port pair, if the key carries one
    pub fn ports(&self) -> Option<(u16, u16)> {
        let at = 2 * self.family.addr_words();
        if (self.len as usize) > at {
            let w = self.words[at];
            Some(((w >> 16) as u16, w as u16))
        } else {
            None
        }
    }

    /// Flows that gain nothing from caching: a host talking to itself, or a
    /// destination that is unspecified, loopback, multicast or broadcast.
    pub fn is_degenerate(&self) -> bool {
        let dst = self.dst();
        if self.src() == dst {
            return true;
        }
        match dst {
            IpAddr::V4(d) => d.is_unspecified() || d.is_loopback() || d.is_multicast() || d.is_broadcast(),
            IpAddr::V6(d) => d.is_unspecified() || d.is_loopback() || d.is_multicast(),
        }
    }
}

impl PartialEq for FlowKey {
    fn eq(&self, other: &Self) -> bool {
        self.family == other.family
            && self.protocol == other.protocol
            && self.fib == other.fib
            && self.words() == other.words()
    }
}

impl Eq for FlowKey {}

impl Hash for FlowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.words().hash(state);
        self.family.hash(state);
        self.protocol.hash(state);
        self.fib.hash(state);
    }
}

fn write_addr(words: &mut [u32; KEY_WORDS], at: usize, addr: IpAddr) -> usize {
    match addr {
        IpAddr::V4(a) => {
            words[at] = u32::from(a);
            at + 1
        }
        IpAddr::V6(a) => {
            for (i, chunk) in a.octets().chunks_exact(4).enumerate() {
                words[at + i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            at + 4
        }
    }
}

fn read_addr(words: &[u32; KEY_WORDS], at: usize, family: AddressFamily) -> IpAddr {
    match family {
        AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::from(words[at])),
        AddressFamily::Ipv6 => {
            let bits = words[at..at + 4]
                .iter()
                .fold(0u128, |acc, w| (acc << 32) | u128::from(*w));
            IpAddr::V6(Ipv6Addr::from(bits))
        }
    }
}

/// TCP header flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct TcpFlags(u8);

impl TcpFlags {
    /// FIN
    pub const FIN: u8 = 0x01;
    /// SYN
    pub const SYN: u8 = 0x02;
    /// RST
    pub const RST: u8 = 0x04;
    /// PSH
    pub const PSH: u8 = 0x08;
    /// ACK
    pub const ACK: u8 = 0x10;

    /// Wrap raw header bits
    #[inline(always)]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Check if flag is set
    #[inline(always)]
    pub const fn has(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Segment ends the connection (RST or FIN)
    #[inline(always)]
    pub const fn closes_connection(&self) -> bool {
        self.has(Self::RST | Self::FIN)
    }
}

/// Parsed addressing of one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTuple {
    /// Source address
    pub src: IpAddr,
    /// Destination address
    pub dst: IpAddr,
    /// Source port (zero when the protocol has none)
    pub src_port: u16,
    /// Destination port (zero when the protocol has none)
    pub dst_port: u16,
    /// IP protocol
    pub protocol: u8,
    /// TCP flags (empty for other protocols)
    pub tcp_flags: TcpFlags,
}

/// Packet metadata for fast path
#[derive(Debug, Clone, Copy)]
pub struct PacketMeta {
    /// Addressing
    pub tuple: FlowTuple,
    /// Frame length
    pub len: u16,
    /// IP header offset
    pub ip_offset: u16,
    /// L4 header offset
    pub l4_offset: u16,
}

impl PacketMeta {
    /// Parse from raw packet (Ethernet frame)
    pub fn parse(data: &[u8]) -> FlowKeyResult<Self> {
        if data.len() < ETH_HDR_LEN {
            return Err(FlowKeyError::Truncated {
                needed: ETH_HDR_LEN,
                have: data.len(),
            });
        }

        let eth_type = u16::from_be_bytes([data[12], data[13]]);
        let ip = &data[ETH_HDR_LEN..];
        let (src, dst, protocol, ihl) = match eth_type {
            ETHERTYPE_IPV4 => {
                check_len(ip, 20)?;
                let ihl = ((ip[0] & 0x0f) as usize) * 4;
                check_len(ip, ihl.max(20))?;
                let src = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
                let dst = Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]);
                (IpAddr::V4(src), IpAddr::V4(dst), ip[9], ihl.max(20))
            }
            ETHERTYPE_IPV6 => {
                check_len(ip, 40)?;
                // Next header (extension headers are not walked)
                let protocol = ip[6];
                let mut src = [0u8; 16];
                let mut dst = [0u8; 16];
                src.copy_from_slice(&ip[8..24]);
                dst.copy_from_slice(&ip[24..40]);
                (IpAddr::V6(src.into()), IpAddr::V6(dst.into()), protocol, 40)
            }
            other => return Err(FlowKeyError::UnsupportedEtherType(other)),
        };

        let l4 = &ip[ihl..];
        let (src_port, dst_port) = if has_ports(protocol) && l4.len() >= 4 {
            (
                u16::from_be_bytes([l4[0], l4[1]]),
                u16::from_be_bytes([l4[2], l4[3]]),
            )
        } else {
            (0, 0)
        };
        let tcp_flags = if protocol == IPPROTO_TCP && l4.len() >= 14 {
            TcpFlags::from_bits(l4[13])
        } else {
            TcpFlags::default()
        };

        Ok(Self {
            tuple: FlowTuple {
                src,
                dst,
                src_port,
                dst_port,
                protocol,
                tcp_flags,
            },
            len: data.len().min(u16::MAX as usize) as u16,
            ip_offset: ETH_HDR_LEN as u16,
            l4_offset: (ETH_HDR_LEN + ihl) as u16,
        })
    }

    /// Cache key for this packet in routing table `fib`
    #[inline]
    pub fn flow_key(&self, fib: u32, hash_ports: bool) -> FlowKeyResult<FlowKey> {
        FlowKey::from_tuple(&self.tuple, fib, hash_ports)
    }
}

#[inline]
fn check_len(data: &[u8], needed: usize) -> FlowKeyResult<()> {
    if data.len() < needed {
        Err(FlowKeyError::Truncated {
            needed,
            have: data.len(),
        })
    } else {
        Ok(())
    }
}
