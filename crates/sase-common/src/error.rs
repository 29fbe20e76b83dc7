//! Error types for flow key extraction

use std::net::IpAddr;
use thiserror::Error;

/// Flow key extraction error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowKeyError {
    /// Source and destination belong to different address families
    #[error("address family mismatch: {src} -> {dst}")]
    FamilyMismatch {
        /// Source address
        src: IpAddr,
        /// Destination address
        dst: IpAddr,
    },

    /// Packet shorter than the headers it claims to carry
    #[error("truncated packet: need {needed} bytes, have {have}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes available
        have: usize,
    },

    /// Ethernet payload is neither IPv4 nor IPv6
    #[error("unsupported ethertype {0:#06x}")]
    UnsupportedEtherType(u16),
}

/// Result type for key extraction
pub type FlowKeyResult<T> = Result<T, FlowKeyError>;
