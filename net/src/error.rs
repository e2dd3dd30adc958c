#![deny(unsafe_code)]
#![deny(warnings)]
//! Network error types

/// Network operation errors
///
/// One enum spans the transport, socket, DHCP, and MQTT layers so every
/// operation can propagate with `?` and the protocol state machines can
/// treat any failure as "log, abandon the attempt, retry from scratch".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkError {
    /// SPI bus transfer failed
    Spi,
    /// Chip version register did not read back the expected value
    ChipVersion,
    /// Not enough free space in the socket TX buffer
    TxOverflow,
    /// Received data larger than the caller's buffer
    RxOverflow,
    /// Socket status did not reach the expected value in time
    StatusTimeout,
    /// TCP connection was not established in time
    ConnectTimeout,
    /// Send completion interrupt did not arrive in time
    SendTimeout,
    /// No data arrived in time
    RecvTimeout,
    /// Peer closed the connection or the chip reported a socket timeout
    SocketDisconnected,
    /// Socket event set was still in use when the socket was opened
    EventSetInUse,
    /// DHCP reply opcode was not BOOTREPLY
    DhcpBadOpcode,
    /// DHCP reply did not carry the option magic cookie
    DhcpNoCookie,
    /// DHCP reply carried no message-type option
    DhcpMissingType,
    /// A DHCP option had an invalid length
    DhcpCorruptOption,
    /// MQTT reply was not a well-formed CONNACK
    MqttBadPacket,
    /// MQTT broker refused the connection
    MqttConRefused,
}

impl core::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Spi => write!(f, "SPI transfer failed"),
            Self::ChipVersion => write!(f, "unexpected chip version"),
            Self::TxOverflow => write!(f, "TX buffer overflow"),
            Self::RxOverflow => write!(f, "RX buffer overflow"),
            Self::StatusTimeout => write!(f, "socket status timeout"),
            Self::ConnectTimeout => write!(f, "connect timeout"),
            Self::SendTimeout => write!(f, "send timeout"),
            Self::RecvTimeout => write!(f, "receive timeout"),
            Self::SocketDisconnected => write!(f, "socket disconnected"),
            Self::EventSetInUse => write!(f, "socket event set in use"),
            Self::DhcpBadOpcode => write!(f, "DHCP reply with bad opcode"),
            Self::DhcpNoCookie => write!(f, "DHCP reply without magic cookie"),
            Self::DhcpMissingType => write!(f, "DHCP reply without message type"),
            Self::DhcpCorruptOption => write!(f, "DHCP option corrupt"),
            Self::MqttBadPacket => write!(f, "malformed MQTT packet"),
            Self::MqttConRefused => write!(f, "MQTT connection refused"),
        }
    }
}

// Implement core::error::Error for no_std compatibility
impl core::error::Error for NetworkError {}
