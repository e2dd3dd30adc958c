#![deny(unsafe_code)]
#![deny(warnings)]
//! W5500 register map and bit layouts
//!
//! Addresses follow Tables 3.1 and 3.2 of the datasheet. Register contents
//! are big-endian on the wire; the device layer converts at every 16-bit
//! get/set boundary. Bit layouts are plain shift/mask helpers, never
//! overlaid structs.

/// Number of sockets on the chip
pub const NUM_SOCKETS: usize = 8;

/// Value the version register always reads back
pub const CHIP_VERSION: u8 = 0x04;

/// Length of the header framing every SPI transfer
pub const SPI_FRAME_BYTES: usize = 3;

// Block select bits for the SPI control byte
const COMMON_BLOCK: u8 = 0x00;
const SOCKET_BLOCK: u8 = 0x01;
const SOCKET_TX_BUF: u8 = 0x02;
const SOCKET_RX_BUF: u8 = 0x03;
const SOCKET_SPACING: u8 = 0x04;

/// Block select for the common register block
pub const fn common_block() -> u8 {
    COMMON_BLOCK
}

/// Block select for socket `sn`'s register block
pub const fn socket_block(sn: u8) -> u8 {
    SOCKET_BLOCK + sn * SOCKET_SPACING
}

/// Block select for socket `sn`'s TX buffer
pub const fn socket_tx_block(sn: u8) -> u8 {
    SOCKET_TX_BUF + sn * SOCKET_SPACING
}

/// Block select for socket `sn`'s RX buffer
pub const fn socket_rx_block(sn: u8) -> u8 {
    SOCKET_RX_BUF + sn * SOCKET_SPACING
}

/// Packs the SPI control byte: block select in bits 7:3, read=0/write=1 in
/// bit 2, operation mode in bits 1:0 (always 0, variable-length data mode)
pub const fn control_byte(bsb: u8, write: bool) -> u8 {
    (bsb << 3) | ((write as u8) << 2)
}

/// Builds the 3-byte frame header: 16-bit big-endian offset address
/// followed by the control byte
pub const fn frame_header(addr: u16, bsb: u8, write: bool) -> [u8; SPI_FRAME_BYTES] {
    let a = addr.to_be_bytes();
    [a[0], a[1], control_byte(bsb, write)]
}

/// Common register block (Table 3.1)
pub mod common {
    /// [1] [RW] mode
    pub const MR: u16 = 0x00;
    /// [4] [RW] gateway address
    pub const GAR: u16 = 0x01;
    /// [4] [RW] subnet mask address
    pub const SUBR: u16 = 0x05;
    /// [6] [RW] source hardware address
    pub const SHAR: u16 = 0x09;
    /// [4] [RW] source IP address
    pub const SIPR: u16 = 0x0F;
    /// [2] [RW] interrupt low level timer
    pub const INTLEVEL: u16 = 0x13;
    /// [1] [RW] interrupt
    pub const IR: u16 = 0x15;
    /// [1] [RW] interrupt mask
    pub const IMR: u16 = 0x16;
    /// [1] [RW] socket interrupt
    pub const SIR: u16 = 0x17;
    /// [1] [RW] socket interrupt mask
    pub const SIMR: u16 = 0x18;
    /// [2] [RW] retry time
    pub const RTR: u16 = 0x19;
    /// [1] [RW] retry count
    pub const RCR: u16 = 0x1B;
    /// [1] [RW] PPP LCP request timer
    pub const PTIMER: u16 = 0x1C;
    /// [1] [RW] PPP LCP magic number
    pub const PMAGIC: u16 = 0x1D;
    /// [6] [RW] PPP destination MAC address
    pub const PHAR: u16 = 0x1E;
    /// [2] [RW] PPP session identification
    pub const PSID: u16 = 0x24;
    /// [2] [RW] PPP maximum segment size
    pub const PMRU: u16 = 0x26;
    /// [4] [R]  unreachable IP address
    pub const UIPR: u16 = 0x28;
    /// [2] [R]  unreachable port
    pub const UPORT: u16 = 0x2C;
    /// [1] [RW] PHY configuration
    pub const PHYCFGR: u16 = 0x2E;
    /// [1] [R]  chip version
    pub const VERSIONR: u16 = 0x39;
}

/// Socket register block (Table 3.2)
pub mod socket {
    /// [1] [RW] mode
    pub const SN_MR: u16 = 0x00;
    /// [1] [RW] command
    pub const SN_CR: u16 = 0x01;
    /// [1] [RW] interrupt
    pub const SN_IR: u16 = 0x02;
    /// [1] [R]  status
    pub const SN_SR: u16 = 0x03;
    /// [2] [RW] source port
    pub const SN_PORT: u16 = 0x04;
    /// [6] [RW] destination hardware address
    pub const SN_DHAR: u16 = 0x06;
    /// [4] [RW] destination IP address
    pub const SN_DIPR: u16 = 0x0C;
    /// [2] [RW] destination port
    pub const SN_DPORT: u16 = 0x10;
    /// [2] [RW] maximum segment size
    pub const SN_MSSR: u16 = 0x12;
    /// [1] [RW] IP TOS
    pub const SN_TOS: u16 = 0x15;
    /// [1] [RW] IP TTL
    pub const SN_TTL: u16 = 0x16;
    /// [1] [RW] RX buffer size
    pub const SN_RXBUF_SIZE: u16 = 0x1E;
    /// [1] [RW] TX buffer size
    pub const SN_TXBUF_SIZE: u16 = 0x1F;
    /// [2] [R]  TX free size
    pub const SN_TX_FSR: u16 = 0x20;
    /// [2] [R]  TX read pointer
    pub const SN_TX_RD: u16 = 0x22;
    /// [2] [RW] TX write pointer
    pub const SN_TX_WR: u16 = 0x24;
    /// [2] [R]  RX received size
    pub const SN_RX_RSR: u16 = 0x26;
    /// [2] [RW] RX read pointer
    pub const SN_RX_RD: u16 = 0x28;
    /// [2] [R]  RX write pointer
    pub const SN_RX_WR: u16 = 0x2A;
    /// [1] [RW] interrupt mask
    pub const SN_IMR: u16 = 0x2C;
    /// [2] [RW] fragment offset in IP header
    pub const SN_FRAG: u16 = 0x2D;
    /// [1] [RW] keep alive timer
    pub const SN_KPALVTR: u16 = 0x2F;
}

/// Socket commands written to `SN_CR`; the chip clears the register back
/// to zero once the command is accepted
pub mod command {
    pub const OPEN: u8 = 0x01;
    pub const LISTEN: u8 = 0x02;
    pub const CONNECT: u8 = 0x04;
    pub const DISCON: u8 = 0x08;
    pub const CLOSE: u8 = 0x10;
    pub const SEND: u8 = 0x20;
    pub const SEND_MAC: u8 = 0x21;
    pub const SEND_KEEP: u8 = 0x22;
    pub const RECV: u8 = 0x40;
}

/// Socket status values read from `SN_SR`
pub mod status {
    pub const CLOSED: u8 = 0x00;
    pub const INIT: u8 = 0x13;
    pub const LISTEN: u8 = 0x14;
    pub const SYNSENT: u8 = 0x15;
    pub const SYNRECV: u8 = 0x16;
    pub const ESTABLISHED: u8 = 0x17;
    pub const FIN_WAIT: u8 = 0x18;
    pub const CLOSING: u8 = 0x1A;
    pub const TIME_WAIT: u8 = 0x1B;
    pub const CLOSE_WAIT: u8 = 0x1C;
    pub const LAST_ACK: u8 = 0x1D;
    pub const UDP: u8 = 0x22;
    pub const MACRAW: u8 = 0x42;
}

/// Chip-level interrupt bits in `IR`/`IMR`
pub mod ir {
    /// Magic packet received
    pub const MP: u8 = 1 << 4;
    /// PPPoE close
    pub const PPPOE: u8 = 1 << 5;
    /// Destination unreachable
    pub const UNREACH: u8 = 1 << 6;
    /// IP conflict
    pub const CONFLICT: u8 = 1 << 7;
}

/// Decoded PHY configuration register
#[derive(Clone, Copy)]
pub struct PhyConfig(pub u8);

impl PhyConfig {
    /// Link status, true when the link is up
    pub const fn link_up(self) -> bool {
        self.0 & 0x01 != 0
    }

    /// Speed, true for 100 Mbps and false for 10 Mbps
    pub const fn speed_100(self) -> bool {
        self.0 & 0x02 != 0
    }

    /// Duplex, true for full and false for half
    pub const fn full_duplex(self) -> bool {
        self.0 & 0x04 != 0
    }

    /// Operation mode configuration bits; 0x7 means all-capable with
    /// auto-negotiation
    pub const fn op_mode_config(self) -> u8 {
        (self.0 >> 3) & 0x07
    }

    /// True when the operation mode comes from this register rather than
    /// the PMODE hardware pins
    pub const fn op_mode_from_register(self) -> bool {
        self.0 & 0x40 != 0
    }

    /// True while the PHY is held in reset (bit reads 0)
    pub const fn in_reset(self) -> bool {
        self.0 & 0x80 == 0
    }
}
