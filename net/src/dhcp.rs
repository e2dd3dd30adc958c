#![deny(unsafe_code)]
#![deny(warnings)]
//! DHCP client
//!
//! A from-scratch client for a single interface, covering the
//! INIT/SELECTING/REQUESTING/BOUND/RENEWING walk of RFC 2131 figure 5.
//! Messages are built and parsed in place in one 548-byte buffer; every
//! field crosses the wire in network byte order through explicit
//! conversions. Any failed exchange falls back to INIT and starts over
//! with a fresh DISCOVER.
//!
//! The state machine advances one transition per [`DhcpClient::step`]
//! call. Waiting out the lease in BOUND belongs to the task driving the
//! client, which is also where address-dependent work gets gated on and
//! off.

use embassy_time::{Duration, Instant, Timer};
use embedded_hal_async::spi::SpiDevice;

use crate::addr::{Ipv4Addr, MacAddress};
use crate::client::NetworkClient;
use crate::device::W5500;
use crate::error::NetworkError;
use crate::socket::{Protocol, Socket, SocketId};

/// UDP source port the client binds
const CLIENT_PORT: u16 = 68;
/// UDP port DHCP servers listen on
const SERVER_PORT: u16 = 67;
/// Hardware type for option 61 and the BOOTP header
const HTYPE_ETHERNET: u8 = 1;
/// Option field magic cookie, RFC 2131 section 3
const COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
/// Milliseconds per lease tick
const TICK_HZ: u32 = 1000;
/// Session transaction identifier, arbitrary but stable
const XID: u32 = 1_428_032_432;

/// Total message size: 236-byte BOOTP header plus cookie and options
pub const MESSAGE_BYTES: usize = 548;

/// BOOTP header field offsets
pub mod field {
    /// [1] operation code
    pub const OP: usize = 0;
    /// [1] hardware type
    pub const HTYPE: usize = 1;
    /// [1] hardware address length
    pub const HLEN: usize = 2;
    /// [1] relay hop count
    pub const HOPS: usize = 3;
    /// [4] transaction identifier
    pub const XID: usize = 4;
    /// [2] seconds since acquisition started
    pub const SECS: usize = 8;
    /// [2] flags
    pub const FLAGS: usize = 10;
    /// [4] client IP address
    pub const CIADDR: usize = 12;
    /// [4] "your" IP address
    pub const YIADDR: usize = 16;
    /// [4] next server IP address
    pub const SIADDR: usize = 20;
    /// [4] relay agent IP address
    pub const GIADDR: usize = 24;
    /// [16] client hardware address
    pub const CHADDR: usize = 28;
    /// [64] server host name
    pub const SNAME: usize = 44;
    /// [128] boot file name
    pub const FILE: usize = 108;
    /// [312] cookie and options
    pub const OPTIONS: usize = 236;
}

/// Option codes from RFC 2132
pub mod option {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS_SERVER: u8 = 6;
    pub const HOST_NAME: u8 = 12;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const PARAM_REQUEST: u8 = 55;
    pub const RENEWAL_TIME: u8 = 58;
    pub const REBINDING_TIME: u8 = 59;
    pub const CLIENT_ID: u8 = 61;
    pub const END: u8 = 255;
}

/// BOOTP operation codes
pub mod op {
    pub const BOOTREQUEST: u8 = 1;
    pub const BOOTREPLY: u8 = 2;
}

/// Message types carried in option 53
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
    Unknown(u8),
}

impl MessageType {
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            other => Self::Unknown(other),
        }
    }

    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
            Self::Unknown(other) => other,
        }
    }
}

/// Client states from RFC 2131 figure 5.
///
/// The reboot and rebind walks are declared for completeness but never
/// entered; reaching one restarts acquisition from `Init`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DhcpState {
    Init,
    Selecting,
    Requesting,
    InitReboot,
    Rebooting,
    Bound,
    Renewing,
    Rebinding,
}

/// One DHCP message in wire layout
pub struct Message {
    buf: [u8; MESSAGE_BYTES],
}

impl Message {
    pub const fn new() -> Self {
        Self {
            buf: [0; MESSAGE_BYTES],
        }
    }

    /// Clears the buffer and writes the BOOTREQUEST header for `mac`,
    /// returning a writer positioned just past the option magic cookie
    pub fn prepare(&mut self, mac: MacAddress, xid: u32) -> OptionWriter<'_> {
        self.buf = [0; MESSAGE_BYTES];
        self.buf[field::OP] = op::BOOTREQUEST;
        self.buf[field::HTYPE] = HTYPE_ETHERNET;
        self.buf[field::HLEN] = mac.octets.len() as u8;
        self.buf[field::XID..field::XID + 4].copy_from_slice(&xid.to_be_bytes());
        self.buf[field::CHADDR..field::CHADDR + 6].copy_from_slice(&mac.octets);
        self.buf[field::OPTIONS..field::OPTIONS + COOKIE.len()].copy_from_slice(&COOKIE);
        OptionWriter {
            buf: &mut self.buf,
            at: field::OPTIONS + COOKIE.len(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn opcode(&self) -> u8 {
        self.buf[field::OP]
    }

    /// Address offered to us in a reply
    pub fn yiaddr(&self) -> Ipv4Addr {
        Ipv4Addr::from_octets([
            self.buf[field::YIADDR],
            self.buf[field::YIADDR + 1],
            self.buf[field::YIADDR + 2],
            self.buf[field::YIADDR + 3],
        ])
    }

    /// Scans the option field for `code` and returns its payload.
    ///
    /// PAD octets are skipped, the scan stops at END or the end of the
    /// buffer, and a payload running off the buffer counts as absent.
    pub fn find_option(&self, code: u8) -> Option<&[u8]> {
        let opts = &self.buf[field::OPTIONS..];
        let mut at = COOKIE.len();
        while at < opts.len() {
            let current = opts[at];
            at += 1;
            if current == option::PAD {
                continue;
            }
            if current == option::END || at >= opts.len() {
                return None;
            }
            let len = opts[at] as usize;
            at += 1;
            if current == code {
                if at + len > opts.len() {
                    return None;
                }
                return Some(&opts[at..at + len]);
            }
            at += len;
        }
        None
    }

    /// Validates a reply's envelope and returns its message type
    pub fn reply_type(&self) -> Result<MessageType, NetworkError> {
        if self.opcode() != op::BOOTREPLY {
            return Err(NetworkError::DhcpBadOpcode);
        }
        if self.buf[field::OPTIONS..field::OPTIONS + COOKIE.len()] != COOKIE {
            return Err(NetworkError::DhcpNoCookie);
        }
        let kind = self
            .find_option(option::MESSAGE_TYPE)
            .ok_or(NetworkError::DhcpMissingType)?;
        // length must be one (RFC 2132)
        if kind.len() != 1 {
            return Err(NetworkError::DhcpCorruptOption);
        }
        Ok(MessageType::from_byte(kind[0]))
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends options to a prepared message
pub struct OptionWriter<'m> {
    buf: &'m mut [u8; MESSAGE_BYTES],
    at: usize,
}

impl OptionWriter<'_> {
    /// Appends one option with its length octet and payload
    pub fn option(&mut self, code: u8, data: &[u8]) {
        self.buf[self.at] = code;
        self.buf[self.at + 1] = data.len() as u8;
        self.buf[self.at + 2..self.at + 2 + data.len()].copy_from_slice(data);
        self.at += 2 + data.len();
    }

    /// Terminates the option list
    pub fn end(&mut self) {
        self.buf[self.at] = option::END;
    }
}

/// Tick count for a lease of `seconds`, de-rated by an eighth so renewal
/// lands well before expiry, and clamped to the timer range
pub fn lease_ticks(seconds: u32, tick_hz: u32) -> u32 {
    let derated = seconds - (seconds >> 3);
    derated.saturating_mul(tick_hz)
}

/// DHCP client tuning
#[derive(Clone)]
pub struct DhcpConfig {
    /// Transaction identifier for the session's exchanges
    pub xid: u32,
    /// Host name sent with option 12
    pub hostname: &'static str,
    /// Socket open and close timeout
    pub socket_timeout: Duration,
    /// Send completion timeout
    pub send_timeout: Duration,
    /// Reply wait timeout
    pub recv_timeout: Duration,
    /// Hold-off after a failed INIT exchange
    pub retry_delay: Duration,
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            xid: XID,
            hostname: "ambient1",
            socket_timeout: Duration::from_millis(100),
            send_timeout: Duration::from_millis(100),
            recv_timeout: Duration::from_millis(100),
            retry_delay: Duration::from_millis(3000),
        }
    }
}

/// DHCP client driving one UDP socket
pub struct DhcpClient<'d, SPI> {
    dev: &'d W5500<SPI>,
    sock: Socket<'d, SPI>,
    config: DhcpConfig,
    state: DhcpState,
    client_ip: Ipv4Addr,
    server_ip: Ipv4Addr,
    lease_start: Instant,
    lease: Duration,
    msg: Message,
}

impl<'d, SPI: SpiDevice> DhcpClient<'d, SPI> {
    pub fn new(dev: &'d W5500<SPI>, socket: SocketId, config: DhcpConfig) -> Self {
        Self {
            dev,
            sock: dev.socket(socket),
            config,
            state: DhcpState::Init,
            client_ip: Ipv4Addr::UNSPECIFIED,
            server_ip: Ipv4Addr::UNSPECIFIED,
            lease_start: Instant::now(),
            lease: Duration::from_ticks(0),
            msg: Message::new(),
        }
    }

    pub fn state(&self) -> DhcpState {
        self.state
    }

    /// Address assigned by the server, valid once bound
    pub fn client_ip(&self) -> Ipv4Addr {
        self.client_ip
    }

    /// Server the last reply came from
    pub fn server_ip(&self) -> Ipv4Addr {
        self.server_ip
    }

    /// Time left on the current lease, after the renewal margin
    pub fn lease_remaining(&self) -> Duration {
        self.lease
            .checked_sub(self.lease_start.elapsed())
            .unwrap_or(Duration::from_ticks(0))
    }

    /// Advances the state machine by one transition.
    ///
    /// In [`DhcpState::Bound`] the single transition is sending the
    /// renewal REQUEST; waiting out the lease first is the caller's
    /// business, via [`lease_remaining`](Self::lease_remaining).
    pub async fn step(&mut self) {
        debug!("State: {}", self.state);
        match self.state {
            DhcpState::Init => self.handle_init().await,
            DhcpState::Selecting => self.handle_selecting().await,
            DhcpState::Requesting => self.handle_requesting().await,
            DhcpState::Bound => self.handle_bound().await,
            DhcpState::Renewing => self.handle_renewing().await,
            _ => {
                error!("UNHANDLED DHCP STATE {}", self.state);
                self.state = DhcpState::Init;
            }
        }
    }

    /// Clears the chip's addressing and points the socket at the local
    /// broadcast for the acquisition exchanges
    async fn initialize(&mut self) -> Result<(), NetworkError> {
        self.dev.set_source_ip(Ipv4Addr::UNSPECIFIED).await?;
        self.dev.set_gateway(Ipv4Addr::UNSPECIFIED).await?;
        self.dev.set_subnet(Ipv4Addr::UNSPECIFIED).await?;
        self.sock.set_destination(Ipv4Addr::BROADCAST, SERVER_PORT).await
    }

    async fn handle_init(&mut self) {
        if let Err(err) = self.initialize().await {
            error!("DHCP initialize failed: {}", err);
            Timer::after(self.config.retry_delay).await;
            return;
        }
        if let Err(err) = self.send_discover().await {
            error!("DHCP DISCOVER failed: {}", err);
            Timer::after(self.config.retry_delay).await;
            return;
        }
        self.state = DhcpState::Selecting;
    }

    async fn handle_selecting(&mut self) {
        match self.receive().await {
            Ok(MessageType::Offer) => {
                self.client_ip = self.msg.yiaddr();
                if let Err(err) = self.send_request().await {
                    error!("DHCP REQUEST failed: {}", err);
                    self.state = DhcpState::Init;
                    return;
                }
                self.state = DhcpState::Requesting;
            }
            Ok(other) => {
                error!("bad reply for {}: {}", self.state, other);
                self.state = DhcpState::Init;
            }
            Err(NetworkError::RecvTimeout) => {
                warn!("DHCP SELECTING timeout");
                self.state = DhcpState::Init;
            }
            Err(err) => {
                error!("DHCP receive failed: {}", err);
                self.state = DhcpState::Init;
            }
        }
    }

    async fn handle_requesting(&mut self) {
        match self.receive().await {
            Ok(MessageType::Ack) => match self.accept_ack().await {
                Ok(()) => self.state = DhcpState::Bound,
                Err(err) => {
                    error!("DHCP ACK rejected: {}", err);
                    self.state = DhcpState::Init;
                }
            },
            Ok(MessageType::Nak) => self.state = DhcpState::Init,
            Ok(other) => {
                error!("bad reply for {}: {}", self.state, other);
                self.state = DhcpState::Init;
            }
            Err(NetworkError::RecvTimeout) => {
                warn!("DHCP REQUESTING timeout");
                self.state = DhcpState::Init;
            }
            Err(err) => {
                error!("DHCP receive failed: {}", err);
                self.state = DhcpState::Init;
            }
        }
    }

    /// The lease has run out; ask the server for another term
    async fn handle_bound(&mut self) {
        match self.send_request().await {
            Ok(()) => self.state = DhcpState::Renewing,
            Err(err) => {
                error!("DHCP renewal REQUEST failed: {}", err);
                self.state = DhcpState::Init;
            }
        }
    }

    async fn handle_renewing(&mut self) {
        match self.receive().await {
            Ok(MessageType::Ack) => match self.record_lease() {
                Ok(()) => self.state = DhcpState::Bound,
                Err(err) => {
                    error!("DHCP ACK rejected: {}", err);
                    self.state = DhcpState::Init;
                }
            },
            Ok(MessageType::Nak) => self.state = DhcpState::Init,
            Ok(other) => {
                error!("bad reply for {}: {}", self.state, other);
                self.state = DhcpState::Init;
            }
            Err(NetworkError::RecvTimeout) => {
                warn!("DHCP RENEWING timeout");
                self.state = DhcpState::Init;
            }
            Err(err) => {
                error!("DHCP receive failed: {}", err);
                self.state = DhcpState::Init;
            }
        }
    }

    async fn send_discover(&mut self) -> Result<(), NetworkError> {
        self.sock
            .open(Protocol::Udp, CLIENT_PORT, self.config.socket_timeout)
            .await?;

        let mac = self.dev.mac();
        let mut client_id = [0u8; 7];
        client_id[0] = HTYPE_ETHERNET;
        client_id[1..].copy_from_slice(&mac.octets);

        let mut opts = self.msg.prepare(mac, self.config.xid);
        opts.option(option::MESSAGE_TYPE, &[MessageType::Discover.to_byte()]);
        opts.option(option::CLIENT_ID, &client_id);
        opts.option(option::HOST_NAME, self.config.hostname.as_bytes());
        opts.end();

        self.sock.send(self.msg.as_bytes(), self.config.send_timeout).await
    }

    async fn send_request(&mut self) -> Result<(), NetworkError> {
        self.sock
            .open(Protocol::Udp, CLIENT_PORT, self.config.socket_timeout)
            .await?;

        let mac = self.dev.mac();
        let mut client_id = [0u8; 7];
        client_id[0] = HTYPE_ETHERNET;
        client_id[1..].copy_from_slice(&mac.octets);

        let mut opts = self.msg.prepare(mac, self.config.xid);
        opts.option(option::MESSAGE_TYPE, &[MessageType::Request.to_byte()]);
        opts.option(option::CLIENT_ID, &client_id);
        opts.option(option::HOST_NAME, self.config.hostname.as_bytes());
        opts.option(
            option::PARAM_REQUEST,
            &[
                option::SUBNET_MASK,
                option::ROUTER,
                option::DNS_SERVER,
                option::RENEWAL_TIME,
                option::REBINDING_TIME,
            ],
        );
        opts.option(option::REQUESTED_IP, &self.client_ip.octets);
        opts.end();

        self.sock.send(self.msg.as_bytes(), self.config.send_timeout).await
    }

    /// Receives a reply, records the sender as our server, and returns
    /// the validated message type
    async fn receive(&mut self) -> Result<MessageType, NetworkError> {
        let (_, source, _) = self
            .sock
            .recv_udp(&mut self.msg.buf, self.config.recv_timeout)
            .await?;
        self.server_ip = source;
        self.msg.reply_type()
    }

    /// Restarts the lease clock from an ACK's lease-time option
    fn record_lease(&mut self) -> Result<(), NetworkError> {
        self.lease_start = Instant::now();
        let seconds = match self.msg.find_option(option::LEASE_TIME) {
            Some([a, b, c, d]) => u32::from_be_bytes([*a, *b, *c, *d]),
            Some(other) => {
                error!("bad option length for lease time: {}", other.len());
                return Err(NetworkError::DhcpCorruptOption);
            }
            None => {
                error!("missing lease time");
                return Err(NetworkError::DhcpCorruptOption);
            }
        };
        info!("DHCP Lease Time: {}s", seconds);
        self.lease = Duration::from_millis(lease_ticks(seconds, TICK_HZ) as u64);
        Ok(())
    }

    /// Takes the ACK: records the lease and programs the chip with the
    /// assignment
    async fn accept_ack(&mut self) -> Result<(), NetworkError> {
        self.record_lease()?;

        self.dev.set_source_ip(self.client_ip).await?;
        info!("Bound IP: {}", self.client_ip);

        let subnet = match self.msg.find_option(option::SUBNET_MASK) {
            Some([a, b, c, d]) => Ipv4Addr::new(*a, *b, *c, *d),
            Some(other) => {
                error!("bad option length for subnet: {}", other.len());
                return Err(NetworkError::DhcpCorruptOption);
            }
            None => {
                error!("missing subnet mask");
                return Err(NetworkError::DhcpCorruptOption);
            }
        };
        self.dev.set_subnet(subnet).await?;
        info!("Subnet Mask: {}", subnet);

        // routers arrive as a multiple of four octets, the first is ours
        let gateway = match self.msg.find_option(option::ROUTER) {
            Some(routers) if !routers.is_empty() && routers.len() % 4 == 0 => {
                Ipv4Addr::from_octets([routers[0], routers[1], routers[2], routers[3]])
            }
            Some(other) => {
                error!("bad option length for router: {}", other.len());
                return Err(NetworkError::DhcpCorruptOption);
            }
            None => {
                error!("missing gateway address");
                return Err(NetworkError::DhcpCorruptOption);
            }
        };
        self.dev.set_gateway(gateway).await?;
        info!("Gateway: {}", gateway);

        Ok(())
    }
}

impl<SPI: SpiDevice> NetworkClient for DhcpClient<'_, SPI> {
    type Output = ();

    /// Drives the state machine until an address is bound
    async fn run(&mut self) -> Result<(), NetworkError> {
        while self.state != DhcpState::Bound {
            self.step().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::regs::{self, common, socket};
    use crate::testutil::{
        capture, open_steps, recv_udp_steps, send_any_steps, wr, MockSpi, ScriptHandle, Step,
    };
    use embassy_futures::block_on;
    use embassy_futures::join::join;

    const MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x12, 0x34, 0x56];
    const SN: SocketId = SocketId::new(3);
    const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn test_config() -> DhcpConfig {
        DhcpConfig {
            hostname: "testhost",
            socket_timeout: Duration::from_secs(1),
            send_timeout: Duration::from_secs(1),
            recv_timeout: Duration::from_millis(50),
            retry_delay: Duration::from_millis(10),
            ..DhcpConfig::default()
        }
    }

    fn device(steps: Vec<Step>) -> (W5500<MockSpi>, ScriptHandle) {
        let (spi, script) = MockSpi::new(steps);
        (W5500::new(spi, MacAddress::from_octets(MAC)), script)
    }

    /// Builds a server reply with the given message type and options
    fn reply(kind: MessageType, yiaddr: [u8; 4], extra: &[(u8, &[u8])]) -> Message {
        let mut msg = Message::new();
        msg.buf[field::OP] = op::BOOTREPLY;
        msg.buf[field::YIADDR..field::YIADDR + 4].copy_from_slice(&yiaddr);
        msg.buf[field::OPTIONS..field::OPTIONS + 4].copy_from_slice(&COOKIE);
        let mut at = field::OPTIONS + 4;
        msg.buf[at] = option::MESSAGE_TYPE;
        msg.buf[at + 1] = 1;
        msg.buf[at + 2] = kind.to_byte();
        at += 3;
        for (code, data) in extra {
            msg.buf[at] = *code;
            msg.buf[at + 1] = data.len() as u8;
            msg.buf[at + 2..at + 2 + data.len()].copy_from_slice(data);
            at += 2 + data.len();
        }
        msg.buf[at] = option::END;
        msg
    }

    /// Steps scripting the INIT exchange up to the DISCOVER send
    fn init_steps(capture_discover: bool) -> (Vec<Step>, Option<std::rc::Rc<std::cell::RefCell<Vec<u8>>>>) {
        let cb = regs::common_block();
        let sb = regs::socket_block(SN.index());
        let mut steps = vec![
            wr(common::SIPR, cb, &[0; 4]),
            wr(common::GAR, cb, &[0; 4]),
            wr(common::SUBR, cb, &[0; 4]),
            wr(socket::SN_DIPR, sb, &[255; 4]),
            wr(socket::SN_DPORT, sb, &SERVER_PORT.to_be_bytes()),
        ];
        steps.extend(open_steps(SN.index(), Protocol::Udp, CLIENT_PORT));
        let captured = if capture_discover {
            let tx = regs::socket_tx_block(SN.index());
            let (step, captured) = capture(0x0000, tx, MESSAGE_BYTES);
            let mut send = send_any_steps(SN.index(), MESSAGE_BYTES, 2048, 0x0000);
            send[2] = step;
            steps.extend(send);
            Some(captured)
        } else {
            steps.extend(send_any_steps(SN.index(), MESSAGE_BYTES, 2048, 0x0000));
            None
        };
        (steps, captured)
    }

    /// Steps scripting a REQUEST send (socket reopen plus message)
    fn request_steps() -> Vec<Step> {
        let mut steps = open_steps(SN.index(), Protocol::Udp, CLIENT_PORT);
        steps.extend(send_any_steps(SN.index(), MESSAGE_BYTES, 2048, 0x0000));
        steps
    }

    #[test]
    fn test_prepare_writes_bootp_header() {
        let mut msg = Message::new();
        // leave stale contents behind to prove the reset
        msg.buf[field::SNAME] = 0xAA;
        msg.buf[field::FILE] = 0xBB;
        let mut opts = msg.prepare(MacAddress::from_octets(MAC), 0x1122_3344);
        opts.end();
        assert_eq!(msg.buf[field::OP], op::BOOTREQUEST);
        assert_eq!(msg.buf[field::HTYPE], HTYPE_ETHERNET);
        assert_eq!(msg.buf[field::HLEN], 6);
        assert_eq!(msg.buf[field::HOPS], 0);
        assert_eq!(&msg.buf[field::XID..field::XID + 4], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&msg.buf[field::SECS..field::SECS + 2], &[0, 0]);
        assert_eq!(&msg.buf[field::FLAGS..field::FLAGS + 2], &[0, 0]);
        assert_eq!(&msg.buf[field::CIADDR..field::CIADDR + 4], &[0; 4]);
        assert_eq!(&msg.buf[field::GIADDR..field::GIADDR + 4], &[0; 4]);
        assert_eq!(&msg.buf[field::CHADDR..field::CHADDR + 6], &MAC);
        // rest of chaddr stays zero padded
        assert_eq!(&msg.buf[field::CHADDR + 6..field::CHADDR + 16], &[0; 10]);
        assert_eq!(msg.buf[field::SNAME], 0);
        assert_eq!(msg.buf[field::FILE], 0);
        assert_eq!(&msg.buf[field::OPTIONS..field::OPTIONS + 4], &COOKIE);
        assert_eq!(msg.buf[field::OPTIONS + 4], option::END);
    }

    #[test]
    fn test_option_writer_layout() {
        let mut msg = Message::new();
        let mut opts = msg.prepare(MacAddress::from_octets(MAC), XID);
        opts.option(option::MESSAGE_TYPE, &[MessageType::Discover.to_byte()]);
        opts.option(option::HOST_NAME, b"ambient1");
        opts.end();
        let at = field::OPTIONS + 4;
        assert_eq!(&msg.buf[at..at + 3], &[option::MESSAGE_TYPE, 1, 1]);
        assert_eq!(&msg.buf[at + 3..at + 5], &[option::HOST_NAME, 8]);
        assert_eq!(&msg.buf[at + 5..at + 13], b"ambient1");
        assert_eq!(msg.buf[at + 13], option::END);
    }

    #[test]
    fn test_find_option_skips_pad_and_stops_at_end() {
        let mut msg = reply(MessageType::Offer, [10, 0, 0, 99], &[(option::LEASE_TIME, &[0, 0, 14, 16])]);
        // shift the type option behind some padding
        let at = field::OPTIONS + 4;
        let tail: Vec<u8> = msg.buf[at..at + 16].to_vec();
        msg.buf[at] = option::PAD;
        msg.buf[at + 1] = option::PAD;
        msg.buf[at + 2..at + 18].copy_from_slice(&tail);
        assert_eq!(msg.find_option(option::MESSAGE_TYPE), Some(&[2u8][..]));
        assert_eq!(msg.find_option(option::LEASE_TIME), Some(&[0u8, 0, 14, 16][..]));
        // options after END are not read
        assert_eq!(msg.find_option(option::ROUTER), None);
    }

    #[test]
    fn test_find_option_ignores_data_past_end_marker() {
        let msg = reply(MessageType::Offer, [0; 4], &[]);
        let mut past_end = msg;
        let at = field::OPTIONS + 7;
        assert_eq!(past_end.buf[at], option::END);
        past_end.buf[at + 1] = option::ROUTER;
        past_end.buf[at + 2] = 4;
        past_end.buf[at + 3..at + 7].copy_from_slice(&[10, 0, 0, 1]);
        assert_eq!(past_end.find_option(option::ROUTER), None);
    }

    #[test]
    fn test_reply_type_validation() {
        let good = reply(MessageType::Offer, [0; 4], &[]);
        assert_eq!(good.reply_type(), Ok(MessageType::Offer));

        let mut bad_op = reply(MessageType::Offer, [0; 4], &[]);
        bad_op.buf[field::OP] = op::BOOTREQUEST;
        assert_eq!(bad_op.reply_type(), Err(NetworkError::DhcpBadOpcode));

        let mut no_cookie = reply(MessageType::Offer, [0; 4], &[]);
        no_cookie.buf[field::OPTIONS] = 0;
        assert_eq!(no_cookie.reply_type(), Err(NetworkError::DhcpNoCookie));

        let mut no_type = Message::new();
        no_type.buf[field::OP] = op::BOOTREPLY;
        no_type.buf[field::OPTIONS..field::OPTIONS + 4].copy_from_slice(&COOKIE);
        no_type.buf[field::OPTIONS + 4] = option::END;
        assert_eq!(no_type.reply_type(), Err(NetworkError::DhcpMissingType));

        let mut corrupt = Message::new();
        corrupt.buf[field::OP] = op::BOOTREPLY;
        corrupt.buf[field::OPTIONS..field::OPTIONS + 4].copy_from_slice(&COOKIE);
        corrupt.buf[field::OPTIONS + 4] = option::MESSAGE_TYPE;
        corrupt.buf[field::OPTIONS + 5] = 2;
        corrupt.buf[field::OPTIONS + 6] = 2;
        corrupt.buf[field::OPTIONS + 7] = 0;
        corrupt.buf[field::OPTIONS + 8] = option::END;
        assert_eq!(corrupt.reply_type(), Err(NetworkError::DhcpCorruptOption));
    }

    #[test]
    fn test_message_type_bytes() {
        assert_eq!(MessageType::from_byte(5), MessageType::Ack);
        assert_eq!(MessageType::from_byte(6), MessageType::Nak);
        assert_eq!(MessageType::from_byte(0), MessageType::Unknown(0));
        assert_eq!(MessageType::from_byte(200), MessageType::Unknown(200));
        assert_eq!(MessageType::Request.to_byte(), 3);
        assert_eq!(MessageType::Unknown(200).to_byte(), 200);
    }

    #[test]
    fn test_lease_ticks_derates_and_saturates() {
        // an eighth knocked off an hour, in millisecond ticks
        assert_eq!(lease_ticks(3600, 1000), 3_150_000);
        assert_eq!(lease_ticks(8, 1000), 7000);
        assert_eq!(lease_ticks(0, 1000), 0);
        // RFC 2131 infinite lease clamps instead of wrapping
        assert_eq!(lease_ticks(u32::MAX, 1000), u32::MAX);
    }

    #[test]
    fn test_step_init_sends_discover() {
        let (steps, captured) = init_steps(true);
        let (dev, script) = device(steps);
        let mut client = DhcpClient::new(&dev, SN, test_config());
        let stim = async {
            Timer::after_millis(10).await;
            dev.events(SN).signal(events::SEND_OK);
        };
        block_on(join(client.step(), stim));
        assert_eq!(client.state(), DhcpState::Selecting);
        script.assert_done();

        let captured = captured.unwrap();
        let sent = captured.borrow();
        assert_eq!(sent.len(), MESSAGE_BYTES);
        assert_eq!(sent[field::OP], op::BOOTREQUEST);
        assert_eq!(&sent[field::CHADDR..field::CHADDR + 6], &MAC);
        assert_eq!(&sent[field::OPTIONS..field::OPTIONS + 4], &COOKIE);
        let at = field::OPTIONS + 4;
        assert_eq!(&sent[at..at + 3], &[option::MESSAGE_TYPE, 1, MessageType::Discover.to_byte()]);
        assert_eq!(&sent[at + 3..at + 6], &[option::CLIENT_ID, 7, HTYPE_ETHERNET]);
        assert_eq!(&sent[at + 6..at + 12], &MAC);
        assert_eq!(&sent[at + 12..at + 14], &[option::HOST_NAME, 8]);
        assert_eq!(&sent[at + 14..at + 22], b"testhost");
        assert_eq!(sent[at + 22], option::END);
    }

    #[test]
    fn test_step_selecting_timeout_restarts() {
        let (dev, script) = device(vec![]);
        let mut client = DhcpClient::new(&dev, SN, test_config());
        client.state = DhcpState::Selecting;
        block_on(client.step());
        assert_eq!(client.state(), DhcpState::Init);
        script.assert_done();
    }

    #[test]
    fn test_step_selecting_offer_requests_it() {
        let offer = reply(MessageType::Offer, [10, 0, 0, 99], &[]);
        let mut steps = recv_udp_steps(SN.index(), 0x0000, SERVER, SERVER_PORT, offer.as_bytes());
        steps.extend(request_steps());
        let (dev, script) = device(steps);
        dev.events(SN).acquire().unwrap();
        let mut client = DhcpClient::new(&dev, SN, test_config());
        client.state = DhcpState::Selecting;
        let stim = async {
            Timer::after_millis(10).await;
            dev.events(SN).signal(events::RECV);
            Timer::after_millis(20).await;
            dev.events(SN).signal(events::SEND_OK);
        };
        block_on(join(client.step(), stim));
        assert_eq!(client.state(), DhcpState::Requesting);
        assert_eq!(client.client_ip(), Ipv4Addr::new(10, 0, 0, 99));
        assert_eq!(client.server_ip(), SERVER);
        script.assert_done();
    }

    #[test]
    fn test_step_selecting_wrong_type_restarts() {
        let ack = reply(MessageType::Ack, [10, 0, 0, 99], &[]);
        let steps = recv_udp_steps(SN.index(), 0x0000, SERVER, SERVER_PORT, ack.as_bytes());
        let (dev, script) = device(steps);
        dev.events(SN).acquire().unwrap();
        let mut client = DhcpClient::new(&dev, SN, test_config());
        client.state = DhcpState::Selecting;
        let stim = async {
            Timer::after_millis(10).await;
            dev.events(SN).signal(events::RECV);
        };
        block_on(join(client.step(), stim));
        assert_eq!(client.state(), DhcpState::Init);
        script.assert_done();
    }

    #[test]
    fn test_step_requesting_ack_binds() {
        let cb = regs::common_block();
        let ack = reply(
            MessageType::Ack,
            [10, 0, 0, 99],
            &[
                (option::LEASE_TIME, &[0, 0, 14, 16]),
                (option::SUBNET_MASK, &[255, 255, 255, 0]),
                (option::ROUTER, &[10, 0, 0, 1]),
            ],
        );
        let mut steps = recv_udp_steps(SN.index(), 0x0000, SERVER, SERVER_PORT, ack.as_bytes());
        steps.extend([
            wr(common::SIPR, cb, &[10, 0, 0, 99]),
            wr(common::SUBR, cb, &[255, 255, 255, 0]),
            wr(common::GAR, cb, &[10, 0, 0, 1]),
        ]);
        let (dev, script) = device(steps);
        dev.events(SN).acquire().unwrap();
        let mut client = DhcpClient::new(&dev, SN, test_config());
        client.state = DhcpState::Requesting;
        client.client_ip = Ipv4Addr::new(10, 0, 0, 99);
        let stim = async {
            Timer::after_millis(10).await;
            dev.events(SN).signal(events::RECV);
        };
        block_on(join(client.step(), stim));
        assert_eq!(client.state(), DhcpState::Bound);
        // 3600 s lease, less the renewal eighth
        assert_eq!(client.lease, Duration::from_millis(3_150_000));
        assert!(client.lease_remaining() <= Duration::from_millis(3_150_000));
        script.assert_done();
    }

    #[test]
    fn test_step_requesting_nak_restarts() {
        let nak = reply(MessageType::Nak, [0; 4], &[]);
        let steps = recv_udp_steps(SN.index(), 0x0000, SERVER, SERVER_PORT, nak.as_bytes());
        let (dev, script) = device(steps);
        dev.events(SN).acquire().unwrap();
        let mut client = DhcpClient::new(&dev, SN, test_config());
        client.state = DhcpState::Requesting;
        let stim = async {
            Timer::after_millis(10).await;
            dev.events(SN).signal(events::RECV);
        };
        block_on(join(client.step(), stim));
        // no address programming happened, straight back to INIT
        assert_eq!(client.state(), DhcpState::Init);
        script.assert_done();
    }

    #[test]
    fn test_step_requesting_ack_without_lease_restarts() {
        let ack = reply(MessageType::Ack, [10, 0, 0, 99], &[(option::SUBNET_MASK, &[255, 255, 255, 0])]);
        let steps = recv_udp_steps(SN.index(), 0x0000, SERVER, SERVER_PORT, ack.as_bytes());
        let (dev, script) = device(steps);
        dev.events(SN).acquire().unwrap();
        let mut client = DhcpClient::new(&dev, SN, test_config());
        client.state = DhcpState::Requesting;
        let stim = async {
            Timer::after_millis(10).await;
            dev.events(SN).signal(events::RECV);
        };
        block_on(join(client.step(), stim));
        assert_eq!(client.state(), DhcpState::Init);
        script.assert_done();
    }

    #[test]
    fn test_step_bound_sends_renewal() {
        let (dev, script) = device(request_steps());
        let mut client = DhcpClient::new(&dev, SN, test_config());
        client.state = DhcpState::Bound;
        client.client_ip = Ipv4Addr::new(10, 0, 0, 99);
        let stim = async {
            Timer::after_millis(10).await;
            dev.events(SN).signal(events::SEND_OK);
        };
        block_on(join(client.step(), stim));
        assert_eq!(client.state(), DhcpState::Renewing);
        script.assert_done();
    }

    #[test]
    fn test_step_renewing_ack_keeps_address() {
        let ack = reply(MessageType::Ack, [10, 0, 0, 99], &[(option::LEASE_TIME, &[0, 0, 0, 60])]);
        let steps = recv_udp_steps(SN.index(), 0x0000, SERVER, SERVER_PORT, ack.as_bytes());
        let (dev, script) = device(steps);
        dev.events(SN).acquire().unwrap();
        let mut client = DhcpClient::new(&dev, SN, test_config());
        client.state = DhcpState::Renewing;
        client.client_ip = Ipv4Addr::new(10, 0, 0, 99);
        let stim = async {
            Timer::after_millis(10).await;
            dev.events(SN).signal(events::RECV);
        };
        block_on(join(client.step(), stim));
        assert_eq!(client.state(), DhcpState::Bound);
        // a renewal only restarts the clock, no address reprogramming
        assert_eq!(client.lease, Duration::from_millis(53_000));
        assert_eq!(client.client_ip(), Ipv4Addr::new(10, 0, 0, 99));
        script.assert_done();
    }

    #[test]
    fn test_step_renewing_nak_restarts() {
        let nak = reply(MessageType::Nak, [0; 4], &[]);
        let steps = recv_udp_steps(SN.index(), 0x0000, SERVER, SERVER_PORT, nak.as_bytes());
        let (dev, script) = device(steps);
        dev.events(SN).acquire().unwrap();
        let mut client = DhcpClient::new(&dev, SN, test_config());
        client.state = DhcpState::Renewing;
        let stim = async {
            Timer::after_millis(10).await;
            dev.events(SN).signal(events::RECV);
        };
        block_on(join(client.step(), stim));
        assert_eq!(client.state(), DhcpState::Init);
        script.assert_done();
    }

    #[test]
    fn test_unhandled_state_restarts() {
        let (dev, script) = device(vec![]);
        let mut client = DhcpClient::new(&dev, SN, test_config());
        client.state = DhcpState::Rebinding;
        block_on(client.step());
        assert_eq!(client.state(), DhcpState::Init);
        script.assert_done();
    }

    #[test]
    fn test_run_acquires_address_end_to_end() {
        let cb = regs::common_block();
        let offer = reply(MessageType::Offer, [10, 0, 0, 99], &[]);
        let ack = reply(
            MessageType::Ack,
            [10, 0, 0, 99],
            &[
                (option::LEASE_TIME, &[0, 0, 14, 16]),
                (option::SUBNET_MASK, &[255, 255, 255, 0]),
                (option::ROUTER, &[10, 0, 0, 1]),
            ],
        );

        let (mut steps, _) = init_steps(false);
        steps.extend(recv_udp_steps(SN.index(), 0x0000, SERVER, SERVER_PORT, offer.as_bytes()));
        steps.extend(request_steps());
        steps.extend(recv_udp_steps(SN.index(), 0x0000, SERVER, SERVER_PORT, ack.as_bytes()));
        steps.extend([
            wr(common::SIPR, cb, &[10, 0, 0, 99]),
            wr(common::SUBR, cb, &[255, 255, 255, 0]),
            wr(common::GAR, cb, &[10, 0, 0, 1]),
        ]);
        let (dev, script) = device(steps);
        let mut client = DhcpClient::new(&dev, SN, test_config());

        let stim = async {
            let ev = dev.events(SN);
            Timer::after_millis(20).await;
            ev.signal(events::SEND_OK); // DISCOVER out
            Timer::after_millis(20).await;
            ev.signal(events::RECV); // OFFER in
            Timer::after_millis(20).await;
            ev.signal(events::SEND_OK); // REQUEST out
            Timer::after_millis(20).await;
            ev.signal(events::RECV); // ACK in
        };
        let (res, ()) = block_on(join(client.run(), stim));
        res.unwrap();

        assert_eq!(client.state(), DhcpState::Bound);
        assert_eq!(client.client_ip(), Ipv4Addr::new(10, 0, 0, 99));
        assert_eq!(client.server_ip(), SERVER);
        assert_eq!(client.lease, Duration::from_millis(3_150_000));
        script.assert_done();
    }
}
