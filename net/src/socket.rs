#![deny(unsafe_code)]
#![deny(warnings)]
//! Socket operations
//!
//! Commands go through `SN_CR` and complete when the chip clears the
//! register. Completion of the slow paths (connect, send, receive) is
//! signalled through the socket's [`EventSet`] by the interrupt dispatch
//! task, so the waits here block on event flags rather than polling status.
//! Receive paths reclaim buffer space by advancing `SN_RX_RD` directly.

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use embedded_hal_async::spi::SpiDevice;

use crate::addr::Ipv4Addr;
use crate::device::W5500;
use crate::error::NetworkError;
use crate::events::{self, EventSet};
use crate::regs::{self, command, socket, status};

/// Bytes of source address and length prefixed to every received datagram
const PACKET_HEADER_BYTES: usize = 8;

/// Validated socket index
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocketId(u8);

impl SocketId {
    /// Panics if `index` is outside the chip's eight sockets.
    pub const fn new(index: u8) -> Self {
        assert!((index as usize) < regs::NUM_SOCKETS);
        Self(index)
    }

    pub const fn index(self) -> u8 {
        self.0
    }
}

/// Transport protocol a socket is opened with, in `SN_MR` encoding
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Tcp = 0x01,
    Udp = 0x02,
}

impl Protocol {
    /// Status the socket settles in once opened
    const fn open_status(self) -> u8 {
        match self {
            Self::Tcp => status::INIT,
            Self::Udp => status::UDP,
        }
    }
}

/// TX buffer position carried across [`Socket::write_part`] calls.
///
/// Starts unknown; the first part fetches the free size and write pointer
/// from the chip, later parts advance the local copy.
#[derive(Default)]
pub struct TxCursor {
    free: Option<u16>,
    ptr: Option<u16>,
}

/// Handle for one of the chip's sockets
pub struct Socket<'d, SPI> {
    dev: &'d W5500<SPI>,
    id: SocketId,
}

impl<'d, SPI: SpiDevice> Socket<'d, SPI> {
    pub(crate) fn new(dev: &'d W5500<SPI>, id: SocketId) -> Self {
        Self { dev, id }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    fn events(&self) -> &EventSet {
        self.dev.events(self.id)
    }

    fn block(&self) -> u8 {
        regs::socket_block(self.id.index())
    }

    async fn read_u8(&self, addr: u16) -> Result<u8, NetworkError> {
        self.dev.read_u8(addr, self.block()).await
    }

    async fn write_u8(&self, addr: u16, value: u8) -> Result<(), NetworkError> {
        self.dev.write_u8(addr, self.block(), value).await
    }

    async fn read_u16(&self, addr: u16) -> Result<u16, NetworkError> {
        self.dev.read_u16(addr, self.block()).await
    }

    async fn write_u16(&self, addr: u16, value: u16) -> Result<(), NetworkError> {
        self.dev.write_u16(addr, self.block(), value).await
    }

    /// Opens the socket for `proto` on the given source port.
    ///
    /// Any previous use of the socket is closed out first and stale
    /// interrupt flags are cleared, so event waits start from a clean
    /// slate.
    pub async fn open(&mut self, proto: Protocol, port: u16, timeout: Duration) -> Result<(), NetworkError> {
        self.close(timeout).await?;

        let stale = self.read_u8(socket::SN_IR).await?;
        if stale != 0 {
            debug!("Clearing {=u8:#04x}", stale);
            self.write_u8(socket::SN_IR, stale).await?;
        }

        self.events().acquire()?;
        self.write_u8(socket::SN_IMR, events::ALL).await?;
        self.write_u8(socket::SN_MR, proto as u8).await?;
        self.write_u16(socket::SN_PORT, port).await?;
        self.command(command::OPEN).await?;
        self.wait_status(proto.open_status(), timeout).await
    }

    /// Closes the socket and releases its event set
    pub async fn close(&mut self, timeout: Duration) -> Result<(), NetworkError> {
        self.events().release();
        self.command(command::CLOSE).await?;
        self.wait_status(status::CLOSED, timeout).await
    }

    /// Sets the peer address for UDP sends or a TCP connect
    pub async fn set_destination(&mut self, ip: Ipv4Addr, port: u16) -> Result<(), NetworkError> {
        self.dev.write(socket::SN_DIPR, self.block(), &ip.octets).await?;
        self.write_u16(socket::SN_DPORT, port).await
    }

    /// Connects a TCP socket to the peer
    pub async fn connect(&mut self, ip: Ipv4Addr, port: u16, timeout: Duration) -> Result<(), NetworkError> {
        self.set_destination(ip, port).await?;
        self.command(command::CONNECT).await?;
        let fired = self.wait_events(events::CON, timeout).await;
        if fired & events::CON == 0 {
            return Err(NetworkError::ConnectTimeout);
        }
        Ok(())
    }

    /// Issues a socket command and waits for the chip to accept it
    async fn command(&mut self, cmd: u8) -> Result<(), NetworkError> {
        self.write_u8(socket::SN_CR, cmd).await?;
        // register auto-clears when the command has been accepted
        while self.read_u8(socket::SN_CR).await? != 0 {}
        Ok(())
    }

    /// Polls the status register until it reads `wanted`
    async fn wait_status(&mut self, wanted: u8, timeout: Duration) -> Result<(), NetworkError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.read_u8(socket::SN_SR).await? == wanted {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(NetworkError::StatusTimeout);
            }
        }
    }

    /// Waits for any event in `mask`, returning the fired bits or zero on
    /// timeout
    async fn wait_events(&self, mask: u8, timeout: Duration) -> u8 {
        match select(self.events().wait_any(mask), Timer::after(timeout)).await {
            Either::First(fired) => fired,
            Either::Second(()) => 0,
        }
    }

    /// Stages `data` in the TX buffer and sends it.
    ///
    /// Fails without touching the chip when a timeout or disconnect is
    /// already latched from an earlier exchange.
    pub async fn send(&mut self, data: &[u8], timeout: Duration) -> Result<(), NetworkError> {
        if self.events().get() & (events::TIMEOUT | events::DISCON) != 0 {
            return Err(NetworkError::SocketDisconnected);
        }
        if data.is_empty() {
            return Ok(());
        }

        let free = self.read_u16(socket::SN_TX_FSR).await?;
        if data.len() > free as usize {
            return Err(NetworkError::TxOverflow);
        }

        let ptr = self.read_u16(socket::SN_TX_WR).await?;
        self.dev.write(ptr, regs::socket_tx_block(self.id.index()), data).await?;
        self.flush(ptr.wrapping_add(data.len() as u16), timeout).await
    }

    /// Stages `data` at the cursor without sending.
    ///
    /// A message assembled from several parts is committed with one
    /// [`send_buffer`](Self::send_buffer) call afterwards.
    pub async fn write_part(&mut self, data: &[u8], cursor: &mut TxCursor) -> Result<(), NetworkError> {
        let free = match cursor.free {
            Some(free) => free,
            None => self.read_u16(socket::SN_TX_FSR).await?,
        };
        if data.len() > free as usize {
            return Err(NetworkError::TxOverflow);
        }

        let ptr = match cursor.ptr {
            Some(ptr) => ptr,
            None => self.read_u16(socket::SN_TX_WR).await?,
        };
        if !data.is_empty() {
            self.dev.write(ptr, regs::socket_tx_block(self.id.index()), data).await?;
        }

        cursor.free = Some(free - data.len() as u16);
        cursor.ptr = Some(ptr.wrapping_add(data.len() as u16));
        Ok(())
    }

    /// Sends everything staged through [`write_part`](Self::write_part)
    pub async fn send_buffer(&mut self, cursor: TxCursor, timeout: Duration) -> Result<(), NetworkError> {
        match cursor.ptr {
            Some(ptr) => self.flush(ptr, timeout).await,
            None => Ok(()),
        }
    }

    /// Commits the write pointer, issues SEND, and waits for completion
    async fn flush(&mut self, ptr: u16, timeout: Duration) -> Result<(), NetworkError> {
        if self.events().get() & (events::TIMEOUT | events::DISCON) != 0 {
            return Err(NetworkError::SocketDisconnected);
        }
        self.write_u16(socket::SN_TX_WR, ptr).await?;
        self.command(command::SEND).await?;
        let fired = self.wait_events(events::SEND_OK, timeout).await;
        if fired & events::SEND_OK == 0 {
            return Err(NetworkError::SendTimeout);
        }
        Ok(())
    }

    /// Receives from a TCP socket into `buf`, returning the byte count.
    ///
    /// A disconnect, latched or arriving during the wait, fails the call
    /// immediately.
    pub async fn recv_tcp(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, NetworkError> {
        let fired = self.wait_events(events::RECV | events::DISCON, timeout).await;
        if fired & events::DISCON != 0 {
            return Err(NetworkError::SocketDisconnected);
        }
        if fired & events::RECV == 0 {
            return Err(NetworkError::RecvTimeout);
        }

        let len = self.read_u16(socket::SN_RX_RSR).await? as usize;
        if len > buf.len() {
            return Err(NetworkError::RxOverflow);
        }

        let ptr = self.read_u16(socket::SN_RX_RD).await?;
        self.dev
            .read(ptr, regs::socket_rx_block(self.id.index()), &mut buf[..len])
            .await?;
        self.write_u16(socket::SN_RX_RD, ptr.wrapping_add(len as u16)).await?;
        Ok(len)
    }

    /// Receives one datagram from a UDP socket into `buf`, returning the
    /// byte count and the sender's address and port from the chip's
    /// packet header.
    pub async fn recv_udp(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(usize, Ipv4Addr, u16), NetworkError> {
        let fired = self.wait_events(events::RECV, timeout).await;
        if fired & events::RECV == 0 {
            return Err(NetworkError::RecvTimeout);
        }

        let mut ptr = self.read_u16(socket::SN_RX_RD).await?;
        let mut header = [0u8; PACKET_HEADER_BYTES];
        self.dev
            .read(ptr, regs::socket_rx_block(self.id.index()), &mut header)
            .await?;
        let source = Ipv4Addr::from_octets([header[0], header[1], header[2], header[3]]);
        let port = u16::from_be_bytes([header[4], header[5]]);
        let len = u16::from_be_bytes([header[6], header[7]]) as usize;

        if len > buf.len() {
            return Err(NetworkError::RxOverflow);
        }

        ptr = ptr.wrapping_add(PACKET_HEADER_BYTES as u16);
        self.dev
            .read(ptr, regs::socket_rx_block(self.id.index()), &mut buf[..len])
            .await?;
        self.write_u16(socket::SN_RX_RD, ptr.wrapping_add(len as u16)).await?;
        Ok((len, source, port))
    }
}
