#![deny(unsafe_code)]
#![deny(warnings)]
//! W5500 device handle and SPI transport
//!
//! Every register access is one bus transaction: the 3-byte frame header
//! followed by the payload, with chip select held across both. The handle is
//! shared by reference between the protocol tasks; an async mutex serializes
//! bus access and an [`EventSet`] per socket carries interrupt completions
//! from the dispatch task to whoever owns the socket.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::spi::{Operation, SpiDevice};

use crate::addr::{Ipv4Addr, MacAddress};
use crate::error::NetworkError;
use crate::events::{self, EventSet};
use crate::regs::{self, common, ir, socket, PhyConfig};
use crate::socket::{Socket, SocketId};

/// W5500 chip behind an SPI bus
pub struct W5500<SPI> {
    bus: Mutex<CriticalSectionRawMutex, SPI>,
    mac: MacAddress,
    events: [EventSet; regs::NUM_SOCKETS],
}

impl<SPI: SpiDevice> W5500<SPI> {
    /// Wraps an SPI device whose chip select frames each transaction.
    ///
    /// The chip must already be out of hardware reset.
    pub fn new(spi: SPI, mac: MacAddress) -> Self {
        Self {
            bus: Mutex::new(spi),
            mac,
            events: [const { EventSet::new() }; regs::NUM_SOCKETS],
        }
    }

    /// MAC address programmed during [`initialize`](Self::initialize)
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub(crate) async fn read(&self, addr: u16, bsb: u8, data: &mut [u8]) -> Result<(), NetworkError> {
        let header = regs::frame_header(addr, bsb, false);
        let mut bus = self.bus.lock().await;
        bus.transaction(&mut [Operation::Write(&header), Operation::Read(data)])
            .await
            .map_err(|_| NetworkError::Spi)
    }

    pub(crate) async fn write(&self, addr: u16, bsb: u8, data: &[u8]) -> Result<(), NetworkError> {
        let header = regs::frame_header(addr, bsb, true);
        let mut bus = self.bus.lock().await;
        bus.transaction(&mut [Operation::Write(&header), Operation::Write(data)])
            .await
            .map_err(|_| NetworkError::Spi)
    }

    pub(crate) async fn read_u8(&self, addr: u16, bsb: u8) -> Result<u8, NetworkError> {
        let mut buf = [0u8; 1];
        self.read(addr, bsb, &mut buf).await?;
        Ok(buf[0])
    }

    pub(crate) async fn write_u8(&self, addr: u16, bsb: u8, value: u8) -> Result<(), NetworkError> {
        self.write(addr, bsb, &[value]).await
    }

    pub(crate) async fn read_u16(&self, addr: u16, bsb: u8) -> Result<u16, NetworkError> {
        let mut buf = [0u8; 2];
        self.read(addr, bsb, &mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    pub(crate) async fn write_u16(&self, addr: u16, bsb: u8, value: u16) -> Result<(), NetworkError> {
        self.write(addr, bsb, &value.to_be_bytes()).await
    }

    /// Brings the chip to a usable state: verifies the version register,
    /// waits for the PHY link, programs the MAC, and unmasks interrupts.
    pub async fn initialize(&self) -> Result<(), NetworkError> {
        let version = self.read_u8(common::VERSIONR, regs::common_block()).await?;
        if version != regs::CHIP_VERSION {
            return Err(NetworkError::ChipVersion);
        }

        info!("waiting for link up");
        loop {
            if self.phy_config().await?.link_up() {
                break;
            }
        }

        self.write(common::SHAR, regs::common_block(), &self.mac.octets).await?;

        // route every socket interrupt to the INTn pin
        self.write_u8(common::SIMR, regs::common_block(), 0xFF).await?;

        // chip-level interrupts worth reporting
        self.write_u8(common::IMR, regs::common_block(), ir::CONFLICT | ir::UNREACH)
            .await?;

        Ok(())
    }

    /// Reads and unpacks the PHY configuration register
    pub async fn phy_config(&self) -> Result<PhyConfig, NetworkError> {
        Ok(PhyConfig(self.read_u8(common::PHYCFGR, regs::common_block()).await?))
    }

    /// Logs a decoded dump of the PHY configuration register
    pub async fn log_phy_status(&self) -> Result<(), NetworkError> {
        let phy = self.phy_config().await?;
        info!("PHY_CFG: {=u8:#04x}", phy.0);
        info!("PHY RST: {} in reset", if phy.in_reset() { "" } else { "not" });
        info!("PHY OPMD: {}W", if phy.op_mode_from_register() { "S" } else { "H" });
        info!("PHY OPMDC: {=u8:#x}", phy.op_mode_config());
        info!("PHY DPX: {} duplex", if phy.full_duplex() { "Full" } else { "Half" });
        info!("PHY SPD: {}Mbps", if phy.speed_100() { 100 } else { 10 });
        info!("PHY LNK: Link {}", if phy.link_up() { "Up" } else { "Down" });
        Ok(())
    }

    /// Programs the source IP address register
    pub async fn set_source_ip(&self, addr: Ipv4Addr) -> Result<(), NetworkError> {
        self.write(common::SIPR, regs::common_block(), &addr.octets).await
    }

    /// Programs the gateway address register
    pub async fn set_gateway(&self, addr: Ipv4Addr) -> Result<(), NetworkError> {
        self.write(common::GAR, regs::common_block(), &addr.octets).await
    }

    /// Programs the subnet mask register
    pub async fn set_subnet(&self, addr: Ipv4Addr) -> Result<(), NetworkError> {
        self.write(common::SUBR, regs::common_block(), &addr.octets).await
    }

    /// Drains pending interrupts, forwarding socket events to their owners
    /// and write-clearing every flag taken. Chip-level interrupts have no
    /// consumer and are only reported.
    ///
    /// The caller loops on this while the INTn line is held low.
    pub async fn service_interrupts(&self) -> Result<(), NetworkError> {
        let pending = self.read_u8(common::IR, regs::common_block()).await?;
        if pending != 0 {
            if pending & ir::CONFLICT != 0 {
                warn!("UNHANDLED EVENT: CONFLICT");
            }
            if pending & ir::UNREACH != 0 {
                warn!("UNHANDLED EVENT: UNREACH");
            }
            if pending & ir::PPPOE != 0 {
                warn!("UNHANDLED EVENT: PPPOE");
            }
            if pending & ir::MP != 0 {
                warn!("UNHANDLED EVENT: MP");
            }
            self.write_u8(common::IR, regs::common_block(), pending).await?;
        }

        let pending_sockets = self.read_u8(common::SIR, regs::common_block()).await?;
        for sn in 0..regs::NUM_SOCKETS as u8 {
            if pending_sockets & (1 << sn) == 0 {
                continue;
            }
            let block = regs::socket_block(sn);
            let flags = self.read_u8(socket::SN_IR, block).await?;
            if !self.events[sn as usize].signal(flags) {
                if flags & events::CON != 0 {
                    warn!("UNHANDLED EVENT: SOCKET {} CON", sn);
                }
                if flags & events::DISCON != 0 {
                    warn!("UNHANDLED EVENT: SOCKET {} DISCON", sn);
                }
                if flags & events::RECV != 0 {
                    warn!("UNHANDLED EVENT: SOCKET {} RECV", sn);
                }
                if flags & events::TIMEOUT != 0 {
                    warn!("UNHANDLED EVENT: SOCKET {} TIMEOUT", sn);
                }
                if flags & events::SEND_OK != 0 {
                    warn!("UNHANDLED EVENT: SOCKET {} SEND_OK", sn);
                }
            }
            self.write_u8(socket::SN_IR, block, flags).await?;
        }
        Ok(())
    }

    /// Handle for driving socket `id`
    pub fn socket(&self, id: SocketId) -> Socket<'_, SPI> {
        Socket::new(self, id)
    }

    pub(crate) fn events(&self, id: SocketId) -> &EventSet {
        &self.events[id.index() as usize]
    }
}
