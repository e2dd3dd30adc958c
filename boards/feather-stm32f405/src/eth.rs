#![deny(unsafe_code)]
#![deny(warnings)]
//! Ethernet hardware layer module

use ambient_net::{MacAddress, W5500};
use defmt::{info, warn};
use embassy_embedded_hal::shared_bus::asynch::spi::SpiDevice as SpiDeviceBus;
use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Async;
use embassy_stm32::spi::Spi;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use static_cell::StaticCell;

/// SPI device handed to the driver: the shared bus plus our chip select
pub type EthSpi =
    SpiDeviceBus<'static, CriticalSectionRawMutex, Spi<'static, Async>, Output<'static>>;

/// The W5500 driver as owned by this firmware
pub type EthDevice = W5500<EthSpi>;

/// Ethernet peripherals bundle
pub struct EthPeripherals {
    pub spi: Spi<'static, Async>,
    pub cs: Output<'static>,
    pub reset: Output<'static>,
}

/// Initialize the W5500 Ethernet hardware.
///
/// Pulses the hardware reset line, builds the shared SPI bus, and retries
/// chip initialization until the chip answers and the PHY link is up. The
/// interrupt line stays with the caller; it belongs to the dispatch task.
pub async fn init_w5500(periph: EthPeripherals, mac_addr: [u8; 6]) -> &'static EthDevice {
    let EthPeripherals { spi, cs, mut reset } = periph;

    info!("Performing W5500 hardware reset...");
    reset.set_low();
    embassy_time::Timer::after_millis(1).await;
    reset.set_high();
    embassy_time::Timer::after_millis(2).await;

    // Dropping the pin would float RSTn, so park it for the life of the
    // firmware.
    static RESET: StaticCell<Output<'static>> = StaticCell::new();
    let _ = RESET.init(reset);

    type SpiBusType = embassy_sync::mutex::Mutex<CriticalSectionRawMutex, Spi<'static, Async>>;
    static SPI_BUS: StaticCell<SpiBusType> = StaticCell::new();
    let spi_bus = SPI_BUS.init(embassy_sync::mutex::Mutex::new(spi));
    let spi_device = SpiDeviceBus::new(spi_bus, cs);

    let mac = MacAddress::from_octets(mac_addr);
    info!("MAC address: {}", mac);

    static DEVICE: StaticCell<EthDevice> = StaticCell::new();
    let device = DEVICE.init(W5500::new(spi_device, mac));

    loop {
        match device.initialize().await {
            Ok(()) => break,
            Err(status) => warn!("W5500 Status: {}", status),
        }
    }
    info!("W5500 initialized");

    if let Err(status) = device.log_phy_status().await {
        warn!("PHY status read failed: {}", status);
    }

    device
}
