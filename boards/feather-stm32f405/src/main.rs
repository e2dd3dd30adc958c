#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod config;
mod eth;
mod samples;

stm32_tim2_monotonic!(Mono, 1_000_000);

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2, USART3])]
mod app {
    use super::*;
    use ambient_net::{DhcpClient, DhcpState, MqttClient, NetworkClient};
    use defmt::{error, info, warn};
    use embassy_stm32::exti::ExtiInput;
    use embassy_stm32::gpio::{Level, Output, Pull, Speed};
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::{Hse, HseMode};
    use embassy_stm32::spi::{self, Spi};
    use embassy_stm32::time::Hertz;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::watch::Watch;
    use embassy_time::Timer;

    use eth::EthDevice;
    use samples::{Sample, SampleKind};

    type SpiPeripheral = embassy_stm32::Peri<'static, peripherals::SPI2>;
    type PinPB13 = embassy_stm32::Peri<'static, peripherals::PB13>;
    type PinPB15 = embassy_stm32::Peri<'static, peripherals::PB15>;
    type PinPB14 = embassy_stm32::Peri<'static, peripherals::PB14>;
    type PinPC6 = embassy_stm32::Peri<'static, peripherals::PC6>;
    type PinPC3 = embassy_stm32::Peri<'static, peripherals::PC3>;
    type PinPC2 = embassy_stm32::Peri<'static, peripherals::PC2>;
    type ExtiChannel = embassy_stm32::Peri<'static, peripherals::EXTI2>;
    type DmaTx = embassy_stm32::Peri<'static, peripherals::DMA1_CH4>;
    type DmaRx = embassy_stm32::Peri<'static, peripherals::DMA1_CH3>;

    struct NetworkPeripherals {
        spi: SpiPeripheral,
        sck: PinPB13,
        mosi: PinPB15,
        miso: PinPB14,
        cs: PinPC6,
        reset: PinPC3,
        int: PinPC2,
        exti: ExtiChannel,
        dma_tx: DmaTx,
        dma_rx: DmaRx,
    }

    /// DHCP bound state; renewal gates the publisher off and back on
    static BOUND: Watch<CriticalSectionRawMutex, bool, 1> = Watch::new();

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Ambient sensor node starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: None,
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        let p = embassy_stm32::init(config);

        info!("System initialized with HSE (12MHz), SYSCLK=84MHz");

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        // APB1 = 42 MHz, TIM2 = 84 MHz
        let timer_clock_hz = 84_000_000;
        Mono::start(timer_clock_hz);

        let led = Output::new(p.PC1, Level::High, Speed::Low);

        let net_periph = NetworkPeripherals {
            spi: p.SPI2,
            sck: p.PB13,
            mosi: p.PB15,
            miso: p.PB14,
            cs: p.PC6,
            reset: p.PC3,
            int: p.PC2,
            exti: p.EXTI2,
            dma_tx: p.DMA1_CH4,
            dma_rx: p.DMA1_CH3,
        };

        heartbeat::spawn().ok();
        network_task::spawn(net_periph).ok();
        sampler::spawn().ok();

        (Shared {}, Local { led })
    }

    /// Heartbeat task
    #[task(priority = 1, local = [led])]
    async fn heartbeat(cx: heartbeat::Context) {
        info!("Heartbeat task started");
        loop {
            cx.local.led.set_high();
            Mono::delay(100.millis()).await;
            cx.local.led.set_low();
            Mono::delay(4900.millis()).await;
        }
    }

    /// Network bring-up: owns the Ethernet peripherals, initializes the
    /// chip, then starts the protocol tasks. Nothing network-facing runs
    /// until the chip answers and the link is up.
    #[task(priority = 1)]
    async fn network_task(_cx: network_task::Context, periph: NetworkPeripherals) {
        info!("Network task started");

        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(10_000_000); // 10 MHz for W5500

        let spi = Spi::new(
            periph.spi,
            periph.sck,
            periph.mosi,
            periph.miso,
            periph.dma_tx,
            periph.dma_rx,
            spi_config,
        );

        let cs = Output::new(periph.cs, Level::High, Speed::VeryHigh);
        let reset = Output::new(periph.reset, Level::High, Speed::Low);
        let int = ExtiInput::new(periph.int, periph.exti, Pull::Up);

        let eth_periph = eth::EthPeripherals { spi, cs, reset };

        let net_config = config::NetworkConfig::default();
        let device = eth::init_w5500(eth_periph, net_config.mac_addr).await;

        wiz_task::spawn(device, int).ok();
        dhcp_task::spawn(device).ok();
        mqtt_task::spawn(device).ok();
    }

    /// Interrupt dispatch: runs service passes while the chip holds the
    /// interrupt line low.
    #[task(priority = 2)]
    async fn wiz_task(
        _cx: wiz_task::Context,
        device: &'static EthDevice,
        mut int: ExtiInput<'static>,
    ) -> ! {
        info!("Interrupt dispatch task started");
        loop {
            int.wait_for_low().await;
            while int.is_low() {
                if let Err(status) = device.service_interrupts().await {
                    error!("Interrupt service failed: {}", status);
                }
            }
        }
    }

    /// DHCP task: drives the lease state machine forever.
    #[task(priority = 1)]
    async fn dhcp_task(_cx: dhcp_task::Context, device: &'static EthDevice) -> ! {
        info!("DHCP task started");

        let bound = BOUND.sender();
        let dhcp_config = config::dhcp_config(Mono::now().ticks() as u32);
        let mut client = DhcpClient::new(device, config::DHCP_SOCKET, dhcp_config);

        let mut announced = false;
        loop {
            client.step().await;
            let is_bound = client.state() == DhcpState::Bound;
            if is_bound != announced {
                bound.send(is_bound);
                announced = is_bound;
            }
            if is_bound {
                let remaining = client.lease_remaining();
                info!(
                    "DHCP bound: {} (renewal in {}s)",
                    client.client_ip(),
                    remaining.as_secs()
                );
                Timer::after(remaining).await;
            }
        }
    }

    /// Publish task: brings the MQTT session up once DHCP is bound, then
    /// drains the sample channel. Any publish failure tears the session
    /// down and reconnects.
    #[task(priority = 1)]
    async fn mqtt_task(_cx: mqtt_task::Context, device: &'static EthDevice) -> ! {
        info!("MQTT task started");

        let mut bound = BOUND.receiver().unwrap();
        let receiver = samples::sample_receiver();
        let mut client = MqttClient::new(device, config::MQTT_SOCKET, config::mqtt_config());

        loop {
            bound.get_and(|is_bound| *is_bound).await;
            if let Err(status) = client.run().await {
                warn!("MQTT connect failed: {}", status);
                continue;
            }
            info!("MQTT session established");

            loop {
                let sample = receiver.receive().await;
                bound.get_and(|is_bound| *is_bound).await;

                let payload = match samples::format_value(sample.value) {
                    Ok(payload) => payload,
                    Err(_) => {
                        error!("Sample value does not fit the payload buffer");
                        continue;
                    }
                };

                let topic = sample.kind.topic();
                match client.publish(topic, payload.as_bytes()).await {
                    Ok(()) => info!("Published {}: {}", topic, payload.as_str()),
                    Err(status) => {
                        error!("MQTT publish failed: {}", status);
                        break;
                    }
                }
            }
        }
    }

    /// Sampler placeholder: feeds synthetic readings through the channel
    /// until the BME280 and OPT3002 drivers land.
    #[task(priority = 1)]
    async fn sampler(_cx: sampler::Context) -> ! {
        info!("Sampler task started");

        let sender = samples::sample_sender();
        let mut phase = 0u32;
        loop {
            Mono::delay(5.secs()).await;

            let drift = (phase % 8) as f32 * 0.125;
            phase = phase.wrapping_add(1);

            let readings = [
                Sample {
                    kind: SampleKind::Temperature,
                    value: 21.5 + drift,
                },
                Sample {
                    kind: SampleKind::Humidity,
                    value: 40.0 + drift,
                },
                Sample {
                    kind: SampleKind::Pressure,
                    value: 1013.25,
                },
                Sample {
                    kind: SampleKind::Luminosity,
                    value: 125.0 + drift,
                },
            ];
            for sample in readings {
                if sender.try_send(sample).is_err() {
                    warn!("Sample channel full, dropping {}", sample.kind);
                }
            }
        }
    }

    /// RTIC idle task - WFI sleep mode when no tasks active
    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        info!("Idle task started - entering WFI loop");
        loop {
            cortex_m::asm::wfi();
        }
    }
}
