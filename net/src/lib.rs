//! W5500 Ethernet driver with from-scratch DHCP and MQTT clients
//!
//! This crate is the network subsystem of a battery-free ambient sensor
//! node. The W5500 terminates TCP and UDP on-die, so there is no host-side
//! TCP/IP stack here: the driver talks to the chip's registers and socket
//! buffers over SPI, and the protocol clients speak their wire formats
//! directly through the chip's socket primitives.
//!
//! - **`device`**: register transport, chip bring-up, interrupt service
//! - **`socket`**: open/close/connect, send and receive for one socket
//! - **`events`**: per-socket completion flags fed by the dispatch task
//! - **`dhcp`**: address-acquisition state machine over UDP socket
//! - **`mqtt`**: publish-only MQTT v3.1.1 session over TCP socket
//! - **`client`**: `NetworkClient` trait protocol clients implement
//!
//! Everything is platform-agnostic behind the `SpiDevice` seam, so the
//! whole crate is testable on the host against a scripted bus.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod addr;
pub mod client;
pub mod device;
pub mod dhcp;
pub mod error;
pub mod events;
pub mod mqtt;
pub mod regs;
pub mod socket;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use addr::{Ipv4Addr, MacAddress};
pub use client::NetworkClient;
pub use device::W5500;
pub use dhcp::{DhcpClient, DhcpConfig, DhcpState};
pub use error::NetworkError;
pub use mqtt::{MqttClient, MqttConfig};
pub use socket::{Protocol, Socket, SocketId};
