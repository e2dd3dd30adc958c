#![deny(unsafe_code)]
#![deny(warnings)]
//! Deployment configuration

use ambient_net::{DhcpConfig, MqttConfig, SocketId};

/// Hostname sent with DHCP requests; also the device segment of the
/// publish topics.
pub const DEVICE_NAME: &str = "ambient1";

/// DHCP runs on socket 3, MQTT on socket 7; the other six hardware
/// sockets are spare.
pub const DHCP_SOCKET: SocketId = SocketId::new(3);
pub const MQTT_SOCKET: SocketId = SocketId::new(7);

/// Network identity configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// MAC address for Ethernet
    pub mac_addr: [u8; 6],
    /// Seed folded into the DHCP transaction ID
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            // locally administered address
            mac_addr: [0x02, 0x00, 0x00, 0x12, 0x34, 0x56],
            seed: 0x1234_5678_u64,
        }
    }
}

/// DHCP client configuration.
///
/// The transaction ID folds the configured seed with the factory device
/// UID and the caller's monotonic tick, so neighboring nodes and repeated
/// boots do not share an xid.
pub fn dhcp_config(now_ticks: u32) -> DhcpConfig {
    let NetworkConfig { seed, .. } = NetworkConfig::default();
    let mut xid = (seed as u32) ^ ((seed >> 32) as u32) ^ now_ticks;
    for word in embassy_stm32::uid::uid().chunks_exact(4) {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(word);
        xid ^= u32::from_le_bytes(bytes);
    }
    DhcpConfig {
        xid,
        hostname: DEVICE_NAME,
        ..DhcpConfig::default()
    }
}

/// MQTT client configuration; the defaults carry the deployment
/// constants (broker 10.0.0.4:1883, one-hour keep-alive).
pub fn mqtt_config() -> MqttConfig {
    MqttConfig::default()
}
