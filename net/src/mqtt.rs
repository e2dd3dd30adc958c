#![deny(unsafe_code)]
#![deny(warnings)]
//! MQTT client
//!
//! A publish-only MQTT v3.1.1 client covering the fixed subset the sensor
//! node needs: CONNECT, the CONNACK it answers, and QoS 0 PUBLISH. The
//! CONNECT packet is a constant fourteen bytes (zero-length client
//! identifier with CleanSession set, so the broker assigns the identity)
//! and PUBLISH packets carry a single remaining-length byte. Publishes
//! stage the fixed header, topic length, topic, and payload as separate
//! writes into the socket's TX buffer and commit them with one send.

use embassy_time::Duration;
use embedded_hal_async::spi::SpiDevice;

use crate::addr::Ipv4Addr;
use crate::client::NetworkClient;
use crate::device::W5500;
use crate::error::NetworkError;
use crate::socket::{Protocol, Socket, SocketId, TxCursor};

/// Protocol name in the CONNECT variable header
const PROTO_NAME: &[u8; 4] = b"MQTT";
/// Protocol level for v3.1.1 [MQTT-3.1.2-2]
const PROTO_LEVEL: u8 = 4;
/// CONNECT remaining length: variable header plus empty client identifier
const CONNECT_REMAINING: u8 = 12;
/// CleanSession connect flag, required with a zero-length client
/// identifier [MQTT-3.1.3-7]
const FLAG_CLEAN_SESSION: u8 = 1 << 1;
/// Bytes of the topic-length prefix in a PUBLISH payload
const TOPIC_LEN_BYTES: usize = 2;

/// Total length of the CONNECT packet
pub const CONNECT_BYTES: usize = 14;
/// Total length of the CONNACK packet
pub const CONNACK_BYTES: usize = 4;
/// Length of the PUBLISH fixed header
pub const PUBLISH_HEADER_BYTES: usize = 2;

/// Control packet types, carried in the fixed header's high nibble
pub mod packet {
    pub const CONNECT: u8 = 1;
    pub const CONNACK: u8 = 2;
    pub const PUBLISH: u8 = 3;
    pub const PUBACK: u8 = 4;
    pub const PUBREC: u8 = 5;
    pub const PUBREL: u8 = 6;
    pub const PUBCOMP: u8 = 7;
    pub const SUBSCRIBE: u8 = 8;
    pub const SUBACK: u8 = 9;
    pub const UNSUBSCRIBE: u8 = 10;
    pub const UNSUBACK: u8 = 11;
    pub const PINGREQ: u8 = 12;
    pub const PINGRESP: u8 = 13;
    pub const DISCONNECT: u8 = 14;
}

/// CONNACK return codes
pub mod return_code {
    pub const ACCEPTED: u8 = 0;
    pub const BAD_PROTO: u8 = 1;
    pub const BAD_ID: u8 = 2;
    pub const UNAVAILABLE: u8 = 3;
    pub const BAD_CREDS: u8 = 4;
    pub const NOT_AUTH: u8 = 5;
}

/// Encodes the session's CONNECT packet: clean session, no will, no
/// credentials, no client identifier
pub fn encode_connect(keep_alive_secs: u16) -> [u8; CONNECT_BYTES] {
    let mut buf = [0u8; CONNECT_BYTES];
    buf[0] = packet::CONNECT << 4;
    buf[1] = CONNECT_REMAINING;
    buf[2..4].copy_from_slice(&(PROTO_NAME.len() as u16).to_be_bytes());
    buf[4..8].copy_from_slice(PROTO_NAME);
    buf[8] = PROTO_LEVEL;
    buf[9] = FLAG_CLEAN_SESSION;
    buf[10..12].copy_from_slice(&keep_alive_secs.to_be_bytes());
    // trailing two bytes stay zero: the empty client identifier's length
    buf
}

/// Checks a CONNACK for shape and acceptance
pub fn parse_connack(buf: &[u8; CONNACK_BYTES]) -> Result<(), NetworkError> {
    if buf[0] >> 4 != packet::CONNACK || buf[1] != 2 {
        return Err(NetworkError::MqttBadPacket);
    }
    if buf[3] != return_code::ACCEPTED {
        return Err(NetworkError::MqttConRefused);
    }
    Ok(())
}

/// Encodes a QoS 0 PUBLISH fixed header for the given topic and payload
/// sizes. The remaining length must fit the single-byte encoding.
pub fn encode_publish_header(topic_len: usize, payload_len: usize) -> [u8; PUBLISH_HEADER_BYTES] {
    let remaining = TOPIC_LEN_BYTES + topic_len + payload_len;
    debug_assert!(remaining <= 0x7F, "remaining length needs more than one byte");
    [packet::PUBLISH << 4, remaining as u8]
}

/// MQTT client tuning
#[derive(Clone)]
pub struct MqttConfig {
    /// Broker address
    pub server_ip: Ipv4Addr,
    /// Broker port
    pub server_port: u16,
    /// Our TCP source port
    pub source_port: u16,
    /// Keep-alive interval advertised in CONNECT
    pub keep_alive_secs: u16,
    /// Socket open and TCP connect timeout
    pub connect_timeout: Duration,
    /// CONNACK wait timeout
    pub ack_timeout: Duration,
    /// Send completion timeout
    pub send_timeout: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::new(10, 0, 0, 4),
            server_port: 1883,
            source_port: 33650,
            keep_alive_secs: 3600,
            connect_timeout: Duration::from_millis(500),
            ack_timeout: Duration::from_millis(1000),
            send_timeout: Duration::from_millis(100),
        }
    }
}

/// MQTT client driving one TCP socket
pub struct MqttClient<'d, SPI> {
    sock: Socket<'d, SPI>,
    config: MqttConfig,
}

impl<'d, SPI: SpiDevice> MqttClient<'d, SPI> {
    pub fn new(dev: &'d W5500<SPI>, socket: SocketId, config: MqttConfig) -> Self {
        Self {
            sock: dev.socket(socket),
            config,
        }
    }

    /// Opens the TCP socket and connects it to the broker
    pub async fn initialize(&mut self) -> Result<(), NetworkError> {
        self.sock
            .open(Protocol::Tcp, self.config.source_port, self.config.connect_timeout)
            .await?;
        self.sock
            .connect(self.config.server_ip, self.config.server_port, self.config.connect_timeout)
            .await
    }

    /// Performs the session handshake on the connected socket
    pub async fn connect(&mut self) -> Result<(), NetworkError> {
        let connect = encode_connect(self.config.keep_alive_secs);
        self.sock.send(&connect, self.config.send_timeout).await?;

        let mut connack = [0u8; CONNACK_BYTES];
        let len = self.sock.recv_tcp(&mut connack, self.config.ack_timeout).await?;
        if len != CONNACK_BYTES {
            return Err(NetworkError::MqttBadPacket);
        }
        parse_connack(&connack)
    }

    /// Publishes `payload` to `topic` at QoS 0.
    ///
    /// The packet is assembled directly in the chip's TX buffer, one part
    /// per wire field, and goes out with a single SEND.
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), NetworkError> {
        let header = encode_publish_header(topic.len(), payload.len());
        let mut cursor = TxCursor::default();
        self.sock.write_part(&header, &mut cursor).await?;
        self.sock
            .write_part(&(topic.len() as u16).to_be_bytes(), &mut cursor)
            .await?;
        self.sock.write_part(topic.as_bytes(), &mut cursor).await?;
        self.sock.write_part(payload, &mut cursor).await?;
        self.sock.send_buffer(cursor, self.config.send_timeout).await
    }
}

impl<SPI: SpiDevice> NetworkClient for MqttClient<'_, SPI> {
    type Output = ();

    /// One-shot bring-up: transport connect plus session handshake
    async fn run(&mut self) -> Result<(), NetworkError> {
        self.initialize().await?;
        self.connect().await
    }
}
