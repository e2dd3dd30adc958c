#![deny(unsafe_code)]
#![deny(warnings)]
//! Network client trait
//!
//! Protocol clients share a common driving interface so tasks can bring a
//! session up, retry it, or swap the protocol without changing the
//! surrounding loop. New protocols implement `NetworkClient` without
//! touching driver code.

use super::error::NetworkError;

/// Trait for network protocol clients
///
/// Implementors report failures through [`NetworkError`] rather than
/// panicking; the driving task decides whether to retry, back off, or
/// re-run from scratch.
///
/// # Example Implementation
/// ```ignore
/// struct MqttClient<'d, SPI> { sock: Socket<'d, SPI>, config: MqttConfig }
///
/// impl<SPI: SpiDevice> NetworkClient for MqttClient<'_, SPI> {
///     type Output = ();
///     async fn run(&mut self) -> Result<Self::Output, NetworkError> {
///         // Connect the socket and perform the protocol handshake
///     }
/// }
/// ```
pub trait NetworkClient {
    /// Output type for successful client operation
    type Output;

    /// Run the client operation once
    ///
    /// Performs a single unit of the client's work, such as one protocol
    /// handshake or one address acquisition. Callers re-invoke it for
    /// session recovery.
    fn run(&mut self) -> impl core::future::Future<Output = Result<Self::Output, NetworkError>>;
}
