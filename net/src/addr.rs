#![deny(unsafe_code)]
#![deny(warnings)]
//! Address types shared by the driver and the protocol clients

use core::fmt;

/// IPv4 address as four octets in network order
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Ipv4Addr {
    pub octets: [u8; 4],
}

impl Ipv4Addr {
    /// The all-zeroes address, 0.0.0.0
    pub const UNSPECIFIED: Self = Self::new(0, 0, 0, 0);
    /// The limited broadcast address, 255.255.255.255
    pub const BROADCAST: Self = Self::new(255, 255, 255, 255);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self {
            octets: [a, b, c, d],
        }
    }

    pub const fn from_octets(octets: [u8; 4]) -> Self {
        Self { octets }
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl fmt::Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Ipv4Addr {
    fn format(&self, f: defmt::Formatter) {
        let [a, b, c, d] = self.octets;
        defmt::write!(f, "{}.{}.{}.{}", a, b, c, d);
    }
}

/// IEEE 802 MAC address
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MacAddress {
    pub octets: [u8; 6],
}

impl MacAddress {
    pub const fn from_octets(octets: [u8; 6]) -> Self {
        Self { octets }
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MacAddress {
    fn format(&self, f: defmt::Formatter) {
        let o = self.octets;
        defmt::write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0],
            o[1],
            o[2],
            o[3],
            o[4],
            o[5]
        );
    }
}
