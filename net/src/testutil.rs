#![deny(unsafe_code)]
#![deny(warnings)]
//! Scripted SPI device for driver tests
//!
//! A [`MockSpi`] replays a script of expected register transfers. Each
//! transaction's 3-byte frame header is decoded and matched against the next
//! step; reads are answered with scripted bytes. Helpers build the step
//! sequences the socket layer emits for its compound operations.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal_async::spi::{ErrorKind, ErrorType, Operation, SpiDevice};

use crate::regs::{self, command, socket, status};
use crate::socket::Protocol;
use crate::{addr::Ipv4Addr, events};

/// One expected transfer
pub enum Step {
    /// Register write carrying exactly these bytes
    Write { addr: u16, bsb: u8, bytes: Vec<u8> },
    /// Register write of this many bytes, contents ignored
    WriteAny { addr: u16, bsb: u8, len: usize },
    /// Register write captured for later inspection
    Capture {
        addr: u16,
        bsb: u8,
        len: usize,
        into: Rc<RefCell<Vec<u8>>>,
    },
    /// Register read answered with these bytes
    Read { addr: u16, bsb: u8, bytes: Vec<u8> },
    /// Transfer that fails at the bus
    Fail,
}

pub fn wr(addr: u16, bsb: u8, bytes: &[u8]) -> Step {
    Step::Write {
        addr,
        bsb,
        bytes: bytes.to_vec(),
    }
}

pub fn wr_any(addr: u16, bsb: u8, len: usize) -> Step {
    Step::WriteAny { addr, bsb, len }
}

pub fn capture(addr: u16, bsb: u8, len: usize) -> (Step, Rc<RefCell<Vec<u8>>>) {
    let into = Rc::new(RefCell::new(Vec::new()));
    (
        Step::Capture {
            addr,
            bsb,
            len,
            into: Rc::clone(&into),
        },
        into,
    )
}

pub fn rd(addr: u16, bsb: u8, bytes: &[u8]) -> Step {
    Step::Read {
        addr,
        bsb,
        bytes: bytes.to_vec(),
    }
}

pub fn fail() -> Step {
    Step::Fail
}

/// Handle for checking the script ran to completion
pub struct ScriptHandle(Rc<RefCell<VecDeque<Step>>>);

impl ScriptHandle {
    pub fn assert_done(&self) {
        let remaining = self.0.borrow().len();
        assert_eq!(remaining, 0, "{} scripted transfers never happened", remaining);
    }
}

pub struct MockSpi {
    script: Rc<RefCell<VecDeque<Step>>>,
}

impl MockSpi {
    pub fn new(steps: Vec<Step>) -> (Self, ScriptHandle) {
        let script = Rc::new(RefCell::new(VecDeque::from(steps)));
        let handle = ScriptHandle(Rc::clone(&script));
        (Self { script }, handle)
    }
}

impl ErrorType for MockSpi {
    type Error = ErrorKind;
}

impl SpiDevice for MockSpi {
    async fn transaction(
        &mut self,
        operations: &mut [Operation<'_, u8>],
    ) -> Result<(), Self::Error> {
        let (first, rest) = operations
            .split_first_mut()
            .expect("transaction with no operations");
        let header: &[u8] = match first {
            Operation::Write(bytes) => bytes,
            _ => panic!("transaction must start with a header write"),
        };
        assert_eq!(header.len(), regs::SPI_FRAME_BYTES, "bad frame header length");
        let addr = u16::from_be_bytes([header[0], header[1]]);
        let bsb = header[2] >> 3;
        let write = header[2] & 0x04 != 0;
        assert_eq!(header[2] & 0x03, 0, "operation mode must be VDM");

        let step = self
            .script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted transfer: addr {addr:#06x} bsb {bsb:#04x} write {write}"));

        let payload = match rest {
            [op] => op,
            _ => panic!("expected exactly one payload operation"),
        };

        match step {
            Step::Write { addr: a, bsb: b, bytes } => {
                assert!(write, "expected write at {a:#06x}, device read {addr:#06x}");
                assert_eq!((addr, bsb), (a, b), "write went to the wrong register");
                match payload {
                    Operation::Write(data) => assert_eq!(*data, &bytes[..], "payload mismatch at {a:#06x}"),
                    _ => panic!("expected write payload at {a:#06x}"),
                }
            }
            Step::WriteAny { addr: a, bsb: b, len } => {
                assert!(write, "expected write at {a:#06x}, device read {addr:#06x}");
                assert_eq!((addr, bsb), (a, b), "write went to the wrong register");
                match payload {
                    Operation::Write(data) => assert_eq!(data.len(), len, "payload length at {a:#06x}"),
                    _ => panic!("expected write payload at {a:#06x}"),
                }
            }
            Step::Capture { addr: a, bsb: b, len, into } => {
                assert!(write, "expected write at {a:#06x}, device read {addr:#06x}");
                assert_eq!((addr, bsb), (a, b), "write went to the wrong register");
                match payload {
                    Operation::Write(data) => {
                        assert_eq!(data.len(), len, "payload length at {a:#06x}");
                        into.borrow_mut().extend_from_slice(data);
                    }
                    _ => panic!("expected write payload at {a:#06x}"),
                }
            }
            Step::Read { addr: a, bsb: b, bytes } => {
                assert!(!write, "expected read at {a:#06x}, device wrote {addr:#06x}");
                assert_eq!((addr, bsb), (a, b), "read went to the wrong register");
                match payload {
                    Operation::Read(buf) => {
                        assert_eq!(buf.len(), bytes.len(), "read length at {a:#06x}");
                        buf.copy_from_slice(&bytes);
                    }
                    _ => panic!("expected read payload at {a:#06x}"),
                }
            }
            Step::Fail => return Err(ErrorKind::Other),
        }
        Ok(())
    }
}

/// Transfers for `Socket::close` against an already-closed socket
pub fn close_steps(sn: u8) -> Vec<Step> {
    let sb = regs::socket_block(sn);
    vec![
        wr(socket::SN_CR, sb, &[command::CLOSE]),
        rd(socket::SN_CR, sb, &[0x00]),
        rd(socket::SN_SR, sb, &[status::CLOSED]),
    ]
}

/// Transfers for `Socket::open` with no stale interrupt flags
pub fn open_steps(sn: u8, proto: Protocol, port: u16) -> Vec<Step> {
    let sb = regs::socket_block(sn);
    let open_status = match proto {
        Protocol::Tcp => status::INIT,
        Protocol::Udp => status::UDP,
    };
    let mut steps = close_steps(sn);
    steps.extend([
        rd(socket::SN_IR, sb, &[0x00]),
        wr(socket::SN_IMR, sb, &[events::ALL]),
        wr(socket::SN_MR, sb, &[proto as u8]),
        wr(socket::SN_PORT, sb, &port.to_be_bytes()),
        wr(socket::SN_CR, sb, &[command::OPEN]),
        rd(socket::SN_CR, sb, &[0x00]),
        rd(socket::SN_SR, sb, &[open_status]),
    ]);
    steps
}

/// Transfers for `Socket::set_destination`
pub fn destination_steps(sn: u8, ip: Ipv4Addr, port: u16) -> Vec<Step> {
    let sb = regs::socket_block(sn);
    vec![
        wr(socket::SN_DIPR, sb, &ip.octets),
        wr(socket::SN_DPORT, sb, &port.to_be_bytes()),
    ]
}

/// Transfers for `Socket::send` carrying exactly `data`
pub fn send_steps(sn: u8, data: &[u8], fsr: u16, ptr: u16) -> Vec<Step> {
    let mut steps = send_prefix_steps(sn, data.len(), fsr, ptr);
    steps[2] = wr(ptr, regs::socket_tx_block(sn), data);
    steps
}

/// Transfers for `Socket::send` checking only the payload length
pub fn send_any_steps(sn: u8, len: usize, fsr: u16, ptr: u16) -> Vec<Step> {
    send_prefix_steps(sn, len, fsr, ptr)
}

fn send_prefix_steps(sn: u8, len: usize, fsr: u16, ptr: u16) -> Vec<Step> {
    let sb = regs::socket_block(sn);
    let end = ptr.wrapping_add(len as u16);
    vec![
        rd(socket::SN_TX_FSR, sb, &fsr.to_be_bytes()),
        rd(socket::SN_TX_WR, sb, &ptr.to_be_bytes()),
        wr_any(ptr, regs::socket_tx_block(sn), len),
        wr(socket::SN_TX_WR, sb, &end.to_be_bytes()),
        wr(socket::SN_CR, sb, &[command::SEND]),
        rd(socket::SN_CR, sb, &[0x00]),
    ]
}

/// Transfers for `Socket::recv_udp` delivering one datagram
pub fn recv_udp_steps(sn: u8, ptr: u16, source: Ipv4Addr, port: u16, payload: &[u8]) -> Vec<Step> {
    let sb = regs::socket_block(sn);
    let rx = regs::socket_rx_block(sn);
    let len = payload.len() as u16;
    let mut header = Vec::new();
    header.extend_from_slice(&source.octets);
    header.extend_from_slice(&port.to_be_bytes());
    header.extend_from_slice(&len.to_be_bytes());
    let end = ptr.wrapping_add(8).wrapping_add(len);
    vec![
        rd(socket::SN_RX_RD, sb, &ptr.to_be_bytes()),
        rd(ptr, rx, &header),
        rd(ptr.wrapping_add(8), rx, payload),
        wr(socket::SN_RX_RD, sb, &end.to_be_bytes()),
    ]
}

/// Transfers for `Socket::recv_tcp` delivering `payload`
pub fn recv_tcp_steps(sn: u8, ptr: u16, payload: &[u8]) -> Vec<Step> {
    let sb = regs::socket_block(sn);
    let rx = regs::socket_rx_block(sn);
    let len = payload.len() as u16;
    let end = ptr.wrapping_add(len);
    vec![
        rd(socket::SN_RX_RSR, sb, &len.to_be_bytes()),
        rd(socket::SN_RX_RD, sb, &ptr.to_be_bytes()),
        rd(ptr, rx, payload),
        wr(socket::SN_RX_RD, sb, &end.to_be_bytes()),
    ]
}
