#![deny(unsafe_code)]
#![deny(warnings)]
//! Sample plumbing between the sensor tasks and the publish task

use core::fmt::Write as _;

use defmt::Format;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use heapless::String;

/// Capacity of the formatted payload buffer
pub const VALUE_LEN: usize = 16;

/// One reading from the ambient sensors
#[derive(Clone, Copy, Debug, Format)]
pub struct Sample {
    pub kind: SampleKind,
    pub value: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub enum SampleKind {
    Temperature,
    Humidity,
    Pressure,
    Luminosity,
}

impl SampleKind {
    /// Publish topic for this measurement
    pub const fn topic(self) -> &'static str {
        match self {
            SampleKind::Temperature => "/home/bedroom/ambient1/temperature",
            SampleKind::Humidity => "/home/bedroom/ambient1/humidity",
            SampleKind::Pressure => "/home/bedroom/ambient1/pressure",
            SampleKind::Luminosity => "/home/bedroom/ambient1/luminosity",
        }
    }
}

/// Channel from the sensor tasks to the publish task
/// Using CriticalSectionRawMutex makes it safe across all RTIC priorities
pub static SAMPLE_CHANNEL: Channel<CriticalSectionRawMutex, Sample, 16> = Channel::new();

/// Get a sender for the sample channel (can be called from any task)
pub fn sample_sender() -> Sender<'static, CriticalSectionRawMutex, Sample, 16> {
    SAMPLE_CHANNEL.sender()
}

/// Get a receiver for the sample channel (used inside the publish task)
pub fn sample_receiver() -> Receiver<'static, CriticalSectionRawMutex, Sample, 16> {
    SAMPLE_CHANNEL.receiver()
}

/// Renders a reading as `whole.milli`, truncated toward zero.
pub fn format_value(value: f32) -> Result<String<VALUE_LEN>, core::fmt::Error> {
    let sign = if value < 0.0 { "-" } else { "" };
    let magnitude = if value < 0.0 { -value } else { value };
    let whole = magnitude as u32;
    let milli = ((magnitude - whole as f32) * 1000.0) as u32;

    let mut out = String::new();
    write!(out, "{}{}.{:03}", sign, whole, milli)?;
    Ok(out)
}
