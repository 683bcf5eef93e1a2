//! Pin driver abstraction
//!
//! A [`PinDriver`] performs raw I/O on physical pins described by the board's pin
//! table. It knows nothing about zones or wiring; the
//! [`HardwareInterface`](crate::HardwareInterface) does that mapping.

use async_trait::async_trait;
use orv_core::{AdcChannel, GpioLine, PwmChannel, Result};

/// Trait for pin-level I/O
///
/// This trait enables testing of `HardwareInterface` without real hardware
/// by allowing simulated implementations.
#[async_trait]
pub trait PinDriver: Send {
    /// Read the raw counts of an analog input
    async fn read_adc(&mut self, channel: &AdcChannel) -> Result<u16>;

    /// Configure and enable a PWM output
    async fn write_pwm(&mut self, channel: &PwmChannel, period_ns: u32, duty_ns: u32)
        -> Result<()>;

    /// Drive a GPIO output high or low
    async fn write_gpio(&mut self, line: &GpioLine, high: bool) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
