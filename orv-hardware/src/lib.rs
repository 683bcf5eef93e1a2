//! orv-hardware
//!
//! Hardware abstraction crate that contains the pin-level drivers and the
//! zone-level hardware interface used by the daemon.
//
//! Public API:
//! - `interface::HardwareInterface` - zone-level reads, writes and shutdown release
//! - `driver::PinDriver` - pin-level I/O trait
//! - `sysfs::SysfsDriver` - BeagleBone sysfs driver
//! - `simulated::SimulatedDriver` - in-memory driver for `--mock` and tests

pub mod driver;
pub mod interface;
pub mod simulated;
pub mod sysfs;
pub mod thermistor;

pub use driver::PinDriver;
pub use interface::{HardwareInterface, HardwareSettings, ZoneIo};
pub use simulated::SimulatedDriver;
pub use sysfs::SysfsDriver;
pub use thermistor::ThermistorModel;
