//! Host-side user-space driver for the Airspy USB software-defined radio
//! receiver.
//!
//! Manages the USB device lifecycle, issues vendor-specific control
//! commands to configure the tuner, keeps a ring of bulk IN transfers in
//! flight to pull raw sample packets, converts raw 12-bit samples into an
//! interleaved I/Q stream, and hands each processed block to an
//! application callback.

pub mod codec;
pub mod config;
pub mod device;
pub mod dsp;
pub mod error;
pub mod ring;
pub mod stream;
pub mod usb;

pub use config::OpenConfig;
pub use device::{board_id_name, error_name, lib_version, AirspyDevice, ReceiverMode};
pub use error::{AirspyError, Result};
pub use stream::{do_rx, init_rx, term_rx, RxCallback, SampleBlock};
