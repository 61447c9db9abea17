//! Device session: enumeration, claim, control-request helpers, and
//! configuration state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType, UsbContext};

use crate::config::OpenConfig;
use crate::dsp::IqConverter;
use crate::error::{AirspyError, Result};
use crate::ring::TransferRing;
use crate::usb::{
    self, VendorRequest, GAIN_COUNT, LINEARITY_LNA_GAINS, LINEARITY_MIXER_GAINS,
    LINEARITY_VGA_GAINS, SENSITIVITY_LNA_GAINS, SENSITIVITY_MIXER_GAINS, SENSITIVITY_VGA_GAINS,
};

const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);

/// Receiver mode sent via `SET_RECEIVER_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ReceiverMode {
    Off = 0,
    Rx = 1,
}

/// An open Airspy device session. Owns the USB handle, the transfer ring,
/// the converter state, and configuration flags. Created by `open` /
/// `open_by_serial` / `open_with_config`; destroyed by `close`.
///
/// `streaming` and `stop_requested` are the only fields mutated from the
/// transfer completion callback; every other field is quiescent while
/// streaming, matching the teacher's `RtpInputStream` flag discipline
/// (`src/stream/input.rs`).
pub struct AirspyDevice {
    handle: DeviceHandle<Context>,
    /// Same libusb context the handle was opened against; the event pump
    /// in `do_rx` must poll this one, not a freshly created context, or
    /// completions for transfers submitted on `handle` are never
    /// delivered.
    pub(crate) context: Context,
    samplerates: Vec<u32>,
    packing_enabled: bool,
    pub(crate) streaming: AtomicBool,
    pub(crate) stop_requested: AtomicBool,
    pub(crate) ring: TransferRing,
    pub(crate) converter: IqConverter,
    /// Reserved region the completion handler unpacks into when the
    /// packed wire format is enabled, sized to the worst case (unpacked
    /// buffer) so it never reallocates mid-stream.
    pub(crate) unpack_scratch: Vec<u16>,
    pub(crate) callback: Option<crate::stream::RxCallback>,
    /// Opaque context pointer handed back to the callback on every
    /// invocation; stashed by `do_rx`, read by the completion handler.
    pub(crate) callback_ctx: *mut std::os::raw::c_void,
}

fn serial_descriptor(serial: u64) -> String {
    format!("{}{:016X}", usb::SERIAL_PREFIX, serial)
}

fn find_device(context: &Context, cfg: &OpenConfig) -> Result<Device<Context>> {
    for device in context.devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if desc.vendor_id() != cfg.vid || desc.product_id() != cfg.pid {
            continue;
        }

        let Some(wanted) = cfg.serial else {
            return Ok(device);
        };

        let handle = match device.open() {
            Ok(h) => h,
            Err(_) => continue,
        };
        let serial = match handle.read_serial_number_string_ascii(&desc) {
            Ok(s) => s,
            Err(_) => continue,
        };

        if serial.len() == usb::SERIAL_EXPECTED_LEN
            && serial.eq_ignore_ascii_case(&serial_descriptor(wanted))
        {
            return Ok(device);
        }
    }

    Err(AirspyError::NotFound)
}

fn request_in() -> u8 {
    rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device)
}

fn request_out() -> u8 {
    rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device)
}

impl AirspyDevice {
    /// Opens the first matching Airspy device with default identity and no
    /// serial filter.
    pub fn open() -> Result<Self> {
        Self::open_with_config(OpenConfig::default())
    }

    /// Opens the device whose serial descriptor encodes `serial`.
    pub fn open_by_serial(serial: u64) -> Result<Self> {
        Self::open_with_config(OpenConfig::default().with_serial(serial))
    }

    /// Opens a device matching `cfg`: optional serial filter, optional
    /// vendor/product id override, initial packing mode and sample rate.
    pub fn open_with_config(cfg: OpenConfig) -> Result<Self> {
        let context = Context::new()?;
        let device = find_device(&context, &cfg)?;
        let mut handle = device.open()?;

        if handle.kernel_driver_active(0).unwrap_or(false) {
            handle.detach_kernel_driver(0)?;
        }
        handle.set_active_configuration(1)?;
        handle.claim_interface(0)?;

        let samplerates = Self::read_samplerates(&handle).unwrap_or_else(|_| {
            usb::FALLBACK_SAMPLERATES.to_vec()
        });

        let mut airspy = AirspyDevice {
            handle,
            context,
            samplerates,
            packing_enabled: cfg.packing_enabled,
            streaming: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            ring: TransferRing::new(),
            converter: IqConverter::default_kernel(),
            unpack_scratch: vec![0u16; usb::DEFAULT_BUFFER_SIZE / 2],
            callback: None,
            callback_ctx: std::ptr::null_mut(),
        };

        let buffer_size = if cfg.packing_enabled {
            usb::PACKED_BUFFER_SIZE
        } else {
            usb::DEFAULT_BUFFER_SIZE
        };
        airspy
            .ring
            .allocate(usb::DEFAULT_TRANSFER_COUNT, buffer_size)?;

        if let Some(hz) = cfg.initial_samplerate {
            airspy.set_samplerate(hz)?;
        }

        Ok(airspy)
    }

    fn read_samplerates(handle: &DeviceHandle<Context>) -> Result<Vec<u32>> {
        let mut count_buf = [0u8; 4];
        handle.read_control(
            request_in(),
            VendorRequest::GetSamplerates as u8,
            0,
            0,
            &mut count_buf,
            CONTROL_TIMEOUT,
        )?;
        let count = u32::from_le_bytes(count_buf) as usize;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut rates_buf = vec![0u8; count * 4];
        handle.read_control(
            request_in(),
            VendorRequest::GetSamplerates as u8,
            0,
            count as u16,
            &mut rates_buf,
            CONTROL_TIMEOUT,
        )?;

        Ok(rates_buf
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn get_samplerates(&self) -> &[u32] {
        &self.samplerates
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    pub fn packing_enabled(&self) -> bool {
        self.packing_enabled
    }

    /// Selects a sample rate by identity match against the fetched list
    /// (sent as an index in `wIndex`), falling back to a kHz-encoded value
    /// for backward compatibility when no match is found. `SET_SAMPLERATE`
    /// is an IN transfer with `wValue = 0`; the halt on the sample endpoint
    /// is cleared first, matching `airspy_set_samplerate`.
    pub fn set_samplerate(&mut self, hz: u32) -> Result<()> {
        let index = match self.samplerates.iter().position(|&r| r == hz) {
            Some(idx) => idx as u16,
            None if hz >= 1_000_000 => (hz / 1000) as u16,
            None => return Err(AirspyError::InvalidParam("samplerate not supported".into())),
        };

        let _ = self.handle.clear_halt(usb::SAMPLE_ENDPOINT);
        let mut retval = [0u8; 1];
        self.read_control(VendorRequest::SetSamplerate, 0, index, &mut retval)
    }

    /// Sets receiver mode; on an OFF→RX transition clears the halt on the
    /// sample endpoint and resets the converter.
    pub fn set_receiver_mode(&mut self, mode: ReceiverMode) -> Result<()> {
        if mode == ReceiverMode::Rx {
            let _ = self.handle.clear_halt(usb::SAMPLE_ENDPOINT);
            self.converter.reset();
        }
        self.write_control(VendorRequest::SetReceiverMode, mode as u16, 0, &[])
    }

    pub fn set_freq(&mut self, hz: u32) -> Result<()> {
        self.write_control(VendorRequest::SetFreq, 0, 0, &hz.to_le_bytes())
    }

    pub fn set_lna_gain(&mut self, value: u8) -> Result<()> {
        self.write_control(VendorRequest::SetLnaGain, value.min(14) as u16, 0, &[])
    }

    pub fn set_mixer_gain(&mut self, value: u8) -> Result<()> {
        self.write_control(VendorRequest::SetMixerGain, value.min(15) as u16, 0, &[])
    }

    pub fn set_vga_gain(&mut self, value: u8) -> Result<()> {
        self.write_control(VendorRequest::SetVgaGain, value.min(15) as u16, 0, &[])
    }

    pub fn set_lna_agc(&mut self, enable: bool) -> Result<()> {
        self.write_control(VendorRequest::SetLnaAgc, enable as u16, 0, &[])
    }

    pub fn set_mixer_agc(&mut self, enable: bool) -> Result<()> {
        self.write_control(VendorRequest::SetMixerAgc, enable as u16, 0, &[])
    }

    fn apply_gain_preset(
        &mut self,
        value: u8,
        vga: &[u8; GAIN_COUNT],
        mixer: &[u8; GAIN_COUNT],
        lna: &[u8; GAIN_COUNT],
    ) -> Result<()> {
        let clamped = (value as usize).min(GAIN_COUNT - 1);
        let index = GAIN_COUNT - 1 - clamped;

        self.set_mixer_agc(false)?;
        self.set_lna_agc(false)?;
        self.set_vga_gain(vga[index])?;
        self.set_mixer_gain(mixer[index])?;
        self.set_lna_gain(lna[index])
    }

    /// Linearity-optimized gain preset, indexed 0..21. `value` is clamped
    /// to `GAIN_COUNT - 1` before inversion, so out-of-range input never
    /// underflows (see DESIGN.md for the rationale).
    pub fn set_linearity_gain(&mut self, value: u8) -> Result<()> {
        self.apply_gain_preset(
            value,
            &LINEARITY_VGA_GAINS,
            &LINEARITY_MIXER_GAINS,
            &LINEARITY_LNA_GAINS,
        )
    }

    pub fn set_sensitivity_gain(&mut self, value: u8) -> Result<()> {
        self.apply_gain_preset(
            value,
            &SENSITIVITY_VGA_GAINS,
            &SENSITIVITY_MIXER_GAINS,
            &SENSITIVITY_LNA_GAINS,
        )
    }

    /// Toggles the wire format. Refuses with `Busy` while streaming, since
    /// it reallocates the ring.
    pub fn set_packing(&mut self, enabled: bool) -> Result<()> {
        if self.is_streaming() {
            return Err(AirspyError::Busy);
        }
        if enabled == self.packing_enabled {
            return Ok(());
        }

        self.write_control(VendorRequest::SetPacking, enabled as u16, 0, &[])?;

        self.ring.cancel();
        self.ring.free();
        let buffer_size = if enabled {
            usb::PACKED_BUFFER_SIZE
        } else {
            usb::DEFAULT_BUFFER_SIZE
        };
        self.ring
            .allocate(usb::DEFAULT_TRANSFER_COUNT, buffer_size)?;
        self.packing_enabled = enabled;
        Ok(())
    }

    /// Implemented as a GPIO write to port 1, pin 13.
    pub fn set_rf_bias(&mut self, enabled: bool) -> Result<()> {
        let index = usb::gpio_index(1, 13);
        self.write_control(VendorRequest::GpioWrite, enabled as u16, index, &[])
    }

    pub fn gpio_write(&mut self, port: u8, pin: u8, value: u8) -> Result<()> {
        let index = usb::gpio_index(port, pin);
        self.write_control(VendorRequest::GpioWrite, value as u16, index, &[])
    }

    pub fn gpio_read(&mut self, port: u8, pin: u8) -> Result<u8> {
        let index = usb::gpio_index(port, pin);
        let mut buf = [0u8; 1];
        self.read_control(VendorRequest::GpioRead, 0, index, &mut buf)?;
        Ok(buf[0])
    }

    pub fn gpiodir_write(&mut self, port: u8, pin: u8, direction: u8) -> Result<()> {
        let index = usb::gpio_index(port, pin);
        self.write_control(VendorRequest::GpiodirWrite, direction as u16, index, &[])
    }

    pub fn si5351c_read(&mut self, register: u16) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_control(VendorRequest::Si5351cRead, register, 0, &mut buf)?;
        Ok(buf[0])
    }

    pub fn si5351c_write(&mut self, register: u16, value: u8) -> Result<()> {
        self.write_control(VendorRequest::Si5351cWrite, register, value as u16, &[])
    }

    pub fn r820t_read(&mut self, register: u16) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_control(VendorRequest::R820tRead, register, 0, &mut buf)?;
        Ok(buf[0])
    }

    pub fn r820t_write(&mut self, register: u16, value: u8) -> Result<()> {
        self.write_control(VendorRequest::R820tWrite, register, value as u16, &[])
    }

    /// `address` is split high16 in `value`, low16 in `index`.
    pub fn spiflash_erase(&mut self) -> Result<()> {
        self.write_control(VendorRequest::SpiflashErase, 0, 0, &[])
    }

    pub fn spiflash_erase_sector(&mut self, sector: u16) -> Result<()> {
        self.write_control(VendorRequest::SpiflashEraseSector, sector, 0, &[])
    }

    pub fn spiflash_write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let value = (address >> 16) as u16;
        let index = (address & 0xffff) as u16;
        self.write_control(VendorRequest::SpiflashWrite, value, index, data)
    }

    pub fn spiflash_read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        let value = (address >> 16) as u16;
        let index = (address & 0xffff) as u16;
        self.read_control(VendorRequest::SpiflashRead, value, index, buf)
    }

    pub fn board_id(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_control(VendorRequest::BoardIdRead, 0, 0, &mut buf)?;
        Ok(buf[0])
    }

    pub fn version_string(&mut self) -> Result<String> {
        let mut buf = [0u8; 127];
        self.read_control(VendorRequest::VersionStringRead, 0, 0, &mut buf)?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    /// Two 32-bit part-id words followed by four 32-bit serial words,
    /// converted to host endian.
    pub fn board_partid_serialno(&mut self) -> Result<([u32; 2], [u32; 4])> {
        let mut buf = [0u8; 24];
        self.read_control(VendorRequest::BoardPartidSerialnoRead, 0, 0, &mut buf)?;
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let partid = [word(0), word(4)];
        let serial = [word(8), word(12), word(16), word(20)];
        Ok((partid, serial))
    }

    fn write_control(
        &self,
        request: VendorRequest,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<()> {
        let written =
            self.handle
                .write_control(request_out(), request as u8, value, index, data, CONTROL_TIMEOUT)?;
        if written != data.len() {
            return Err(AirspyError::Transport("short control write".into()));
        }
        Ok(())
    }

    fn read_control(
        &self,
        request: VendorRequest,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<()> {
        let read =
            self.handle
                .read_control(request_in(), request as u8, value, index, buf, CONTROL_TIMEOUT)?;
        if read != buf.len() {
            return Err(AirspyError::Transport("short control read".into()));
        }
        Ok(())
    }

    pub fn init_rx(&mut self) -> Result<()> {
        crate::stream::init_rx(self)
    }

    pub fn do_rx(&mut self, callback: crate::stream::RxCallback, ctx: *mut std::os::raw::c_void) -> Result<()> {
        crate::stream::do_rx(self, callback, ctx)
    }

    pub fn term_rx(&mut self) -> Result<()> {
        crate::stream::term_rx(self)
    }

    pub(crate) fn raw_handle(&self) -> *mut libusb1_sys::libusb_device_handle {
        self.handle.as_raw()
    }

    /// Idempotent: calls `term_rx` internally (ignoring its result),
    /// releases the ring, and releases the USB handle via normal
    /// `DeviceHandle` drop.
    pub fn close(&mut self) {
        let _ = crate::stream::term_rx(self);
        self.ring.free();
    }
}

impl Drop for AirspyDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Human-readable error name, mirroring `airspy_error_name`.
pub fn error_name(err: &AirspyError) -> &'static str {
    match err {
        AirspyError::InvalidParam(_) => "AIRSPY_ERROR_INVALID_PARAM",
        AirspyError::NotFound => "AIRSPY_ERROR_NOT_FOUND",
        AirspyError::Busy => "AIRSPY_ERROR_BUSY",
        AirspyError::NoMem => "AIRSPY_ERROR_NO_MEM",
        AirspyError::Transport(_) => "AIRSPY_ERROR_LIBUSB",
        AirspyError::StreamingStopped => "AIRSPY_ERROR_STREAMING_STOPPED",
        AirspyError::Other(_) => "AIRSPY_ERROR_OTHER",
    }
}

/// Human-readable board id name, mirroring `airspy_board_id_name`.
pub fn board_id_name(id: u8) -> &'static str {
    match id {
        0 => "AIRSPY",
        1 => "AIRSPY MINI",
        2 => "AIRSPY R2",
        _ => "UNKNOWN",
    }
}

/// Crate version tuple, mirroring `airspy_lib_version`.
pub fn lib_version() -> (u32, u32, u32) {
    (0, 1, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_descriptor_format() {
        assert_eq!(
            serial_descriptor(0x0123_4567_89ab_cdef),
            "AIRSPY SN:0123456789ABCDEF"
        );
    }

    #[test]
    fn gpio_index_matches_rf_bias_convention() {
        assert_eq!(usb::gpio_index(1, 13), 45);
    }

    #[test]
    fn linearity_gain_table_row_bounds() {
        // index 0 (row for value=21 after clamp-and-invert) and index 21
        // (value=0) match the table endpoints used by the end-to-end
        // scenario in the external interface contract.
        assert_eq!(LINEARITY_VGA_GAINS[0], 13);
        assert_eq!(LINEARITY_MIXER_GAINS[0], 12);
        assert_eq!(LINEARITY_LNA_GAINS[0], 14);
        assert_eq!(LINEARITY_VGA_GAINS[21], 4);
        assert_eq!(LINEARITY_MIXER_GAINS[21], 0);
        assert_eq!(LINEARITY_LNA_GAINS[21], 0);
    }

    #[test]
    fn gain_preset_clamp_never_underflows() {
        // value = 255 clamps to GAIN_COUNT - 1 = 21 before inversion,
        // landing on index 0, never wrapping.
        let clamped = (255usize).min(GAIN_COUNT - 1);
        let index = GAIN_COUNT - 1 - clamped;
        assert_eq!(index, 0);
    }
}
