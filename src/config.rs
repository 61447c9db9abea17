//! Device open configuration.

/// Default USB vendor id for the Airspy family.
pub const DEFAULT_VID: u16 = 0x1d50;
/// Default USB product id for the Airspy family.
pub const DEFAULT_PID: u16 = 0x60a1;

/// Options controlling how [`crate::device::AirspyDevice::open_with_config`]
/// matches and initializes a device.
///
/// Builder-style, matching the teacher's `RtpInputConfig` / `RtpOutputConfig`
/// pattern: plain fields, a `Default` impl, and `with_*` setters that
/// consume and return `self`.
#[derive(Debug, Clone)]
pub struct OpenConfig {
    /// Match only a device whose serial descriptor encodes this 64-bit
    /// serial number. `None` matches the first device found.
    pub serial: Option<u64>,
    /// Vendor id to match. Defaults to [`DEFAULT_VID`].
    pub vid: u16,
    /// Product id to match. Defaults to [`DEFAULT_PID`].
    pub pid: u16,
    /// Start with the packed wire format enabled.
    pub packing_enabled: bool,
    /// Sample rate (Hz) to request immediately after claiming the
    /// interface. `None` leaves the device at its power-on default.
    pub initial_samplerate: Option<u32>,
}

impl Default for OpenConfig {
    fn default() -> Self {
        OpenConfig {
            serial: None,
            vid: DEFAULT_VID,
            pid: DEFAULT_PID,
            packing_enabled: false,
            initial_samplerate: None,
        }
    }
}

impl OpenConfig {
    pub fn with_serial(mut self, serial: u64) -> Self {
        self.serial = Some(serial);
        self
    }

    pub fn with_vid_pid(mut self, vid: u16, pid: u16) -> Self {
        self.vid = vid;
        self.pid = pid;
        self
    }

    pub fn with_packing(mut self, enabled: bool) -> Self {
        self.packing_enabled = enabled;
        self
    }

    pub fn with_initial_samplerate(mut self, hz: u32) -> Self {
        self.initial_samplerate = Some(hz);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_airspy_identity() {
        let cfg = OpenConfig::default();
        assert_eq!(cfg.vid, DEFAULT_VID);
        assert_eq!(cfg.pid, DEFAULT_PID);
        assert!(cfg.serial.is_none());
        assert!(!cfg.packing_enabled);
    }

    #[test]
    fn builder_chains() {
        let cfg = OpenConfig::default()
            .with_serial(0x0123_4567_89ab_cdef)
            .with_packing(true)
            .with_initial_samplerate(10_000_000);
        assert_eq!(cfg.serial, Some(0x0123_4567_89ab_cdef));
        assert!(cfg.packing_enabled);
        assert_eq!(cfg.initial_samplerate, Some(10_000_000));
    }
}
