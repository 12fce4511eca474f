//! Device information types.

/// Firmware and flash details returned by `node.info()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    /// Firmware major version.
    pub major_ver: String,
    /// Firmware minor version.
    pub minor_ver: String,
    /// Firmware development version.
    pub dev_ver: String,
    /// Chip id.
    pub chip_id: String,
    /// Flash chip id.
    pub flash_id: String,
    /// Flash size in KiB.
    pub flash_size: String,
    /// Flash mode (0 = QIO, 1 = QOUT, 2 = DIO, 3 = DOUT).
    pub flash_mode: String,
    /// Flash speed in Hz.
    pub flash_speed: String,
}

impl NodeInfo {
    /// Returns the firmware version as `major.minor.dev`.
    #[must_use]
    pub fn version(&self) -> String {
        format!("{}.{}.{}", self.major_ver, self.minor_ver, self.dev_ver)
    }
}
