//! File system types.

/// A file stored on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// File listing and usage of the device file system.
///
/// `used_bytes + free_bytes == total_bytes` is reported by the device and
/// not checked here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsInfo {
    /// Files on the device, in device order.
    pub files: Vec<FileEntry>,
    /// Free bytes.
    pub free_bytes: u64,
    /// Used bytes.
    pub used_bytes: u64,
    /// Total bytes.
    pub total_bytes: u64,
}

impl FsInfo {
    /// Looks up a file by name.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.name == name)
    }
}
