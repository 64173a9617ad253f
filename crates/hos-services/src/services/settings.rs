//! `set:sys` - system settings

use log::debug;

use crate::command::{BufferSpec, Command, ServiceCommands};
use crate::context::ServiceCtx;
use crate::error::ServiceResult;

/// Size of the firmware version record.
pub const FIRMWARE_VERSION_SIZE: usize = 0x100;

/// The firmware the emulated system reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub micro: u8,
    pub revision: i32,
    pub platform: &'static str,
    pub version_hash: &'static str,
    pub display_version: &'static str,
    pub display_title: &'static str,
}

impl Default for FirmwareVersion {
    fn default() -> Self {
        Self {
            major: 3,
            minor: 0,
            micro: 0,
            revision: 0x0A,
            platform: "NX",
            version_hash: "7fbde2b0bba4d14107bf836e4643043d9f6c8e47",
            display_version: "3.0.0",
            display_title: "NintendoSDK Firmware for NX 3.0.0-10.0",
        }
    }
}

impl FirmwareVersion {
    /// The 0x100-byte guest record. String fields are NUL padded and
    /// truncated to their slot.
    pub fn encode(&self) -> [u8; FIRMWARE_VERSION_SIZE] {
        let mut out = [0u8; FIRMWARE_VERSION_SIZE];
        out[0] = self.major;
        out[1] = self.minor;
        out[2] = self.micro;
        out[4..8].copy_from_slice(&self.revision.to_le_bytes());
        put_str(&mut out[0x08..0x28], self.platform);
        put_str(&mut out[0x28..0x68], self.version_hash);
        put_str(&mut out[0x68..0x80], self.display_version);
        put_str(&mut out[0x80..], self.display_title);
        out
    }
}

fn put_str(slot: &mut [u8], value: &str) {
    let len = value.len().min(slot.len().saturating_sub(1));
    slot[..len].copy_from_slice(&value.as_bytes()[..len]);
}

#[derive(Default)]
pub struct SystemSettings {
    firmware: FirmwareVersion,
}

impl SystemSettings {
    pub fn new(firmware: FirmwareVersion) -> Self {
        Self { firmware }
    }

    fn get_firmware_version(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        ctx.write_auto_out(0, &self.firmware.encode())
    }

    fn get_firmware_version2(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        ctx.write_auto_out(0, &self.firmware.encode())
    }

    fn get_lock_screen_flag(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        debug!("set:sys: GetLockScreenFlag stubbed");
        ctx.write_bool(false);
        Ok(())
    }
}

impl ServiceCommands for SystemSettings {
    const INTERFACE: &'static str = "set:sys";
    const COMMANDS: &'static [Command<Self>] = &[
        Command::new(
            3,
            "GetFirmwareVersion",
            &[BufferSpec::auto_out(0, FIRMWARE_VERSION_SIZE as u64)],
            Self::get_firmware_version,
        ),
        Command::new(
            4,
            "GetFirmwareVersion2",
            &[BufferSpec::auto_out(0, FIRMWARE_VERSION_SIZE as u64)],
            Self::get_firmware_version2,
        ),
        Command::new(7, "GetLockScreenFlag", &[], Self::get_lock_screen_flag),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_record_layout() {
        let record = FirmwareVersion::default().encode();
        assert_eq!(&record[0..4], &[3, 0, 0, 0]);
        assert_eq!(i32::from_le_bytes([record[4], record[5], record[6], record[7]]), 0x0A);
        assert_eq!(&record[0x08..0x0A], b"NX");
        assert_eq!(record[0x0A], 0);
        assert_eq!(&record[0x28..0x50], b"7fbde2b0bba4d14107bf836e4643043d9f6c8e47");
        assert_eq!(&record[0x68..0x6D], b"3.0.0");
        assert!(record[0x80..].starts_with(b"NintendoSDK Firmware for NX 3.0.0-10.0"));
    }

    #[test]
    fn test_long_strings_are_truncated() {
        let firmware = FirmwareVersion {
            platform: "a platform name longer than its slot",
            ..Default::default()
        };
        let record = firmware.encode();
        assert_eq!(record[0x27], 0);
        assert_eq!(record[0x28], b'7');
    }
}
