//! Device selection
//!
//! Pure, synchronous device selection over an enumerated device list.

use super::traits::{CaptureBackend, DeviceInfo, DeviceKind, DevicePosition};
use crate::error::{CaptureError, CaptureResult};

/// Select the best-matching device from `devices`
///
/// Returns the first device, replaced by the first device whose position
/// equals `preferred` if one exists. Linear scan, first match wins. Returns
/// `None` when no device of the requested kind is present at all.
///
/// Side-effect-free; safe to call from any execution context.
pub fn select_device(devices: &[DeviceInfo], preferred: DevicePosition) -> Option<&DeviceInfo> {
    let mut selected = devices.first()?;

    for device in devices {
        if device.position == preferred {
            selected = device;
            break;
        }
    }

    Some(selected)
}

/// Enumerate `kind` devices on `backend` and select one
pub fn pick_device(
    backend: &dyn CaptureBackend,
    kind: DeviceKind,
    preferred: DevicePosition,
) -> CaptureResult<DeviceInfo> {
    let devices = backend.enumerate_devices(kind);
    select_device(&devices, preferred)
        .cloned()
        .ok_or(CaptureError::NoDeviceAvailable(kind))
}
