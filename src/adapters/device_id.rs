//! Device identity derived from the ESP32 factory MAC address.
//!
//! Produces a stable device ID in the form `HM-XXYYZZ` (last 3 bytes of
//! the 6-byte MAC in uppercase hex) and the MQTT client id
//! `hidrometro-xxyyzz`.  Both are deterministic across reboots
//! (factory-burned eFuse MAC), so the broker sees the same client after
//! every reset.

use core::fmt::Write;

/// Fixed-size device ID string: "HM-XXYYZZ".
pub type DeviceIdString = heapless::String<16>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Short device ID, e.g. `HM-EFCAFE`.
pub fn device_id(mac: &MacAddress) -> DeviceIdString {
    let mut id = DeviceIdString::new();
    let _ = write!(id, "HM-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    id
}

/// MQTT client id, e.g. `hidrometro-efcafe`.
pub fn client_id(mac: &MacAddress) -> heapless::String<32> {
    let mut name = heapless::String::new();
    let _ = write!(name, "hidrometro-{:02x}{:02x}{:02x}", mac[3], mac[4], mac[5]);
    name
}
