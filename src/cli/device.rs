use std::error::Error;

use tabled::settings::{Panel, Style};
use tabled::{Table, Tabled};

use crate::drivers::hanvon::profile;
use crate::usb::libusb::list_devices;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Bus")]
    bus: String,
    #[tabled(rename = "Device")]
    address: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Model")]
    model: String,
}

/// Print every attached device from the given vendor and whether it is
/// supported
pub fn handle_devices(vendor_id: u16) -> Result<(), Box<dyn Error + Send + Sync>> {
    let devices = list_devices(vendor_id)?;
    let count = devices.len();
    let rows: Vec<DeviceRow> = devices
        .into_iter()
        .map(|device| {
            let model = profile::lookup(device.vendor_id, device.product_id)
                .map(|profile| profile.name.to_string())
                .unwrap_or_else(|| "unsupported".to_string());
            DeviceRow {
                bus: format!("{:03}", device.bus),
                address: format!("{:03}", device.address),
                id: format!("{:04x}:{:04x}", device.vendor_id, device.product_id),
                model,
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::modern_rounded())
        .with(Panel::header("Hanvon Devices"));
    println!("{table}");
    println!("Found {count} device(s)");

    Ok(())
}
