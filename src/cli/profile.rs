use tabled::settings::{Panel, Style};
use tabled::{Table, Tabled};

use crate::drivers::hanvon::profile::{self, ButtonSet, DeviceProfile};

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "Model")]
    name: String,
    #[tabled(rename = "Product ID")]
    product_id: String,
    #[tabled(rename = "Area")]
    area: String,
    #[tabled(rename = "Pressure")]
    pressure: i32,
    #[tabled(rename = "Buttons")]
    buttons: String,
    #[tabled(rename = "Wheel")]
    wheel: bool,
}

impl From<&DeviceProfile> for ProfileRow {
    fn from(profile: &DeviceProfile) -> Self {
        let buttons = match profile.button_set {
            ButtonSet::None => "-".to_string(),
            ButtonSet::NineMixed => format!("{} + middle", profile.button_set.pad_buttons()),
            set => set.pad_buttons().to_string(),
        };
        Self {
            name: profile.name.to_string(),
            product_id: format!("{:04x}:{:04x}", profile.vendor_id, profile.product_id),
            area: format!("{}x{}", profile.max_x, profile.max_y),
            pressure: profile.max_pressure,
            buttons,
            wheel: profile.has_wheel,
        }
    }
}

/// Print every supported tablet model
pub fn handle_profiles() {
    let rows: Vec<ProfileRow> = profile::all().iter().map(ProfileRow::from).collect();
    let count = rows.len();
    let mut table = Table::new(rows);
    table
        .with(Style::modern_rounded())
        .with(Panel::header("Supported Tablets"));
    println!("{table}");
    println!("{count} supported model(s)");
}
