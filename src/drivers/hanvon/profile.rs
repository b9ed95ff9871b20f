use super::driver::VID;

// Product ID's
pub const PID_AM3M: u16 = 0x8528;
pub const PID_AM0806: u16 = 0x8502;
pub const PID_AM0605: u16 = 0x8503;
pub const PID_AM1107: u16 = 0x8505;
pub const PID_AM1209: u16 = 0x8501;
pub const PID_RL0604: u16 = 0x851f;
pub const PID_RL0504: u16 = 0x851d;
pub const PID_GP0806: u16 = 0x8039;
pub const PID_GP0806B: u16 = 0x8511;
pub const PID_GP0605: u16 = 0x8512;
pub const PID_GP0605A: u16 = 0x803a;
pub const PID_GP0504: u16 = 0x8037;
pub const PID_NXS1513: u16 = 0x8030;
pub const PID_GP0906: u16 = 0x8521;
pub const PID_APPIV0906: u16 = 0x8532;

// Axis ranges shared by most models
pub const AM_MAX_ABS_X: i32 = 0x27de;
pub const AM_MAX_ABS_Y: i32 = 0x1cfe;
pub const AM_MAX_PRESSURE: i32 = 0x400;
pub const AM_MAX_TILT_X: i32 = 0x3f;
pub const AM_MAX_TILT_Y: i32 = 0x7f;
/// Units per millimeter reported for the X/Y axes
pub const AM_RESOLUTION: i32 = 40;

// The Art Painter Pro has a larger active area
pub const APPIV_MAX_ABS_X: i32 = 0x5750;
pub const APPIV_MAX_ABS_Y: i32 = 0x3692;

/// Layout of the express keys on the tablet pad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonSet {
    /// No pad buttons
    None,
    /// Four buttons on the left side (BTN_0 - BTN_3)
    FourLeft,
    /// Four buttons on each side (BTN_0 - BTN_7)
    EightSplit,
    /// Art Painter Pro layout: eight pad buttons (BTN_0 - BTN_7) plus BTN_MIDDLE
    NineMixed,
}

impl ButtonSet {
    /// Number of indexed pad buttons (BTN_0 + n) this layout declares
    pub fn pad_buttons(&self) -> u8 {
        match self {
            ButtonSet::None => 0,
            ButtonSet::FourLeft => 4,
            ButtonSet::EightSplit => 8,
            ButtonSet::NineMixed => 8,
        }
    }

    /// Whether the layout also carries a middle button
    pub fn has_middle(&self) -> bool {
        *self == ButtonSet::NineMixed
    }
}

/// Static capability and calibration data for a single tablet model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
    pub max_x: i32,
    pub max_y: i32,
    pub max_pressure: i32,
    pub max_tilt_x: i32,
    pub max_tilt_y: i32,
    pub resolution: i32,
    pub button_set: ButtonSet,
    pub has_wheel: bool,
}

impl DeviceProfile {
    const fn new(
        product_id: u16,
        name: &'static str,
        button_set: ButtonSet,
        has_wheel: bool,
    ) -> Self {
        Self {
            vendor_id: VID,
            product_id,
            name,
            max_x: AM_MAX_ABS_X,
            max_y: AM_MAX_ABS_Y,
            max_pressure: AM_MAX_PRESSURE,
            max_tilt_x: AM_MAX_TILT_X,
            max_tilt_y: AM_MAX_TILT_Y,
            resolution: AM_RESOLUTION,
            button_set,
            has_wheel,
        }
    }

    const fn with_area(mut self, max_x: i32, max_y: i32) -> Self {
        self.max_x = max_x;
        self.max_y = max_y;
        self
    }
}

/// Every supported model, in product ID order
const PROFILES: &[DeviceProfile] = &[
    DeviceProfile::new(PID_NXS1513, "Hanvon Nilox NXS1513", ButtonSet::FourLeft, false),
    DeviceProfile::new(PID_GP0504, "Hanvon Graphicpal 0504", ButtonSet::FourLeft, false),
    DeviceProfile::new(PID_GP0806, "Hanvon Graphicpal 0806", ButtonSet::FourLeft, false),
    DeviceProfile::new(PID_GP0605A, "Hanvon Graphicpal 0605A", ButtonSet::FourLeft, false),
    DeviceProfile::new(PID_AM1209, "Hanvon ArtMaster AM1209", ButtonSet::EightSplit, true),
    DeviceProfile::new(PID_AM0806, "Hanvon ArtMaster AM0806", ButtonSet::FourLeft, true),
    DeviceProfile::new(PID_AM0605, "Hanvon ArtMaster AM0605", ButtonSet::FourLeft, true),
    DeviceProfile::new(PID_AM1107, "Hanvon Art Master AM1107", ButtonSet::EightSplit, true),
    DeviceProfile::new(PID_GP0806B, "Hanvon Graphicpal 0806B", ButtonSet::FourLeft, false),
    DeviceProfile::new(PID_GP0605, "Hanvon Graphicpal 0605", ButtonSet::FourLeft, false),
    DeviceProfile::new(PID_RL0504, "Hanvon Rollick 0504", ButtonSet::FourLeft, false),
    DeviceProfile::new(PID_RL0604, "Hanvon Rollick 0604", ButtonSet::FourLeft, false),
    DeviceProfile::new(PID_GP0906, "Hanvon Graphicpal 0906", ButtonSet::FourLeft, false),
    DeviceProfile::new(PID_AM3M, "Hanvon Art Master III", ButtonSet::FourLeft, true),
    DeviceProfile::new(
        PID_APPIV0906,
        "Hanvon Art Painter Pro APPIV0906",
        ButtonSet::NineMixed,
        false,
    )
    .with_area(APPIV_MAX_ABS_X, APPIV_MAX_ABS_Y),
];

/// Look up the profile for the given vendor and product. Returns [None] for
/// any device that is not a supported Hanvon tablet.
pub fn lookup(vendor_id: u16, product_id: u16) -> Option<DeviceProfile> {
    if vendor_id != VID {
        return None;
    }
    PROFILES
        .iter()
        .find(|profile| profile.product_id == product_id)
        .copied()
}

/// Returns all known profiles
pub fn all() -> &'static [DeviceProfile] {
    PROFILES
}
