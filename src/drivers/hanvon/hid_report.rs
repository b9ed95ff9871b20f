//! Layout of the interrupt packets sent by Hanvon tablets. Every packet is
//! at most 10 bytes; multi-byte fields are big-endian.
use packed_struct::prelude::*;

/// Size of a full interrupt packet
pub const PACKET_SIZE: usize = 10;

// Message types (byte 0)
pub const BUTTON_EVENT_GP: u8 = 0x01;
pub const PEN_EVENT: u8 = 0x02;
pub const BUTTON_EVENT_0906: u8 = 0x0c;

// Minimum packet lengths per message type
pub const BUTTON_EVENT_GP_SIZE: usize = 5;
pub const PEN_EVENT_SIZE: usize = PACKET_SIZE;
pub const BUTTON_EVENT_0906_SIZE: usize = 4;

// Side markers of a general button packet
pub const LEFT_MARKER: u8 = 0x55;
pub const RIGHT_MARKER: u8 = 0xaa;

// 02 81 01 02 00 10 04 00 05 06
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq, Default)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "10")]
pub struct PackedPenReport {
    // byte 0
    #[packed_field(bytes = "0")]
    pub msg_type: u8,

    // byte 1 (status)
    /// Pen is hovering within sensing range
    #[packed_field(bits = "8")]
    pub proximity: bool,
    #[packed_field(bits = "9")]
    pub _unused_40: bool,
    /// Eraser end of the pen is active
    #[packed_field(bits = "10")]
    pub eraser: bool,
    /// Pen was lifted but is still near the surface
    #[packed_field(bits = "11")]
    pub lingering: bool,
    #[packed_field(bits = "12")]
    pub _unused_08: bool,
    /// Second side button. Not reported, no model is known to set it.
    #[packed_field(bits = "13")]
    pub stylus2: bool,
    #[packed_field(bits = "14")]
    pub stylus: bool,
    #[packed_field(bits = "15")]
    pub touching: bool,

    // byte 2-9
    #[packed_field(bytes = "2..=3", endian = "msb")]
    pub x: u16,
    #[packed_field(bytes = "4..=5", endian = "msb")]
    pub y: u16,
    /// Only the top 10 bits are significant
    #[packed_field(bytes = "6..=7", endian = "msb")]
    pub pressure: u16,
    #[packed_field(bytes = "8")]
    pub tilt_x: u8,
    #[packed_field(bytes = "9")]
    pub tilt_y: u8,
}

impl PackedPenReport {
    /// Whether the pen is close enough for its position to be valid
    pub fn is_active(&self) -> bool {
        self.proximity || self.lingering || self.touching
    }

    /// Pressure scaled to 0 - 1023
    pub fn scaled_pressure(&self) -> u16 {
        self.pressure >> 6
    }
}
