use packed_struct::PackedStruct;
use thiserror::Error;

use super::{
    event::{AbsAxis, Event, RelAxis, Tool},
    hid_report::{
        PackedPenReport, BUTTON_EVENT_0906, BUTTON_EVENT_0906_SIZE, BUTTON_EVENT_GP,
        BUTTON_EVENT_GP_SIZE, LEFT_MARKER, PEN_EVENT, PEN_EVENT_SIZE, RIGHT_MARKER,
    },
    profile::{ButtonSet, DeviceProfile},
};

// Hardware ID's
pub const VID: u16 = 0x0b57;

// Interface and interrupt endpoint carrying the input reports
pub const INTERFACE: u8 = 0;
pub const ENDPOINT: u8 = 0x81;

// Pad button bytes in the button-press range
const BUTTON_PATTERN_MASK: u8 = 0xf0;
const BUTTON_PATTERN: u8 = 0xa0;
/// Highest raw position of the 6-bit touch wheel/slider
const WHEEL_MAX: u8 = 0x3f;
/// Movement larger than this is treated as wrapping around the wheel
const WHEEL_WRAP_THRESHOLD: i32 = 0x20;
const WHEEL_RANGE: i32 = 0x40;

// First button index of each pad side
const LEFT_BUTTONS: u8 = 0;
const RIGHT_BUTTONS: u8 = 4;

/// Possible errors decoding a raw packet
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short: got {got} bytes, need {need}")]
    TooShort { got: usize, need: usize },
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),
    #[error("malformed packet of message type {0:#04x}")]
    Malformed(u8),
}

/// Last observed raw position of the pad wheel. Reset whenever a new
/// session is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelState {
    pub last: u8,
}

/// Decode a single raw packet into a batch of input events.
pub fn decode(
    profile: &DeviceProfile,
    wheel: &mut WheelState,
    packet: &[u8],
) -> Result<Vec<Event>, DecodeError> {
    let Some(msg_type) = packet.first() else {
        return Err(DecodeError::TooShort { got: 0, need: 1 });
    };

    match *msg_type {
        BUTTON_EVENT_GP => {
            ensure_len(packet, BUTTON_EVENT_GP_SIZE)?;
            Ok(decode_pad(packet, wheel))
        }
        PEN_EVENT => {
            ensure_len(packet, PEN_EVENT_SIZE)?;
            decode_pen(packet)
        }
        BUTTON_EVENT_0906 => {
            ensure_len(packet, BUTTON_EVENT_0906_SIZE)?;
            Ok(decode_compact_buttons(profile, packet[3]))
        }
        other => Err(DecodeError::UnknownMessageType(other)),
    }
}

fn ensure_len(packet: &[u8], need: usize) -> Result<(), DecodeError> {
    if packet.len() < need {
        return Err(DecodeError::TooShort {
            got: packet.len(),
            need,
        });
    }
    Ok(())
}

/// General button/wheel packet. Byte 1/2 carry the left side of the pad
/// and byte 3/4 the right side.
fn decode_pad(packet: &[u8], wheel: &mut WheelState) -> Vec<Event> {
    let mut events = Vec::new();
    if packet[1] == LEFT_MARKER {
        decode_pad_side(&mut events, wheel, LEFT_BUTTONS, packet[2]);
    }
    if packet[3] == RIGHT_MARKER {
        decode_pad_side(&mut events, wheel, RIGHT_BUTTONS, packet[4]);
    }

    if !events.is_empty() {
        events.push(Event::SyncBatchEnd);
    }
    events
}

fn decode_pad_side(events: &mut Vec<Event>, wheel: &mut WheelState, base: u8, data: u8) {
    if (data & BUTTON_PATTERN_MASK) == BUTTON_PATTERN {
        // The first button of each side is never reported here
        for (offset, mask) in [(1, 0x02), (2, 0x04), (3, 0x08)] {
            events.push(Event::Button {
                index: base + offset,
                pressed: data & mask != 0,
            });
        }
    } else if data <= WHEEL_MAX {
        let delta = wheel_delta(wheel.last, data);
        if delta != 0 {
            log::trace!("Wheel moved {delta} ({:#04x} -> {data:#04x})", wheel.last);
            events.push(Event::RelAxis {
                axis: RelAxis::Wheel,
                delta,
            });
        }
        wheel.last = data;
    }
}

/// Movement between two raw wheel positions, correcting for the 6-bit
/// position wrapping around.
fn wheel_delta(last: u8, current: u8) -> i32 {
    let mut delta = current as i32 - last as i32;
    if delta.abs() > WHEEL_WRAP_THRESHOLD {
        if delta > 0 {
            delta -= WHEEL_RANGE;
        } else {
            delta += WHEEL_RANGE;
        }
    }
    delta
}

fn decode_pen(packet: &[u8]) -> Result<Vec<Event>, DecodeError> {
    let mut buf = [0u8; PEN_EVENT_SIZE];
    buf.copy_from_slice(&packet[..PEN_EVENT_SIZE]);
    let report = PackedPenReport::unpack(&buf).map_err(|e| {
        log::debug!("Failed to unpack pen report: {e:?}");
        DecodeError::Malformed(PEN_EVENT)
    })?;

    let mut events = Vec::with_capacity(9);
    let tool = if report.eraser {
        Tool::Eraser
    } else {
        Tool::Pen
    };
    let active = report.is_active();
    events.push(Event::ToolState { tool, active });

    if active {
        // TODO: The APPIV0906 may send X/Y little-endian; switch on the
        // profile once a capture from that model confirms it.
        events.push(Event::AbsAxis {
            axis: AbsAxis::X,
            value: report.x as i32,
        });
        events.push(Event::AbsAxis {
            axis: AbsAxis::Y,
            value: report.y as i32,
        });
        events.push(Event::AbsAxis {
            axis: AbsAxis::Pressure,
            value: report.scaled_pressure() as i32,
        });
        // Tilt is reported unsigned until the sign and bit width are
        // calibrated against hardware.
        events.push(Event::AbsAxis {
            axis: AbsAxis::TiltX,
            value: report.tilt_x as i32,
        });
        events.push(Event::AbsAxis {
            axis: AbsAxis::TiltY,
            value: report.tilt_y as i32,
        });
    }

    events.push(Event::Touch(report.touching));
    events.push(Event::StylusButton {
        index: 0,
        pressed: report.stylus,
    });
    events.push(Event::SyncBatchEnd);

    Ok(events)
}

/// Button packet of the GP0906 and APPIV0906
fn decode_compact_buttons(profile: &DeviceProfile, data: u8) -> Vec<Event> {
    let count = match profile.button_set {
        ButtonSet::NineMixed => 8,
        _ => 4,
    };
    let mut events = Vec::with_capacity(count + 1);
    for index in 0..count as u8 {
        events.push(Event::Button {
            index,
            pressed: data & (1 << index) != 0,
        });
    }
    events.push(Event::SyncBatchEnd);
    events
}
