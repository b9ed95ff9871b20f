use evdev::{
    uinput::{VirtualDevice, VirtualDeviceBuilder},
    AbsInfo, AbsoluteAxisCode, AttributeSet, BusType, EventType, InputEvent, InputId, KeyCode,
    PropType, RelativeAxisCode, UinputAbsSetup,
};

use crate::drivers::hanvon::{
    event::{AbsAxis, Event, RelAxis, Tool},
    profile::DeviceProfile,
};

use super::{EventSink, SinkError, SinkFactory};

/// Jitter filtering applied to the X/Y axes
const POSITION_FUZZ: i32 = 4;
const VERSION: u16 = 0x100;

/// Virtual pen tablet using uinput. The device advertises the ranges and
/// buttons of the [DeviceProfile] it was created for.
#[derive(Debug)]
pub struct TabletDevice {
    device: VirtualDevice,
    keys: AttributeSet<KeyCode>,
    has_wheel: bool,
    /// Events of the batch in progress, emitted on sync
    pending: Vec<InputEvent>,
}

impl TabletDevice {
    /// Create a new virtual tablet for the given profile
    pub fn new(profile: &DeviceProfile) -> Result<Self, SinkError> {
        let keys = TabletDevice::keys(profile);
        let device = TabletDevice::create_virtual_device(profile, &keys)?;
        Ok(Self {
            device,
            keys,
            has_wheel: profile.has_wheel,
            pending: Vec::with_capacity(16),
        })
    }

    /// Key codes supported by the given tablet model
    fn keys(profile: &DeviceProfile) -> AttributeSet<KeyCode> {
        let mut keys = AttributeSet::<KeyCode>::new();
        keys.insert(KeyCode::BTN_TOOL_PEN);
        keys.insert(KeyCode::BTN_TOOL_RUBBER);
        keys.insert(KeyCode::BTN_TOUCH);
        keys.insert(KeyCode::BTN_STYLUS);
        keys.insert(KeyCode::BTN_STYLUS2);
        for index in 0..profile.button_set.pad_buttons() {
            keys.insert(pad_button(index));
        }
        if profile.button_set.has_middle() {
            keys.insert(KeyCode::BTN_MIDDLE);
        }
        keys
    }

    /// Create the virtual device to emulate
    fn create_virtual_device(
        profile: &DeviceProfile,
        keys: &AttributeSet<KeyCode>,
    ) -> Result<VirtualDevice, SinkError> {
        // Setup ABS inputs
        let x_setup = AbsInfo::new(
            0,
            0,
            profile.max_x,
            POSITION_FUZZ,
            0,
            profile.resolution,
        );
        let y_setup = AbsInfo::new(
            0,
            0,
            profile.max_y,
            POSITION_FUZZ,
            0,
            profile.resolution,
        );
        let pressure_setup = AbsInfo::new(0, 0, profile.max_pressure, 0, 0, 0);
        let tilt_x_setup = AbsInfo::new(0, 0, profile.max_tilt_x, 0, 0, 0);
        let tilt_y_setup = AbsInfo::new(0, 0, profile.max_tilt_y, 0, 0, 0);
        let abs_x = UinputAbsSetup::new(AbsoluteAxisCode::ABS_X, x_setup);
        let abs_y = UinputAbsSetup::new(AbsoluteAxisCode::ABS_Y, y_setup);
        let abs_pressure = UinputAbsSetup::new(AbsoluteAxisCode::ABS_PRESSURE, pressure_setup);
        let abs_tilt_x = UinputAbsSetup::new(AbsoluteAxisCode::ABS_TILT_X, tilt_x_setup);
        let abs_tilt_y = UinputAbsSetup::new(AbsoluteAxisCode::ABS_TILT_Y, tilt_y_setup);

        // Setup properties
        let mut properties = AttributeSet::<PropType>::new();
        properties.insert(PropType::POINTER);
        properties.insert(PropType::DIRECT);

        // Identify to the kernel as the physical tablet
        let id = InputId::new(BusType(3), profile.vendor_id, profile.product_id, VERSION);

        // Build the device
        let mut builder = VirtualDeviceBuilder::new()?
            .name(profile.name)
            .input_id(id)
            .with_properties(&properties)?
            .with_keys(keys)?
            .with_absolute_axis(&abs_x)?
            .with_absolute_axis(&abs_y)?
            .with_absolute_axis(&abs_pressure)?
            .with_absolute_axis(&abs_tilt_x)?
            .with_absolute_axis(&abs_tilt_y)?;
        if profile.has_wheel {
            builder = builder
                .with_relative_axes(&AttributeSet::from_iter([RelativeAxisCode::REL_WHEEL]))?;
        }
        let mut device = builder.build()?;

        for path in device.enumerate_dev_nodes_blocking()? {
            let path = path?;
            log::info!("Created virtual tablet '{}' at {}", profile.name, path.display());
        }

        Ok(device)
    }

    /// Translate the given tablet event into an evdev event
    fn translate_event(&self, event: &Event) -> Result<InputEvent, SinkError> {
        let unsupported = || SinkError::Unsupported(*event);
        let input_event = match *event {
            Event::ToolState { tool, active } => {
                let code = match tool {
                    Tool::Pen => KeyCode::BTN_TOOL_PEN,
                    Tool::Eraser => KeyCode::BTN_TOOL_RUBBER,
                };
                key_event(code, active)
            }
            Event::Touch(touching) => key_event(KeyCode::BTN_TOUCH, touching),
            Event::StylusButton { index, pressed } => {
                let code = match index {
                    0 => KeyCode::BTN_STYLUS,
                    1 => KeyCode::BTN_STYLUS2,
                    _ => return Err(unsupported()),
                };
                key_event(code, pressed)
            }
            Event::AbsAxis { axis, value } => {
                let code = match axis {
                    AbsAxis::X => AbsoluteAxisCode::ABS_X,
                    AbsAxis::Y => AbsoluteAxisCode::ABS_Y,
                    AbsAxis::Pressure => AbsoluteAxisCode::ABS_PRESSURE,
                    AbsAxis::TiltX => AbsoluteAxisCode::ABS_TILT_X,
                    AbsAxis::TiltY => AbsoluteAxisCode::ABS_TILT_Y,
                };
                InputEvent::new(EventType::ABSOLUTE.0, code.0, value)
            }
            Event::RelAxis {
                axis: RelAxis::Wheel,
                delta,
            } => {
                if !self.has_wheel {
                    return Err(unsupported());
                }
                InputEvent::new(EventType::RELATIVE.0, RelativeAxisCode::REL_WHEEL.0, delta)
            }
            Event::Button { index, pressed } => {
                let code = pad_button(index);
                if !self.keys.contains(code) {
                    return Err(unsupported());
                }
                key_event(code, pressed)
            }
            Event::SyncBatchEnd => return Err(unsupported()),
        };

        Ok(input_event)
    }
}

impl EventSink for TabletDevice {
    fn write_event(&mut self, event: &Event) -> Result<(), SinkError> {
        log::trace!("Received event: {event:?}");
        let input_event = self.translate_event(event)?;
        self.pending.push(input_event);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        // emit() terminates the batch with SYN_REPORT
        let result = self.device.emit(self.pending.as_slice());
        self.pending.clear();
        result?;
        Ok(())
    }
}

/// Creates a [TabletDevice] for every new tablet session
#[derive(Debug, Default)]
pub struct TabletDeviceFactory;

impl SinkFactory for TabletDeviceFactory {
    type Sink = TabletDevice;

    fn create(&mut self, profile: &DeviceProfile) -> Result<TabletDevice, SinkError> {
        log::debug!("Creating virtual tablet for {}", profile.name);
        TabletDevice::new(profile)
    }
}

/// Pad button `index` maps to BTN_0 + index
fn pad_button(index: u8) -> KeyCode {
    KeyCode(KeyCode::BTN_0.0 + index as u16)
}

fn key_event(code: KeyCode, pressed: bool) -> InputEvent {
    InputEvent::new(EventType::KEY.0, code.0, pressed as i32)
}
