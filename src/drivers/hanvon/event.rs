/// Which end of the pen is in use
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    Pen,
    Eraser,
}

/// Absolute axes reported by the pen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbsAxis {
    X,
    Y,
    Pressure,
    TiltX,
    TiltY,
}

/// Relative axes reported by the pad
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelAxis {
    Wheel,
}

/// Events that can be emitted by a Hanvon tablet. One decoded packet
/// produces a batch of events terminated by [Event::SyncBatchEnd].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    ToolState { tool: Tool, active: bool },
    Touch(bool),
    StylusButton { index: u8, pressed: bool },
    AbsAxis { axis: AbsAxis, value: i32 },
    RelAxis { axis: RelAxis, delta: i32 },
    /// Pad button, where index `n` maps to BTN_0 + n
    Button { index: u8, pressed: bool },
    SyncBatchEnd,
}
