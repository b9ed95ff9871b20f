pub mod libusb;

use std::time::Duration;

use thiserror::Error;

/// Errors reported by the USB host backend. Mirrors the libusb error codes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbError {
    #[error("input/output error")]
    Io,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("access denied (insufficient permissions)")]
    Access,
    #[error("no such device (it may have been disconnected)")]
    NoDevice,
    #[error("entity not found")]
    NotFound,
    #[error("resource busy")]
    Busy,
    #[error("operation timed out")]
    Timeout,
    #[error("overflow")]
    Overflow,
    #[error("pipe error")]
    Pipe,
    #[error("system call interrupted")]
    Interrupted,
    #[error("insufficient memory")]
    NoMem,
    #[error("operation not supported or unimplemented on this platform")]
    NotSupported,
    #[error("malformed descriptor")]
    BadDescriptor,
    #[error("other error")]
    Other,
}

impl From<rusb::Error> for UsbError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Io => UsbError::Io,
            rusb::Error::InvalidParam => UsbError::InvalidParam,
            rusb::Error::Access => UsbError::Access,
            rusb::Error::NoDevice => UsbError::NoDevice,
            rusb::Error::NotFound => UsbError::NotFound,
            rusb::Error::Busy => UsbError::Busy,
            rusb::Error::Timeout => UsbError::Timeout,
            rusb::Error::Overflow => UsbError::Overflow,
            rusb::Error::Pipe => UsbError::Pipe,
            rusb::Error::Interrupted => UsbError::Interrupted,
            rusb::Error::NoMem => UsbError::NoMem,
            rusb::Error::NotSupported => UsbError::NotSupported,
            rusb::Error::BadDescriptor => UsbError::BadDescriptor,
            rusb::Error::Other => UsbError::Other,
            #[allow(unreachable_patterns)]
            _ => UsbError::Other,
        }
    }
}

/// Identity and descriptor of an attached USB device. Two values refer to
/// the same physical device when their bus number and address match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbDeviceInfo {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl UsbDeviceInfo {
    /// Returns true if both values describe the same physical device
    pub fn same_device(&self, other: &UsbDeviceInfo) -> bool {
        self.bus == other.bus && self.address == other.address
    }
}

impl std::fmt::Display for UsbDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus {:03} device {:03})",
            self.vendor_id, self.product_id, self.bus, self.address
        )
    }
}

/// Owned handle to an opened device. Only the backend creates these and a
/// handle is consumed when it is closed.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct HandleId(pub(crate) u32);

/// Identifier of an allocated interrupt transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(pub(crate) u32);

/// Final status of a transfer when its completion is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
}

/// Notifications delivered by [UsbBackend::handle_events]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbEvent {
    Arrived(UsbDeviceInfo),
    Left(UsbDeviceInfo),
    TransferCompleted {
        transfer: TransferId,
        status: TransferStatus,
    },
}

/// Operations the session manager needs from the USB host stack. All calls
/// happen on the thread that pumps [UsbBackend::handle_events].
pub trait UsbBackend {
    /// Open the given device
    fn open(&mut self, device: &UsbDeviceInfo) -> Result<HandleId, UsbError>;
    /// Close the given handle
    fn close(&mut self, handle: HandleId);

    /// Returns true if a kernel driver is bound to the given interface
    fn kernel_driver_active(&mut self, handle: &HandleId, iface: u8) -> Result<bool, UsbError>;
    fn detach_kernel_driver(&mut self, handle: &HandleId, iface: u8) -> Result<(), UsbError>;
    fn attach_kernel_driver(&mut self, handle: &HandleId, iface: u8) -> Result<(), UsbError>;

    fn claim_interface(&mut self, handle: &HandleId, iface: u8) -> Result<(), UsbError>;
    fn release_interface(&mut self, handle: &HandleId, iface: u8) -> Result<(), UsbError>;

    /// Allocate an interrupt IN transfer of `length` bytes on the given endpoint
    fn alloc_transfer(
        &mut self,
        handle: &HandleId,
        endpoint: u8,
        length: usize,
    ) -> Result<TransferId, UsbError>;
    /// Submit the transfer. Its completion is delivered through
    /// [UsbBackend::handle_events].
    fn submit_transfer(&mut self, transfer: TransferId) -> Result<(), UsbError>;
    /// Request cancellation of a submitted transfer. Returns immediately; a
    /// completion with [TransferStatus::Cancelled] follows later.
    fn cancel_transfer(&mut self, transfer: TransferId) -> Result<(), UsbError>;
    fn free_transfer(&mut self, transfer: TransferId);
    /// Data received by the last completion of the transfer
    fn transfer_data(&self, transfer: TransferId) -> Option<&[u8]>;

    /// Wait up to `timeout` for hotplug notifications and transfer
    /// completions.
    fn handle_events(&mut self, timeout: Duration) -> Result<Vec<UsbEvent>, UsbError>;
}
