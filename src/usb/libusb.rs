use std::{collections::HashMap, time::Duration};

use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use thiserror::Error;
use tokio::sync::mpsc;

use super::{
    HandleId, TransferId, TransferStatus, UsbBackend, UsbDeviceInfo, UsbError, UsbEvent,
};

/// libusb treats a zero timeout as "wait forever"
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Errors that prevent the libusb backend from starting at all
#[derive(Error, Debug)]
pub enum InitError {
    #[error("failed to initialize libusb: {0}")]
    Context(UsbError),
    #[error("libusb hotplug is not supported on this system")]
    NoHotplug,
    #[error("failed to register hotplug callback: {0}")]
    Registration(UsbError),
}

/// Hotplug notifications queued from the libusb callback
enum HotplugMessage {
    Arrived(Device<Context>),
    Left(Device<Context>),
}

/// Forwards libusb hotplug callbacks over a channel so they can be handled
/// after libusb returns from event handling.
struct HotplugWatcher {
    tx: mpsc::UnboundedSender<HotplugMessage>,
}

impl Hotplug<Context> for HotplugWatcher {
    fn device_arrived(&mut self, device: Device<Context>) {
        if let Err(e) = self.tx.send(HotplugMessage::Arrived(device)) {
            log::error!("Error sending hotplug event: {e}");
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        if let Err(e) = self.tx.send(HotplugMessage::Left(device)) {
            log::error!("Error sending hotplug event: {e}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    Idle,
    Submitted,
    Cancelling,
}

/// Interrupt IN transfer serviced during [LibUsbBackend::handle_events]
#[derive(Debug)]
struct Transfer {
    handle: u32,
    endpoint: u8,
    buffer: Vec<u8>,
    actual_length: usize,
    state: TransferState,
}

/// [UsbBackend] implementation on top of libusb
pub struct LibUsbBackend {
    context: Context,
    _registration: Registration<Context>,
    rx: mpsc::UnboundedReceiver<HotplugMessage>,
    devices: HashMap<(u8, u8), Device<Context>>,
    handles: HashMap<u32, DeviceHandle<Context>>,
    transfers: HashMap<u32, Transfer>,
    next_id: u32,
}

impl LibUsbBackend {
    /// Initialize libusb and watch for devices with the given vendor id.
    /// Devices that are already attached are reported as arrivals on the
    /// first call to [UsbBackend::handle_events].
    pub fn new(vendor_id: u16) -> Result<Self, InitError> {
        let context = Context::new().map_err(|e| InitError::Context(e.into()))?;
        log::debug!("libusb initialized");

        if !rusb::has_hotplug() {
            return Err(InitError::NoHotplug);
        }
        log::debug!("libusb hotplug capability detected");

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher: Box<dyn Hotplug<Context>> = Box::new(HotplugWatcher { tx });
        let registration = HotplugBuilder::new()
            .vendor_id(vendor_id)
            .enumerate(true)
            .register(&context, watcher)
            .map_err(|e| InitError::Registration(e.into()))?;
        log::debug!("Hotplug callback registered for vendor {vendor_id:04x}");

        Ok(Self {
            context,
            _registration: registration,
            rx,
            devices: HashMap::new(),
            handles: HashMap::new(),
            transfers: HashMap::new(),
            next_id: 0,
        })
    }

    fn next_id(&mut self) -> u32 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    fn handle(&mut self, handle: &HandleId) -> Result<&mut DeviceHandle<Context>, UsbError> {
        self.handles.get_mut(&handle.0).ok_or(UsbError::NotFound)
    }

    fn transfer(&mut self, transfer: TransferId) -> Result<&mut Transfer, UsbError> {
        self.transfers.get_mut(&transfer.0).ok_or(UsbError::NotFound)
    }

    /// Service every submitted transfer, blocking up to `timeout` in total
    fn read_transfers(&mut self, timeout: Duration, events: &mut Vec<UsbEvent>) {
        let submitted: Vec<u32> = self
            .transfers
            .iter()
            .filter(|(_, t)| t.state == TransferState::Submitted)
            .map(|(id, _)| *id)
            .collect();
        if submitted.is_empty() {
            return;
        }
        let timeout = read_timeout(timeout, submitted.len());

        for id in submitted {
            let Some(transfer) = self.transfers.get_mut(&id) else {
                continue;
            };
            let Some(handle) = self.handles.get(&transfer.handle) else {
                transfer.state = TransferState::Idle;
                transfer.actual_length = 0;
                events.push(UsbEvent::TransferCompleted {
                    transfer: TransferId(id),
                    status: TransferStatus::NoDevice,
                });
                continue;
            };

            let status = match handle.read_interrupt(transfer.endpoint, &mut transfer.buffer, timeout)
            {
                Ok(len) => {
                    transfer.actual_length = len;
                    TransferStatus::Completed
                }
                Err(e) => {
                    // Nothing arrived yet, the transfer stays submitted
                    let Some(status) = status_from_error(e) else {
                        continue;
                    };
                    log::trace!("Interrupt read on {:#04x} failed: {e}", transfer.endpoint);
                    transfer.actual_length = 0;
                    status
                }
            };
            transfer.state = TransferState::Idle;
            events.push(UsbEvent::TransferCompleted {
                transfer: TransferId(id),
                status,
            });
        }
    }

    fn drain_hotplug(&mut self, events: &mut Vec<UsbEvent>) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                HotplugMessage::Arrived(device) => {
                    let Some(info) = device_info(&device) else {
                        continue;
                    };
                    self.devices.insert((info.bus, info.address), device);
                    events.push(UsbEvent::Arrived(info));
                }
                HotplugMessage::Left(device) => {
                    let Some(info) = device_info(&device) else {
                        continue;
                    };
                    self.devices.remove(&(info.bus, info.address));
                    events.push(UsbEvent::Left(info));
                }
            }
        }
    }
}

impl UsbBackend for LibUsbBackend {
    fn open(&mut self, device: &UsbDeviceInfo) -> Result<HandleId, UsbError> {
        let handle = self
            .devices
            .get(&(device.bus, device.address))
            .ok_or(UsbError::NoDevice)?
            .open()?;
        let id = self.next_id();
        self.handles.insert(id, handle);
        Ok(HandleId(id))
    }

    fn close(&mut self, handle: HandleId) {
        // Dropping the handle closes it
        self.handles.remove(&handle.0);
    }

    fn kernel_driver_active(&mut self, handle: &HandleId, iface: u8) -> Result<bool, UsbError> {
        Ok(self.handle(handle)?.kernel_driver_active(iface)?)
    }

    fn detach_kernel_driver(&mut self, handle: &HandleId, iface: u8) -> Result<(), UsbError> {
        Ok(self.handle(handle)?.detach_kernel_driver(iface)?)
    }

    fn attach_kernel_driver(&mut self, handle: &HandleId, iface: u8) -> Result<(), UsbError> {
        Ok(self.handle(handle)?.attach_kernel_driver(iface)?)
    }

    fn claim_interface(&mut self, handle: &HandleId, iface: u8) -> Result<(), UsbError> {
        Ok(self.handle(handle)?.claim_interface(iface)?)
    }

    fn release_interface(&mut self, handle: &HandleId, iface: u8) -> Result<(), UsbError> {
        Ok(self.handle(handle)?.release_interface(iface)?)
    }

    fn alloc_transfer(
        &mut self,
        handle: &HandleId,
        endpoint: u8,
        length: usize,
    ) -> Result<TransferId, UsbError> {
        if !self.handles.contains_key(&handle.0) {
            return Err(UsbError::NotFound);
        }
        let id = self.next_id();
        self.transfers.insert(
            id,
            Transfer {
                handle: handle.0,
                endpoint,
                buffer: vec![0; length],
                actual_length: 0,
                state: TransferState::Idle,
            },
        );
        Ok(TransferId(id))
    }

    fn submit_transfer(&mut self, transfer: TransferId) -> Result<(), UsbError> {
        let has_device = {
            let handle = self.transfer(transfer)?.handle;
            self.handles.contains_key(&handle)
        };
        if !has_device {
            return Err(UsbError::NoDevice);
        }
        let transfer = self.transfer(transfer)?;
        if transfer.state != TransferState::Idle {
            return Err(UsbError::Busy);
        }
        transfer.state = TransferState::Submitted;
        Ok(())
    }

    fn cancel_transfer(&mut self, transfer: TransferId) -> Result<(), UsbError> {
        let transfer = self.transfer(transfer)?;
        if transfer.state != TransferState::Submitted {
            return Err(UsbError::NotFound);
        }
        transfer.state = TransferState::Cancelling;
        Ok(())
    }

    fn free_transfer(&mut self, transfer: TransferId) {
        self.transfers.remove(&transfer.0);
    }

    fn transfer_data(&self, transfer: TransferId) -> Option<&[u8]> {
        self.transfers
            .get(&transfer.0)
            .map(|t| &t.buffer[..t.actual_length])
    }

    fn handle_events(&mut self, timeout: Duration) -> Result<Vec<UsbEvent>, UsbError> {
        let mut events = Vec::new();

        // Cancelled transfers complete on the next pump
        for (id, transfer) in self.transfers.iter_mut() {
            if transfer.state == TransferState::Cancelling {
                transfer.state = TransferState::Idle;
                transfer.actual_length = 0;
                events.push(UsbEvent::TransferCompleted {
                    transfer: TransferId(*id),
                    status: TransferStatus::Cancelled,
                });
            }
        }

        let reading = self
            .transfers
            .values()
            .any(|t| t.state == TransferState::Submitted);
        if reading || !events.is_empty() {
            self.context.handle_events(Some(Duration::ZERO))?;
            self.read_transfers(timeout, &mut events);
        } else {
            self.context.handle_events(Some(timeout))?;
        }

        self.drain_hotplug(&mut events);
        Ok(events)
    }
}

/// Share the poll timeout between the submitted reads. Never returns zero.
fn read_timeout(timeout: Duration, submitted: usize) -> Duration {
    let share = timeout / submitted.max(1) as u32;
    share.max(MIN_READ_TIMEOUT)
}

/// Map a failed read onto the transfer status libusb would report. Returns
/// None when the read should simply be retried on the next pump.
fn status_from_error(err: rusb::Error) -> Option<TransferStatus> {
    let status = match err {
        // No data yet, or a signal interrupted the wait
        rusb::Error::Timeout | rusb::Error::Interrupted => return None,
        rusb::Error::NoDevice => TransferStatus::NoDevice,
        rusb::Error::Pipe => TransferStatus::Stall,
        rusb::Error::Overflow => TransferStatus::Overflow,
        _ => TransferStatus::Error,
    };
    Some(status)
}

fn device_info<T: UsbContext>(device: &Device<T>) -> Option<UsbDeviceInfo> {
    let descriptor = match device.device_descriptor() {
        Ok(descriptor) => descriptor,
        Err(e) => {
            log::debug!("Failed to get device descriptor: {e}");
            return None;
        }
    };
    Some(UsbDeviceInfo {
        bus: device.bus_number(),
        address: device.address(),
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
    })
}

/// Enumerate every currently attached device from the given vendor
pub fn list_devices(vendor_id: u16) -> Result<Vec<UsbDeviceInfo>, UsbError> {
    let context = Context::new()?;
    let devices = context
        .devices()?
        .iter()
        .filter_map(|device| device_info(&device))
        .filter(|info| info.vendor_id == vendor_id)
        .collect();
    Ok(devices)
}
