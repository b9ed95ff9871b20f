use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use thiserror::Error;

use crate::{
    config::Config,
    drivers::hanvon::{
        driver::WheelState,
        hid_report::PACKET_SIZE,
        profile::{self, DeviceProfile},
    },
    input::{
        target::{SinkError, SinkFactory},
        transfer::{DecodeContext, TransferLoop},
    },
    usb::{HandleId, TransferId, TransferStatus, UsbBackend, UsbDeviceInfo, UsbError, UsbEvent},
};

/// Lifecycle of the tablet session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No tablet is being driven
    Empty,
    /// Resources are being acquired for a new tablet
    Acquiring,
    /// A tablet is claimed and its reads are feeding a virtual device
    Active,
    /// Resources of the active tablet are being released
    Releasing,
}

/// Possible errors acquiring a tablet. Each variant names the step that
/// failed; every step before it has been rolled back.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("unsupported device {0}")]
    Unsupported(UsbDeviceInfo),
    #[error("failed to open device: {0}")]
    Open(UsbError),
    #[error("failed to query kernel driver: {0}")]
    KernelDriverQuery(UsbError),
    #[error("failed to detach kernel driver: {0}")]
    Detach(UsbError),
    #[error("failed to claim interface {interface}: {source}")]
    Claim { interface: u8, source: UsbError },
    #[error("failed to create virtual tablet: {0}")]
    Sink(SinkError),
    #[error("failed to allocate transfer: {0}")]
    AllocTransfer(UsbError),
    #[error("failed to submit transfer: {0}")]
    Submit(UsbError),
}

/// Everything held while a tablet is being driven
struct Session<S> {
    device: UsbDeviceInfo,
    handle: HandleId,
    interface: u8,
    kernel_driver_detached: bool,
    sink: S,
    transfer: TransferLoop,
    profile: DeviceProfile,
    wheel: WheelState,
}

/// Drives at most one Hanvon tablet at a time
///
/// The [SessionManager] pumps the USB backend for hotplug notifications and
/// transfer completions. When a supported tablet arrives it takes the
/// interface away from the kernel driver, creates a virtual tablet with a
/// matching profile and keeps one interrupt read in flight. Every packet
/// that read returns is decoded and forwarded to the virtual tablet. When
/// the tablet leaves, or on shutdown, everything is handed back.
pub struct SessionManager<B: UsbBackend, F: SinkFactory> {
    backend: B,
    sinks: F,
    config: Config,
    /// Cleared to request shutdown
    running: Arc<AtomicBool>,
    state: SessionState,
    session: Option<Session<F::Sink>>,
}

impl<B: UsbBackend, F: SinkFactory> SessionManager<B, F> {
    pub fn new(backend: B, sinks: F, config: Config, running: Arc<AtomicBool>) -> Self {
        Self {
            backend,
            sinks,
            config,
            running,
            state: SessionState::Empty,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Pump the backend until shutdown is requested, then release any
    /// active session.
    pub fn run(&mut self) {
        log::info!("Waiting for Hanvon tablets (vendor {:04x})", self.config.vendor_id);
        let timeout = self.config.poll_timeout();
        while self.running.load(Ordering::SeqCst) {
            self.poll(timeout);
        }
        log::debug!("Session manager stopping");
        self.shutdown();
    }

    /// Wait up to `timeout` for backend events and dispatch them
    pub fn poll(&mut self, timeout: Duration) {
        match self.backend.handle_events(timeout) {
            Ok(events) => {
                for event in events {
                    self.handle_event(event);
                }
            }
            Err(UsbError::Interrupted) => (),
            Err(e) => log::error!("Error handling USB events: {e}"),
        }
    }

    /// Release the active session, if any
    pub fn shutdown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.state = SessionState::Releasing;
        self.release_session(session);
        self.state = SessionState::Empty;
    }

    fn handle_event(&mut self, event: UsbEvent) {
        log::trace!("Received USB event: {event:?}");
        match event {
            UsbEvent::Arrived(device) => self.on_arrival(device),
            UsbEvent::Left(device) => self.on_departure(device),
            UsbEvent::TransferCompleted { transfer, status } => {
                self.on_transfer_complete(transfer, status)
            }
        }
    }

    fn on_arrival(&mut self, device: UsbDeviceInfo) {
        if self.state != SessionState::Empty {
            log::debug!("Ignoring {device}: a tablet is already being driven");
            return;
        }
        log::debug!("Device arrived: {device}");

        self.state = SessionState::Acquiring;
        match self.acquire(device) {
            Ok(session) => {
                log::info!("Started session for {} ({device})", session.profile.name);
                self.session = Some(session);
                self.state = SessionState::Active;
            }
            Err(AcquireError::Unsupported(device)) => {
                log::info!("Ignoring unsupported device {device}");
                self.state = SessionState::Empty;
            }
            Err(e) => {
                log::error!("Unable to start session for {device}: {e}");
                self.state = SessionState::Empty;
            }
        }
    }

    fn on_departure(&mut self, device: UsbDeviceInfo) {
        let is_active = self
            .session
            .as_ref()
            .is_some_and(|session| session.device.same_device(&device));
        if !is_active {
            log::debug!("Ignoring departure of {device}");
            return;
        }
        log::info!("Device left: {device}");
        self.shutdown();
    }

    fn on_transfer_complete(&mut self, transfer: TransferId, status: TransferStatus) {
        let running = self.running.load(Ordering::SeqCst);
        let Some(session) = self.session.as_mut() else {
            log::trace!("Ignoring completion of {transfer:?}: no active session");
            return;
        };
        if session.transfer.transfer() != transfer {
            log::trace!("Ignoring completion of unknown {transfer:?}");
            return;
        }

        let ctx = DecodeContext {
            profile: &session.profile,
            wheel: &mut session.wheel,
            sink: &mut session.sink,
        };
        if let Err(e) = session
            .transfer
            .complete(&mut self.backend, status, ctx, running)
        {
            log::error!(
                "Failed to resubmit transfer for {}, no more input will be read: {e}",
                session.device
            );
        }
    }

    /// Acquire every resource needed to drive the given device. On failure
    /// the steps already taken are undone in reverse order.
    fn acquire(&mut self, device: UsbDeviceInfo) -> Result<Session<F::Sink>, AcquireError> {
        let Some(profile) = profile::lookup(device.vendor_id, device.product_id) else {
            return Err(AcquireError::Unsupported(device));
        };
        let interface = self.config.interface;

        log::debug!("Opening {device}");
        let handle = self.backend.open(&device).map_err(AcquireError::Open)?;

        let kernel_driver_detached = match self.take_interface(&handle, interface) {
            Ok(detached) => detached,
            Err(e) => {
                self.rollback(handle, interface, false, false);
                return Err(e);
            }
        };

        log::debug!("Claiming interface {interface}");
        if let Err(source) = self.backend.claim_interface(&handle, interface) {
            self.rollback(handle, interface, false, kernel_driver_detached);
            return Err(AcquireError::Claim { interface, source });
        }

        let sink = match self.sinks.create(&profile) {
            Ok(sink) => sink,
            Err(e) => {
                self.rollback(handle, interface, true, kernel_driver_detached);
                return Err(AcquireError::Sink(e));
            }
        };

        let transfer =
            match self
                .backend
                .alloc_transfer(&handle, self.config.endpoint, PACKET_SIZE)
            {
                Ok(transfer) => transfer,
                Err(e) => {
                    drop(sink);
                    self.rollback(handle, interface, true, kernel_driver_detached);
                    return Err(AcquireError::AllocTransfer(e));
                }
            };

        let mut transfer_loop = TransferLoop::new(transfer, self.config.dump_packets);
        if let Err(e) = transfer_loop.start(&mut self.backend) {
            self.backend.free_transfer(transfer);
            drop(sink);
            self.rollback(handle, interface, true, kernel_driver_detached);
            return Err(AcquireError::Submit(e));
        }

        Ok(Session {
            device,
            handle,
            interface,
            kernel_driver_detached,
            sink,
            transfer: transfer_loop,
            profile,
            wheel: WheelState::default(),
        })
    }

    /// Detach the kernel driver from the interface if one is bound. Returns
    /// whether it was detached.
    fn take_interface(&mut self, handle: &HandleId, interface: u8) -> Result<bool, AcquireError> {
        let active = match self.backend.kernel_driver_active(handle, interface) {
            Ok(active) => active,
            Err(UsbError::NotSupported) => {
                log::debug!("Kernel driver query not supported on this platform");
                false
            }
            Err(e) => return Err(AcquireError::KernelDriverQuery(e)),
        };
        if !active {
            return Ok(false);
        }

        log::debug!("Detaching kernel driver from interface {interface}");
        self.backend
            .detach_kernel_driver(handle, interface)
            .map_err(AcquireError::Detach)?;
        Ok(true)
    }

    /// Undo the device level steps of a failed acquisition
    fn rollback(&mut self, handle: HandleId, interface: u8, claimed: bool, detached: bool) {
        log::debug!("Rolling back partial acquisition");
        if claimed {
            if let Err(e) = self.backend.release_interface(&handle, interface) {
                log::warn!("Failed to release interface {interface}: {e}");
            }
        }
        if detached {
            if let Err(e) = self.backend.attach_kernel_driver(&handle, interface) {
                log::warn!("Failed to reattach kernel driver: {e}");
            }
        }
        self.backend.close(handle);
    }

    fn release_session(&mut self, session: Session<F::Sink>) {
        let Session {
            device,
            handle,
            interface,
            kernel_driver_detached,
            sink,
            mut transfer,
            profile,
            ..
        } = session;
        log::debug!("Releasing {device} (transfer {:?})", transfer.state());

        transfer.cancel(&mut self.backend);
        self.backend.free_transfer(transfer.transfer());

        // Dropping the sink destroys the virtual tablet
        drop(sink);

        match self.backend.release_interface(&handle, interface) {
            Ok(()) | Err(UsbError::NoDevice) => (),
            Err(e) => log::warn!("Failed to release interface {interface}: {e}"),
        }

        if kernel_driver_detached {
            match self.backend.attach_kernel_driver(&handle, interface) {
                Ok(()) => log::debug!("Reattached kernel driver to interface {interface}"),
                Err(UsbError::NoDevice | UsbError::NotSupported | UsbError::Busy) => (),
                Err(e) => log::warn!("Failed to reattach kernel driver: {e}"),
            }
        }

        self.backend.close(handle);
        log::info!("Stopped session for {} ({device})", profile.name);
    }
}
