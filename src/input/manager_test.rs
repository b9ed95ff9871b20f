use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet, VecDeque},
    error::Error,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    config::Config,
    drivers::hanvon::{
        driver::{decode, WheelState, VID},
        event::Event,
        profile::{self, DeviceProfile, PID_AM1107, PID_GP0605},
    },
    input::{
        manager::{SessionManager, SessionState},
        target::{EventSink, SinkError, SinkFactory},
        transfer::{DecodeContext, TransferLoop, TransferState},
    },
    usb::{
        HandleId, TransferId, TransferStatus, UsbBackend, UsbDeviceInfo, UsbError, UsbEvent,
    },
};

const PEN_PACKET: [u8; 10] = [0x02, 0x81, 0x01, 0x02, 0x00, 0x10, 0x04, 0x00, 0x05, 0x06];

/// Backend operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Open,
    KernelDriverQuery,
    Detach,
    Claim,
    AllocTransfer,
    Submit,
    Resubmit,
}

/// State of the simulated USB host, shared between a test and the
/// [MockBackend] it hands to the manager
#[derive(Debug, Default)]
struct UsbState {
    /// Batches returned by successive calls to handle_events
    pending: VecDeque<Vec<UsbEvent>>,
    /// Cleared once no more batches are pending
    stop_when_idle: Option<Arc<AtomicBool>>,
    fail: Option<Step>,
    kernel_driver_bound: bool,
    kernel_query_unsupported: bool,

    next_id: u32,
    open_handles: HashSet<u32>,
    claimed: HashSet<u8>,
    /// Allocated transfers and whether each one is submitted
    transfers: HashMap<u32, bool>,
    last_transfer: Option<TransferId>,
    opens: usize,
    submits: usize,
    cancels: usize,
    reattaches: usize,
    /// Release related calls, in order
    calls: Vec<&'static str>,
}

impl UsbState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn fails(&self, step: Step) -> Result<(), UsbError> {
        match self.fail {
            Some(fail) if fail == step => Err(UsbError::Io),
            _ => Ok(()),
        }
    }

    fn is_clean(&self) -> bool {
        self.open_handles.is_empty() && self.claimed.is_empty() && self.transfers.is_empty()
    }

    /// Returns true if the last allocated transfer is in flight
    fn reading(&self) -> bool {
        self.last_transfer
            .and_then(|transfer| self.transfers.get(&transfer.0).copied())
            .unwrap_or(false)
    }
}

/// In-memory USB host with a single tablet attached
#[derive(Debug, Default)]
struct MockBackend {
    usb: Rc<RefCell<UsbState>>,
    /// Data returned by every completed read
    packet: Vec<u8>,
}

impl UsbBackend for MockBackend {
    fn open(&mut self, _device: &UsbDeviceInfo) -> Result<HandleId, UsbError> {
        let mut usb = self.usb.borrow_mut();
        usb.fails(Step::Open)?;
        usb.opens += 1;
        let id = usb.next_id();
        usb.open_handles.insert(id);
        Ok(HandleId(id))
    }

    fn close(&mut self, handle: HandleId) {
        let mut usb = self.usb.borrow_mut();
        usb.calls.push("close");
        usb.open_handles.remove(&handle.0);
    }

    fn kernel_driver_active(&mut self, _handle: &HandleId, _iface: u8) -> Result<bool, UsbError> {
        let usb = self.usb.borrow();
        usb.fails(Step::KernelDriverQuery)?;
        if usb.kernel_query_unsupported {
            return Err(UsbError::NotSupported);
        }
        Ok(usb.kernel_driver_bound)
    }

    fn detach_kernel_driver(&mut self, _handle: &HandleId, _iface: u8) -> Result<(), UsbError> {
        let mut usb = self.usb.borrow_mut();
        usb.fails(Step::Detach)?;
        usb.kernel_driver_bound = false;
        Ok(())
    }

    fn attach_kernel_driver(&mut self, _handle: &HandleId, _iface: u8) -> Result<(), UsbError> {
        let mut usb = self.usb.borrow_mut();
        usb.calls.push("attach_kernel_driver");
        usb.reattaches += 1;
        usb.kernel_driver_bound = true;
        Ok(())
    }

    fn claim_interface(&mut self, _handle: &HandleId, iface: u8) -> Result<(), UsbError> {
        let mut usb = self.usb.borrow_mut();
        usb.fails(Step::Claim)?;
        usb.claimed.insert(iface);
        Ok(())
    }

    fn release_interface(&mut self, _handle: &HandleId, iface: u8) -> Result<(), UsbError> {
        let mut usb = self.usb.borrow_mut();
        usb.calls.push("release_interface");
        usb.claimed.remove(&iface);
        Ok(())
    }

    fn alloc_transfer(
        &mut self,
        handle: &HandleId,
        _endpoint: u8,
        _length: usize,
    ) -> Result<TransferId, UsbError> {
        let mut usb = self.usb.borrow_mut();
        usb.fails(Step::AllocTransfer)?;
        if !usb.open_handles.contains(&handle.0) {
            return Err(UsbError::NotFound);
        }
        let id = usb.next_id();
        usb.transfers.insert(id, false);
        usb.last_transfer = Some(TransferId(id));
        Ok(TransferId(id))
    }

    fn submit_transfer(&mut self, transfer: TransferId) -> Result<(), UsbError> {
        let mut usb = self.usb.borrow_mut();
        if usb.submits == 0 {
            usb.fails(Step::Submit)?;
        } else {
            usb.fails(Step::Resubmit)?;
        }
        let submitted = usb
            .transfers
            .get_mut(&transfer.0)
            .ok_or(UsbError::NotFound)?;
        *submitted = true;
        usb.submits += 1;
        Ok(())
    }

    fn cancel_transfer(&mut self, transfer: TransferId) -> Result<(), UsbError> {
        let mut usb = self.usb.borrow_mut();
        usb.calls.push("cancel_transfer");
        usb.cancels += 1;
        match usb.transfers.get_mut(&transfer.0) {
            Some(submitted) if *submitted => {
                *submitted = false;
                Ok(())
            }
            _ => Err(UsbError::NotFound),
        }
    }

    fn free_transfer(&mut self, transfer: TransferId) {
        let mut usb = self.usb.borrow_mut();
        usb.calls.push("free_transfer");
        usb.transfers.remove(&transfer.0);
    }

    fn transfer_data(&self, transfer: TransferId) -> Option<&[u8]> {
        let allocated = self.usb.borrow().transfers.contains_key(&transfer.0);
        allocated.then_some(self.packet.as_slice())
    }

    fn handle_events(&mut self, _timeout: Duration) -> Result<Vec<UsbEvent>, UsbError> {
        let mut usb = self.usb.borrow_mut();
        let events = usb.pending.pop_front().unwrap_or_default();
        if let Some(completed) = events.iter().find_map(|event| match event {
            UsbEvent::TransferCompleted { transfer, .. } => Some(*transfer),
            _ => None,
        }) {
            if let Some(submitted) = usb.transfers.get_mut(&completed.0) {
                *submitted = false;
            }
        }
        if usb.pending.is_empty() {
            if let Some(running) = usb.stop_when_idle.as_ref() {
                running.store(false, Ordering::SeqCst);
            }
        }
        Ok(events)
    }
}

/// Sink that records every event it receives, with a sync recorded as
/// [Event::SyncBatchEnd]
struct RecordingSink {
    events: Rc<RefCell<Vec<Event>>>,
    live: Rc<Cell<usize>>,
}

impl EventSink for RecordingSink {
    fn write_event(&mut self, event: &Event) -> Result<(), SinkError> {
        self.events.borrow_mut().push(*event);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        self.events.borrow_mut().push(Event::SyncBatchEnd);
        Ok(())
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

#[derive(Default)]
struct RecordingSinkFactory {
    events: Rc<RefCell<Vec<Event>>>,
    live: Rc<Cell<usize>>,
    fail: bool,
}

impl SinkFactory for RecordingSinkFactory {
    type Sink = RecordingSink;

    fn create(&mut self, _profile: &DeviceProfile) -> Result<RecordingSink, SinkError> {
        if self.fail {
            return Err(SinkError::Io(std::io::Error::other("uinput unavailable")));
        }
        self.live.set(self.live.get() + 1);
        Ok(RecordingSink {
            events: self.events.clone(),
            live: self.live.clone(),
        })
    }
}

/// A manager driving the mock backend, plus handles to observe it
struct Harness {
    manager: SessionManager<MockBackend, RecordingSinkFactory>,
    usb: Rc<RefCell<UsbState>>,
    events: Rc<RefCell<Vec<Event>>>,
    live: Rc<Cell<usize>>,
}

impl Harness {
    fn new(usb: UsbState, sinks: RecordingSinkFactory) -> Self {
        Harness::with_running(usb, sinks, Arc::new(AtomicBool::new(true)))
    }

    fn with_running(usb: UsbState, sinks: RecordingSinkFactory, running: Arc<AtomicBool>) -> Self {
        let usb = Rc::new(RefCell::new(usb));
        let events = sinks.events.clone();
        let live = sinks.live.clone();
        let backend = MockBackend {
            usb: usb.clone(),
            packet: PEN_PACKET.to_vec(),
        };
        let manager = SessionManager::new(backend, sinks, Config::default(), running);
        Self {
            manager,
            usb,
            events,
            live,
        }
    }

    /// A harness with a GP0605 already claimed
    fn active() -> Self {
        let usb = UsbState {
            kernel_driver_bound: true,
            ..Default::default()
        };
        let mut harness = Harness::new(usb, RecordingSinkFactory::default());
        harness.deliver(vec![UsbEvent::Arrived(tablet(PID_GP0605, 4))]);
        harness
    }

    /// Deliver the given events in a single pump
    fn deliver(&mut self, events: Vec<UsbEvent>) {
        self.usb.borrow_mut().pending.push_back(events);
        self.manager.poll(Duration::ZERO);
    }

    fn transfer(&self) -> Result<TransferId, Box<dyn Error>> {
        Ok(self.usb.borrow().last_transfer.ok_or("no transfer allocated")?)
    }

    fn complete(&mut self, status: TransferStatus) -> Result<(), Box<dyn Error>> {
        let transfer = self.transfer()?;
        self.deliver(vec![UsbEvent::TransferCompleted { transfer, status }]);
        Ok(())
    }
}

fn tablet(product_id: u16, address: u8) -> UsbDeviceInfo {
    UsbDeviceInfo {
        bus: 1,
        address,
        vendor_id: VID,
        product_id,
    }
}

#[test]
fn test_arrival_starts_session() {
    let harness = Harness::active();

    assert_eq!(harness.manager.state(), SessionState::Active);
    let usb = harness.usb.borrow();
    assert_eq!(usb.open_handles.len(), 1);
    assert!(!usb.kernel_driver_bound);
    assert!(usb.claimed.contains(&0));
    assert_eq!(usb.submits, 1);
    assert!(usb.reading());
    assert_eq!(harness.live.get(), 1);
}

#[test]
fn test_second_arrival_is_ignored() {
    let mut harness = Harness::active();
    harness.deliver(vec![UsbEvent::Arrived(tablet(PID_AM1107, 5))]);

    assert_eq!(harness.manager.state(), SessionState::Active);
    assert_eq!(harness.usb.borrow().opens, 1);
    assert_eq!(harness.live.get(), 1);
}

#[test]
fn test_departure_of_other_device_is_ignored() {
    let mut harness = Harness::active();
    harness.deliver(vec![UsbEvent::Left(tablet(PID_GP0605, 9))]);

    assert_eq!(harness.manager.state(), SessionState::Active);
    assert!(harness.usb.borrow().calls.is_empty());
}

#[test]
fn test_departure_releases_everything() {
    let mut harness = Harness::active();
    harness.deliver(vec![UsbEvent::Left(tablet(PID_GP0605, 4))]);

    assert_eq!(harness.manager.state(), SessionState::Empty);
    let usb = harness.usb.borrow();
    assert!(usb.is_clean());
    assert!(usb.kernel_driver_bound);
    assert_eq!(
        usb.calls,
        vec![
            "cancel_transfer",
            "free_transfer",
            "release_interface",
            "attach_kernel_driver",
            "close"
        ]
    );
    assert_eq!(usb.cancels, 1);
    assert_eq!(harness.live.get(), 0);
}

#[test]
fn test_failed_acquisition_rolls_back() {
    let steps = [
        Step::Open,
        Step::KernelDriverQuery,
        Step::Detach,
        Step::Claim,
        Step::AllocTransfer,
        Step::Submit,
    ];
    for step in steps {
        let usb = UsbState {
            kernel_driver_bound: true,
            fail: Some(step),
            ..Default::default()
        };
        let mut harness = Harness::new(usb, RecordingSinkFactory::default());
        harness.deliver(vec![UsbEvent::Arrived(tablet(PID_GP0605, 4))]);

        assert_eq!(harness.manager.state(), SessionState::Empty, "{step:?}");
        let usb = harness.usb.borrow();
        assert!(usb.is_clean(), "{step:?} leaked resources");
        assert!(usb.kernel_driver_bound, "{step:?} left driver detached");
        assert_eq!(harness.live.get(), 0, "{step:?} leaked sink");
    }
}

#[test]
fn test_failed_submit_rolls_back_in_reverse_order() {
    let usb = UsbState {
        kernel_driver_bound: true,
        fail: Some(Step::Submit),
        ..Default::default()
    };
    let mut harness = Harness::new(usb, RecordingSinkFactory::default());
    harness.deliver(vec![UsbEvent::Arrived(tablet(PID_GP0605, 4))]);

    assert_eq!(
        harness.usb.borrow().calls,
        vec![
            "free_transfer",
            "release_interface",
            "attach_kernel_driver",
            "close"
        ]
    );
}

#[test]
fn test_failed_sink_rolls_back() {
    let usb = UsbState {
        kernel_driver_bound: true,
        ..Default::default()
    };
    let sinks = RecordingSinkFactory {
        fail: true,
        ..Default::default()
    };
    let mut harness = Harness::new(usb, sinks);
    harness.deliver(vec![UsbEvent::Arrived(tablet(PID_GP0605, 4))]);

    assert_eq!(harness.manager.state(), SessionState::Empty);
    let usb = harness.usb.borrow();
    assert!(usb.is_clean());
    assert!(usb.kernel_driver_bound);
}

#[test]
fn test_unknown_product_is_rejected() {
    let mut harness = Harness::new(UsbState::default(), RecordingSinkFactory::default());
    harness.deliver(vec![UsbEvent::Arrived(tablet(0x9999, 4))]);

    assert_eq!(harness.manager.state(), SessionState::Empty);
    assert_eq!(harness.usb.borrow().opens, 0);
    assert_eq!(harness.live.get(), 0);
}

#[test]
fn test_completion_is_decoded_and_resubmitted() -> Result<(), Box<dyn Error>> {
    let mut harness = Harness::active();
    harness.complete(TransferStatus::Completed)?;

    let profile = profile::lookup(VID, PID_GP0605).ok_or("unknown profile")?;
    let expected = decode(&profile, &mut WheelState::default(), &PEN_PACKET)?;
    assert_eq!(*harness.events.borrow(), expected);
    let usb = harness.usb.borrow();
    assert_eq!(usb.submits, 2);
    assert!(usb.reading());

    Ok(())
}

#[test]
fn test_completion_of_unknown_transfer_is_ignored() {
    let mut harness = Harness::active();
    harness.deliver(vec![UsbEvent::TransferCompleted {
        transfer: TransferId(999),
        status: TransferStatus::Completed,
    }]);

    assert!(harness.events.borrow().is_empty());
    assert_eq!(harness.usb.borrow().submits, 1);
}

#[test]
fn test_failed_transfer_stops_reading() -> Result<(), Box<dyn Error>> {
    let mut harness = Harness::active();
    harness.complete(TransferStatus::NoDevice)?;

    assert!(harness.events.borrow().is_empty());
    assert_eq!(harness.usb.borrow().submits, 1);
    assert!(!harness.usb.borrow().reading());

    // The session stays until the device leaves
    assert_eq!(harness.manager.state(), SessionState::Active);
    harness.deliver(vec![UsbEvent::Left(tablet(PID_GP0605, 4))]);
    assert_eq!(harness.manager.state(), SessionState::Empty);
    assert!(harness.usb.borrow().is_clean());

    Ok(())
}

#[test]
fn test_failed_resubmit_stops_reading() -> Result<(), Box<dyn Error>> {
    let mut harness = Harness::active();
    harness.usb.borrow_mut().fail = Some(Step::Resubmit);
    harness.complete(TransferStatus::Completed)?;

    // The packet is still delivered
    assert!(!harness.events.borrow().is_empty());
    assert_eq!(harness.manager.state(), SessionState::Active);
    assert_eq!(harness.usb.borrow().submits, 1);
    assert!(!harness.usb.borrow().reading());

    Ok(())
}

#[test]
fn test_completion_after_cancel_is_not_resubmitted() -> Result<(), Box<dyn Error>> {
    let mut backend = MockBackend {
        packet: PEN_PACKET.to_vec(),
        ..Default::default()
    };
    let handle = backend.open(&tablet(PID_GP0605, 4))?;
    let transfer = backend.alloc_transfer(&handle, 0x81, 10)?;
    let mut transfer_loop = TransferLoop::new(transfer, true);
    transfer_loop.start(&mut backend)?;
    transfer_loop.cancel(&mut backend);
    assert_eq!(transfer_loop.state(), TransferState::Stopped);

    // The read finished before the cancel took effect
    let profile = profile::lookup(VID, PID_GP0605).ok_or("unknown profile")?;
    let mut wheel = WheelState::default();
    let mut sink = RecordingSinkFactory::default().create(&profile)?;
    let ctx = DecodeContext {
        profile: &profile,
        wheel: &mut wheel,
        sink: &mut sink,
    };
    transfer_loop.complete(&mut backend, TransferStatus::Completed, ctx, true)?;

    assert_eq!(transfer_loop.state(), TransferState::Stopped);
    assert_eq!(backend.usb.borrow().submits, 1);

    Ok(())
}

#[test]
fn test_kernel_driver_is_only_reattached_if_detached() {
    let usb = UsbState {
        kernel_driver_bound: false,
        ..Default::default()
    };
    let mut harness = Harness::new(usb, RecordingSinkFactory::default());
    harness.deliver(vec![UsbEvent::Arrived(tablet(PID_GP0605, 4))]);
    assert_eq!(harness.manager.state(), SessionState::Active);

    harness.deliver(vec![UsbEvent::Left(tablet(PID_GP0605, 4))]);
    assert_eq!(harness.manager.state(), SessionState::Empty);
    let usb = harness.usb.borrow();
    assert_eq!(usb.reattaches, 0);
    assert!(usb.is_clean());
}

#[test]
fn test_unsupported_kernel_driver_query_is_tolerated() {
    let usb = UsbState {
        kernel_query_unsupported: true,
        ..Default::default()
    };
    let mut harness = Harness::new(usb, RecordingSinkFactory::default());
    harness.deliver(vec![UsbEvent::Arrived(tablet(PID_GP0605, 4))]);

    assert_eq!(harness.manager.state(), SessionState::Active);
    assert!(harness.usb.borrow().claimed.contains(&0));
}

#[test]
fn test_run_releases_session_on_shutdown() {
    let running = Arc::new(AtomicBool::new(true));
    let mut pending = VecDeque::new();
    pending.push_back(vec![UsbEvent::Arrived(tablet(PID_GP0605, 4))]);
    pending.push_back(vec![]);
    let usb = UsbState {
        pending,
        stop_when_idle: Some(running.clone()),
        kernel_driver_bound: true,
        ..Default::default()
    };
    let mut harness =
        Harness::with_running(usb, RecordingSinkFactory::default(), running.clone());

    harness.manager.run();

    assert!(!running.load(Ordering::SeqCst));
    assert_eq!(harness.manager.state(), SessionState::Empty);
    let usb = harness.usb.borrow();
    assert!(usb.is_clean());
    assert!(usb.kernel_driver_bound);
    assert_eq!(usb.opens, 1);
    assert_eq!(harness.live.get(), 0);
}

#[test]
fn test_shutdown_without_session() {
    let mut harness = Harness::new(UsbState::default(), RecordingSinkFactory::default());
    harness.manager.shutdown();
    assert_eq!(harness.manager.state(), SessionState::Empty);
    assert!(harness.usb.borrow().calls.is_empty());
}
