use crate::{
    drivers::hanvon::{
        driver::{decode, WheelState},
        profile::DeviceProfile,
    },
    input::target::{apply, EventSink},
    usb::{TransferId, TransferStatus, UsbBackend, UsbError},
};

/// State of the read loop of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Allocated but never submitted
    Idle,
    /// A read is in flight
    Submitted,
    /// A completed read is being decoded
    Completing,
    /// No read is in flight and none will be submitted again
    Stopped,
}

/// Everything a completed read needs to turn into input events
pub struct DecodeContext<'a, S: EventSink> {
    pub profile: &'a DeviceProfile,
    pub wheel: &'a mut WheelState,
    pub sink: &'a mut S,
}

/// Owns the single in-flight interrupt read of a session. Every completion
/// is decoded and written to the sink, then the read is resubmitted.
#[derive(Debug)]
pub struct TransferLoop {
    transfer: TransferId,
    state: TransferState,
    cancel_requested: bool,
    dump_packets: bool,
}

impl TransferLoop {
    pub fn new(transfer: TransferId, dump_packets: bool) -> Self {
        Self {
            transfer,
            state: TransferState::Idle,
            cancel_requested: false,
            dump_packets,
        }
    }

    pub fn transfer(&self) -> TransferId {
        self.transfer
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Submit the first read
    pub fn start<B: UsbBackend>(&mut self, backend: &mut B) -> Result<(), UsbError> {
        if let Err(e) = backend.submit_transfer(self.transfer) {
            self.state = TransferState::Stopped;
            return Err(e);
        }
        self.state = TransferState::Submitted;
        Ok(())
    }

    /// Handle the completion of the in-flight read. Returns an error only if
    /// the read could not be resubmitted, in which case the loop is stopped.
    pub fn complete<B: UsbBackend, S: EventSink>(
        &mut self,
        backend: &mut B,
        status: TransferStatus,
        ctx: DecodeContext<'_, S>,
        running: bool,
    ) -> Result<(), UsbError> {
        if status != TransferStatus::Completed {
            log::debug!("Transfer failed or cancelled: {status:?}");
            self.state = TransferState::Stopped;
            return Ok(());
        }
        self.state = TransferState::Completing;

        match backend.transfer_data(self.transfer) {
            Some(packet) => {
                if self.dump_packets {
                    log::debug!("Packet: {}", format_packet(packet));
                }
                match decode(ctx.profile, ctx.wheel, packet) {
                    Ok(events) => {
                        if let Err(e) = apply(ctx.sink, &events) {
                            log::warn!("Failed to send events to virtual tablet: {e}");
                        }
                    }
                    Err(e) => {
                        log::debug!("Dropping packet: {e}");
                    }
                }
            }
            None => log::error!("No buffer for transfer {:?}", self.transfer),
        }

        if !running || self.cancel_requested {
            log::debug!(
                "Not resubmitting transfer (running={running}, cancelled={})",
                self.cancel_requested
            );
            self.state = TransferState::Stopped;
            return Ok(());
        }

        if let Err(e) = backend.submit_transfer(self.transfer) {
            self.state = TransferState::Stopped;
            return Err(e);
        }
        self.state = TransferState::Submitted;
        Ok(())
    }

    /// Request cancellation of the in-flight read. The loop never resubmits
    /// after this, even if a completion is still delivered.
    pub fn cancel<B: UsbBackend>(&mut self, backend: &mut B) {
        self.cancel_requested = true;
        if self.state == TransferState::Submitted {
            log::debug!("Cancelling active transfer...");
            match backend.cancel_transfer(self.transfer) {
                Ok(()) | Err(UsbError::NotFound) => (),
                Err(e) => log::warn!("Error cancelling transfer: {e}"),
            }
        }
        self.state = TransferState::Stopped;
    }
}

fn format_packet(packet: &[u8]) -> String {
    packet
        .iter()
        .map(|b| format!("{b:#04x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
