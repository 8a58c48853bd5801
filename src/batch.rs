//! Transfer batches: one USB transaction against one endpoint.

use std::{
    any::Any,
    fmt::{self, Debug, Display},
};

use log::{debug, trace, warn};

use crate::{
    CompletionQueue, Direction, EndpointDescriptor, EndpointRef, Error, ErrorKind, Target,
    TransferError, TransferType,
};

/// Length of the SETUP stage of a control transfer.
pub const SETUP_PACKET_SIZE: usize = 8;

/// Which data toggles must be resynchronized when a batch fails.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ToggleReset {
    /// No resynchronization needed.
    None,

    /// Reset only the batch's endpoint.
    Endpoint,

    /// Reset every endpoint of the batch's device.
    All,
}

impl ToggleReset {
    /// Default policy for a batch on an endpoint of the given type.
    ///
    /// A failed control transfer may have left any endpoint of the device out
    /// of sync. Isochronous endpoints have no data toggle. The direction does
    /// not matter: IN and OUT endpoints each carry their own toggle, so a
    /// bulk or interrupt failure only ever concerns the endpoint it ran on,
    /// and control pipes are bidirectional.
    pub fn for_transfer_type(transfer_type: TransferType) -> ToggleReset {
        match transfer_type {
            TransferType::Control => ToggleReset::All,
            TransferType::Isochronous => ToggleReset::None,
            TransferType::Bulk | TransferType::Interrupt => ToggleReset::Endpoint,
        }
    }
}

/// Lifecycle state of a live batch.
///
/// Finishing and destruction consume the batch, so those states are never
/// observed on a live value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BatchState {
    /// Created and being populated by the caller.
    Created,

    /// Handed to the backend for execution.
    Scheduled,
}

/// Outcome of a batch, delivered exactly once to its completion handler.
#[derive(Debug)]
pub struct Completion {
    /// Target the batch was created for.
    pub target: Target,

    /// `Ok(())` on success, otherwise the transfer's error status.
    pub status: Result<(), TransferError>,

    /// Number of bytes actually transferred.
    pub actual_len: usize,

    /// The batch's buffer. For IN transfers, the first `actual_len` bytes are
    /// the received data.
    pub data: Vec<u8>,
}

type OnComplete = Box<dyn FnOnce(Completion) -> Result<(), Error> + Send>;

/// One USB transaction against one endpoint.
///
/// A batch holds one reference on its endpoint from creation until it is
/// destroyed. It ends in exactly one of [`finish`][TransferBatch::finish],
/// [`abort`][TransferBatch::abort] or [`destroy`][TransferBatch::destroy],
/// each of which consumes it. Dropping a batch is equivalent to `destroy`.
pub struct TransferBatch {
    /// `None` once released, including inside `Bus::batch_destroy`.
    endpoint: Option<EndpointRef>,

    /// Copied from the endpoint at creation, so it stays readable after the
    /// endpoint reference is gone.
    descriptor: EndpointDescriptor,

    state: BatchState,
    toggle_reset: ToggleReset,

    setup: [u8; SETUP_PACKET_SIZE],
    buffer: Vec<u8>,
    requested_len: usize,

    status: Result<(), TransferError>,
    actual_len: usize,

    on_complete: Option<OnComplete>,

    backend_data: Option<Box<dyn Any + Send>>,
}

impl TransferBatch {
    /// Create a batch with the generic layout, taking a reference on
    /// `endpoint`.
    ///
    /// Bus backends call this from their own `batch_create`; drivers should
    /// use [`TransferBatch::create`].
    pub fn new(endpoint: &EndpointRef) -> TransferBatch {
        TransferBatch {
            descriptor: *endpoint.descriptor(),
            state: BatchState::Created,
            toggle_reset: ToggleReset::for_transfer_type(endpoint.transfer_type()),
            setup: [0; SETUP_PACKET_SIZE],
            buffer: Vec::new(),
            requested_len: 0,
            status: Ok(()),
            actual_len: 0,
            on_complete: None,
            backend_data: None,
            endpoint: Some(endpoint.add_ref()),
        }
    }

    /// Create a batch on `endpoint`, letting the endpoint's bus provide a
    /// specialized batch if it wants to.
    pub fn create(endpoint: &EndpointRef) -> Result<TransferBatch, Error> {
        let bus = endpoint.bus();
        let batch = match bus.batch_create(endpoint) {
            Some(batch) => batch?,
            None => TransferBatch::new(endpoint),
        };
        trace!("Batch {batch} created on {}", bus.name());
        Ok(batch)
    }

    /// The endpoint this batch targets.
    ///
    /// `None` inside [`Bus::batch_destroy`][crate::Bus::batch_destroy], which
    /// runs after the batch released its reference; use
    /// [`descriptor`][TransferBatch::descriptor] there.
    pub fn endpoint(&self) -> Option<&EndpointRef> {
        self.endpoint.as_ref()
    }

    /// Description of the endpoint, as it was when the batch was created.
    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    pub fn target(&self) -> Target {
        self.descriptor.target
    }

    pub fn direction(&self) -> Direction {
        self.descriptor.target.direction
    }

    pub fn transfer_type(&self) -> TransferType {
        self.descriptor.transfer_type
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn toggle_reset(&self) -> ToggleReset {
        self.toggle_reset
    }

    /// Override the toggle reset policy chosen at creation.
    pub fn set_toggle_reset(&mut self, mode: ToggleReset) {
        self.toggle_reset = mode;
    }

    /// SETUP stage of a control transfer.
    pub fn setup(&self) -> &[u8; SETUP_PACKET_SIZE] {
        &self.setup
    }

    pub fn set_setup(&mut self, setup: [u8; SETUP_PACKET_SIZE]) {
        debug_assert_eq!(self.transfer_type(), TransferType::Control);
        self.setup = setup;
    }

    /// Use `data` as the buffer of an OUT transfer. All of it will be sent.
    pub fn set_buffer(&mut self, data: Vec<u8>) {
        self.requested_len = data.len();
        self.buffer = data;
    }

    /// Allocate a zeroed buffer of `len` bytes for an IN transfer.
    pub fn alloc_buffer(&mut self, len: usize) -> Result<(), Error> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len).map_err(|_| {
            Error::new(ErrorKind::OutOfMemory, "failed to allocate batch buffer").log_error()
        })?;
        buffer.resize(len, 0);
        self.buffer = buffer;
        self.requested_len = len;
        Ok(())
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn requested_len(&self) -> usize {
        self.requested_len
    }

    pub fn status(&self) -> Result<(), TransferError> {
        self.status
    }

    pub fn actual_len(&self) -> usize {
        self.actual_len
    }

    /// Record the outcome reported by the hardware, prior to
    /// [`finish`][TransferBatch::finish].
    pub fn complete(&mut self, status: Result<(), TransferError>, actual_len: usize) {
        self.status = status;
        self.actual_len = actual_len;
    }

    /// Set the handler invoked when the batch finishes.
    ///
    /// Its return value is only logged: the batch is destroyed whatever the
    /// handler reports.
    pub fn set_on_complete(
        &mut self,
        f: impl FnOnce(Completion) -> Result<(), Error> + Send + 'static,
    ) {
        self.on_complete = Some(Box::new(f));
    }

    /// Deliver the completion to `queue` instead of a handler.
    pub fn set_completion_queue(&mut self, queue: &CompletionQueue) {
        let queue = queue.clone();
        self.set_on_complete(move |c| {
            queue.push(c);
            Ok(())
        });
    }

    /// Attach backend-private data.
    pub fn set_backend_data<T: Any + Send>(&mut self, data: T) {
        self.backend_data = Some(Box::new(data));
    }

    pub fn backend_data<T: Any + Send>(&self) -> Option<&T> {
        self.backend_data.as_ref()?.downcast_ref()
    }

    pub fn backend_data_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.backend_data.as_mut()?.downcast_mut()
    }

    /// Detach the backend-private data, typically from `batch_destroy`.
    pub fn take_backend_data<T: Any + Send>(&mut self) -> Option<Box<T>> {
        match self.backend_data.take()?.downcast() {
            Ok(data) => Some(data),
            Err(other) => {
                self.backend_data = Some(other);
                None
            }
        }
    }

    /// Record that the batch was handed to the backend.
    pub fn mark_scheduled(&mut self) {
        assert_eq!(
            self.state,
            BatchState::Created,
            "batch {self} scheduled twice"
        );
        self.state = BatchState::Scheduled;
    }

    /// Resynchronize data toggles if the batch failed.
    ///
    /// Does nothing for successful batches or when the policy is
    /// [`ToggleReset::None`]. A bus without toggle reset support yields
    /// [`ErrorKind::Unsupported`].
    pub fn reset_toggle(&self) -> Result<(), Error> {
        if self.status.is_ok() || self.toggle_reset == ToggleReset::None {
            return Ok(());
        }

        debug!(
            "Batch {self} resets {}",
            match self.toggle_reset {
                ToggleReset::All => "all EPs toggle",
                _ => "EP toggle",
            }
        );

        let endpoint = self
            .endpoint
            .as_ref()
            .expect("batch should have an endpoint until destroyed");
        match endpoint.bus().reset_toggle(self.target(), self.toggle_reset) {
            Some(result) => result,
            None => Err(Error::new(
                ErrorKind::Unsupported,
                "bus does not support toggle reset",
            )),
        }
    }

    /// Finish a batch that was executed: reset toggles if it failed, invoke
    /// the completion handler, and destroy it.
    pub fn finish(mut self) {
        debug!("Batch {self} finishing");

        if let Err(e) = self.reset_toggle() {
            warn!("Batch {self} failed to reset toggle: {e}");
        }

        if let Some(on_complete) = self.on_complete.take() {
            let completion = Completion {
                target: self.target(),
                status: self.status,
                actual_len: self.actual_len,
                data: std::mem::take(&mut self.buffer),
            };
            if let Err(e) = on_complete(completion) {
                warn!("Batch {self} failed to complete: {e}");
            }
        }

        self.release();
    }

    /// Finish a batch as cancelled.
    ///
    /// The status is overwritten with [`TransferError::Cancelled`] and the
    /// batch goes through [`finish`][TransferBatch::finish]. Backends with
    /// asynchronous cancellation must call this only once the hardware has
    /// let go of the batch.
    pub fn abort(mut self) {
        self.status = Err(TransferError::Cancelled);
        self.finish();
    }

    /// Destroy the batch without invoking its completion handler.
    pub fn destroy(mut self) {
        self.release();
    }

    /// Release the endpoint reference and let the bus tear down its part.
    /// Safe to call more than once; only the first call does anything.
    fn release(&mut self) {
        let Some(endpoint) = self.endpoint.take() else {
            return;
        };

        let bus = endpoint.bus().clone();
        endpoint.del_ref();

        match bus.batch_destroy(self) {
            Some(()) => trace!("Batch {self} destroyed"),
            None => trace!("Batch {self} disposed"),
        }
    }
}

impl Drop for TransferBatch {
    fn drop(&mut self) {
        self.release();
    }
}

impl Display for TransferBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {:?}] {}/{}B ",
            self.descriptor.target,
            self.descriptor.transfer_type,
            self.actual_len,
            self.requested_len
        )?;
        match self.status {
            Ok(()) => write!(f, "ok"),
            Err(e) => write!(f, "{e}"),
        }
    }
}

impl Debug for TransferBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBatch")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state)
            .field("toggle_reset", &self.toggle_reset)
            .field("requested_len", &self.requested_len)
            .field("status", &self.status)
            .field("actual_len", &self.actual_len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{Bus, EndpointDescriptor, EndpointTable};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Create(Target),
        ResetToggle(Target, ToggleReset),
        Callback(Result<(), TransferError>, usize),
        Destroy(Target),
        EndpointDestroy(Target),
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    /// Bus that provides every operation and records the calls.
    struct RecordingBus {
        log: Log,
        table: EndpointTable,
        fail_reset: bool,
    }

    /// Descriptor chain a real controller would allocate per batch.
    struct TdChain {
        tds: usize,
    }

    impl Bus for RecordingBus {
        fn name(&self) -> &str {
            "recording"
        }

        fn batch_create(&self, endpoint: &EndpointRef) -> Option<Result<TransferBatch, Error>> {
            self.log.lock().unwrap().push(Event::Create(endpoint.target()));
            let mut batch = TransferBatch::new(endpoint);
            batch.set_backend_data(TdChain { tds: 2 });
            Some(Ok(batch))
        }

        fn batch_destroy(&self, batch: &mut TransferBatch) -> Option<()> {
            let tds = batch.take_backend_data::<TdChain>().expect("batch from batch_create");
            assert_eq!(tds.tds, 2);
            self.log.lock().unwrap().push(Event::Destroy(batch.target()));
            Some(())
        }

        fn reset_toggle(&self, target: Target, mode: ToggleReset) -> Option<Result<(), Error>> {
            self.log.lock().unwrap().push(Event::ResetToggle(target, mode));
            if self.fail_reset {
                return Some(Err(Error::backend(ErrorKind::Other, "controller not responding")));
            }
            self.table.reset_toggle(target, mode);
            Some(Ok(()))
        }

        fn endpoint_destroy(&self, endpoint: &crate::Endpoint) -> Option<()> {
            self.log
                .lock()
                .unwrap()
                .push(Event::EndpointDestroy(endpoint.target()));
            Some(())
        }
    }

    /// Bus that provides nothing.
    struct BareBus;
    impl Bus for BareBus {}

    /// Bus whose `batch_create` fails.
    struct ExhaustedBus;
    impl Bus for ExhaustedBus {
        fn batch_create(&self, _: &EndpointRef) -> Option<Result<TransferBatch, Error>> {
            Some(Err(Error::backend(ErrorKind::OutOfMemory, "descriptor pool exhausted")))
        }
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn recording_bus(fail_reset: bool) -> (Arc<RecordingBus>, Log) {
        let log = Log::default();
        let bus = Arc::new(RecordingBus {
            log: log.clone(),
            table: EndpointTable::new(),
            fail_reset,
        });
        (bus, log)
    }

    fn bulk_in(bus: Arc<dyn Bus>) -> EndpointRef {
        EndpointRef::new(
            bus,
            EndpointDescriptor {
                target: Target::new(3, 1, Direction::In),
                transfer_type: TransferType::Bulk,
                max_packet_size: 64,
            },
        )
    }

    fn recording_callback(log: &Log) -> impl FnOnce(Completion) -> Result<(), Error> + Send {
        let log = log.clone();
        move |c| {
            log.lock()
                .unwrap()
                .push(Event::Callback(c.status, c.actual_len));
            Ok(())
        }
    }

    #[test]
    fn finish_success() {
        init_logging();
        let (bus, log) = recording_bus(false);
        let ep = bulk_in(bus.clone());
        assert!(!ep.toggle());

        let mut batch = TransferBatch::create(&ep).unwrap();
        assert_eq!(ep.ref_count(), 2);
        batch.alloc_buffer(64).unwrap();
        batch.set_on_complete(recording_callback(&log));
        batch.mark_scheduled();

        batch.buffer_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        batch.complete(Ok(()), 64);
        batch.finish();

        assert_eq!(ep.ref_count(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Event::Create(Target::new(3, 1, Direction::In)),
                Event::Callback(Ok(()), 64),
                Event::Destroy(Target::new(3, 1, Direction::In)),
            ]
        );
    }

    #[test]
    fn completion_carries_data() {
        let ep = bulk_in(Arc::new(BareBus));
        let received = Arc::new(Mutex::new(None));

        let mut batch = TransferBatch::create(&ep).unwrap();
        batch.alloc_buffer(8).unwrap();
        let r = received.clone();
        batch.set_on_complete(move |c| {
            *r.lock().unwrap() = Some(c);
            Ok(())
        });
        batch.buffer_mut()[..3].copy_from_slice(b"abc");
        batch.complete(Ok(()), 3);
        batch.finish();

        let c = received.lock().unwrap().take().unwrap();
        assert_eq!(c.target, Target::new(3, 1, Direction::In));
        assert_eq!(&c.data[..c.actual_len], b"abc");
    }

    #[test]
    fn abort_reports_cancelled() {
        init_logging();
        let (bus, log) = recording_bus(false);
        let ep = bulk_in(bus.clone());

        let mut batch = TransferBatch::create(&ep).unwrap();
        batch.set_toggle_reset(ToggleReset::None);
        batch.set_on_complete(recording_callback(&log));
        batch.mark_scheduled();
        batch.abort();

        assert_eq!(ep.ref_count(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Event::Create(Target::new(3, 1, Direction::In)),
                Event::Callback(Err(TransferError::Cancelled), 0),
                Event::Destroy(Target::new(3, 1, Direction::In)),
            ]
        );
    }

    #[test]
    fn reset_all_before_callback() {
        init_logging();
        let (bus, log) = recording_bus(false);
        let control = EndpointRef::new(bus.clone(), EndpointDescriptor::default_control(3, 8));
        let bulk = bulk_in(bus.clone());
        bus.table.register(control.add_ref()).unwrap();
        bus.table.register(bulk.add_ref()).unwrap();
        control.set_toggle(true);
        bulk.set_toggle(true);

        let mut batch = TransferBatch::create(&control).unwrap();
        assert_eq!(batch.toggle_reset(), ToggleReset::All);

        // Resubmission from the callback sees the resynchronized toggles.
        let l = log.clone();
        let b = bulk.add_ref();
        batch.set_on_complete(move |c| {
            assert!(!b.toggle());
            l.lock().unwrap().push(Event::Callback(c.status, c.actual_len));
            Ok(())
        });
        batch.mark_scheduled();
        batch.complete(Err(TransferError::Stall), 8);
        batch.finish();

        assert!(!control.toggle());
        assert!(!bulk.toggle());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Event::Create(Target::new(3, 0, Direction::Both)),
                Event::ResetToggle(Target::new(3, 0, Direction::Both), ToggleReset::All),
                Event::Callback(Err(TransferError::Stall), 8),
                Event::Destroy(Target::new(3, 0, Direction::Both)),
            ]
        );
    }

    #[test]
    fn no_reset_on_success_or_none() {
        let (bus, log) = recording_bus(false);
        let ep = bulk_in(bus.clone());

        let mut batch = TransferBatch::create(&ep).unwrap();
        batch.complete(Ok(()), 0);
        assert!(batch.reset_toggle().is_ok());

        batch.set_toggle_reset(ToggleReset::None);
        batch.complete(Err(TransferError::Fault), 0);
        assert!(batch.reset_toggle().is_ok());
        batch.destroy();

        assert!(!log
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, Event::ResetToggle(..))));
    }

    #[test]
    fn failed_reset_still_completes() {
        init_logging();
        let (bus, log) = recording_bus(true);
        let ep = bulk_in(bus.clone());

        let mut batch = TransferBatch::create(&ep).unwrap();
        batch.set_on_complete(recording_callback(&log));
        batch.complete(Err(TransferError::Fault), 12);
        batch.finish();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Event::Create(Target::new(3, 1, Direction::In)),
                Event::ResetToggle(Target::new(3, 1, Direction::In), ToggleReset::Endpoint),
                Event::Callback(Err(TransferError::Fault), 12),
                Event::Destroy(Target::new(3, 1, Direction::In)),
            ]
        );
        assert_eq!(ep.ref_count(), 1);
    }

    #[test]
    fn bare_bus_fallbacks() {
        init_logging();
        let ep = bulk_in(Arc::new(BareBus));
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut batch = TransferBatch::create(&ep).unwrap();
        assert_eq!(ep.ref_count(), 2);
        batch.complete(Err(TransferError::Stall), 5);
        assert_eq!(
            batch.reset_toggle().unwrap_err().kind(),
            ErrorKind::Unsupported
        );

        let c = calls.clone();
        batch.set_on_complete(move |completion| {
            c.lock().unwrap().push((completion.status, completion.actual_len));
            Ok(())
        });
        batch.finish();

        assert_eq!(*calls.lock().unwrap(), vec![(Err(TransferError::Stall), 5)]);
        assert_eq!(ep.ref_count(), 1);
    }

    #[test]
    fn destroy_skips_callback() {
        let (bus, log) = recording_bus(false);
        let ep = bulk_in(bus.clone());

        let mut batch = TransferBatch::create(&ep).unwrap();
        batch.set_on_complete(recording_callback(&log));
        batch.destroy();

        assert_eq!(ep.ref_count(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Event::Create(Target::new(3, 1, Direction::In)),
                Event::Destroy(Target::new(3, 1, Direction::In)),
            ]
        );
    }

    #[test]
    fn drop_goes_through_destroy() {
        let (bus, log) = recording_bus(false);
        let ep = bulk_in(bus.clone());
        {
            let mut batch = TransferBatch::create(&ep).unwrap();
            batch.set_on_complete(recording_callback(&log));
        }
        assert_eq!(ep.ref_count(), 1);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn callback_error_does_not_change_disposition() {
        init_logging();
        let (bus, log) = recording_bus(false);
        let ep = bulk_in(bus.clone());

        let mut batch = TransferBatch::create(&ep).unwrap();
        batch.set_on_complete(|_| Err(Error::new(ErrorKind::Other, "driver gone")));
        batch.complete(Ok(()), 0);
        batch.finish();

        assert_eq!(ep.ref_count(), 1);
        assert_eq!(log.lock().unwrap().last(), Some(&Event::Destroy(Target::new(3, 1, Direction::In))));
    }

    #[test]
    fn endpoint_outlives_table_while_batch_in_flight() {
        let (bus, log) = recording_bus(false);
        bus.table.register(bulk_in(bus.clone())).unwrap();

        let ep = bus.table.find(Target::new(3, 1, Direction::In)).unwrap();
        let batch = TransferBatch::create(&ep).unwrap();
        drop(ep);
        assert_eq!(bus.table.remove_device(3).len(), 1);
        assert!(!log
            .lock()
            .unwrap()
            .contains(&Event::EndpointDestroy(Target::new(3, 1, Direction::In))));

        batch.abort();
        assert_eq!(
            log.lock().unwrap()[1..],
            [
                Event::ResetToggle(Target::new(3, 1, Direction::In), ToggleReset::Endpoint),
                Event::EndpointDestroy(Target::new(3, 1, Direction::In)),
                Event::Destroy(Target::new(3, 1, Direction::In)),
            ]
        );
    }

    #[test]
    fn failed_reset_is_reported() {
        let (bus, _log) = recording_bus(true);
        let ep = bulk_in(bus.clone());
        let mut batch = TransferBatch::create(&ep).unwrap();
        batch.complete(Err(TransferError::Fault), 0);
        assert_eq!(batch.reset_toggle().unwrap_err().kind(), ErrorKind::Other);
    }

    #[test]
    fn create_failure_leaves_no_reference() {
        let ep = bulk_in(Arc::new(ExhaustedBus));
        let err = TransferBatch::create(&ep).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        assert_eq!(ep.ref_count(), 1);
    }

    #[test]
    fn toggle_reset_defaults() {
        assert_eq!(
            ToggleReset::for_transfer_type(TransferType::Control),
            ToggleReset::All
        );
        assert_eq!(
            ToggleReset::for_transfer_type(TransferType::Interrupt),
            ToggleReset::Endpoint
        );
        assert_eq!(
            ToggleReset::for_transfer_type(TransferType::Isochronous),
            ToggleReset::None
        );
    }

    #[test]
    #[should_panic(expected = "scheduled twice")]
    fn schedule_twice_panics() {
        let ep = bulk_in(Arc::new(BareBus));
        let mut batch = TransferBatch::create(&ep).unwrap();
        batch.mark_scheduled();
        batch.mark_scheduled();
    }

    #[test]
    fn display_summary() {
        let ep = bulk_in(Arc::new(BareBus));
        let mut batch = TransferBatch::create(&ep).unwrap();
        batch.alloc_buffer(64).unwrap();
        batch.complete(Err(TransferError::Stall), 10);
        assert_eq!(batch.to_string(), "[3:1 In Bulk] 10/64B endpoint stalled");
    }

    fn bulk(bus: Arc<dyn Bus>, direction: Direction) -> EndpointRef {
        EndpointRef::new(
            bus,
            EndpointDescriptor {
                target: Target::new(3, 1, direction),
                transfer_type: TransferType::Bulk,
                max_packet_size: 512,
            },
        )
    }

    #[test]
    fn endpoint_reset_spares_opposite_direction() {
        init_logging();
        let (bus, log) = recording_bus(false);
        let ep_in = bulk(bus.clone(), Direction::In);
        let ep_out = bulk(bus.clone(), Direction::Out);
        bus.table.register(ep_in.add_ref()).unwrap();
        bus.table.register(ep_out.add_ref()).unwrap();
        ep_in.set_toggle(true);
        ep_out.set_toggle(true);

        let mut batch = TransferBatch::create(&ep_in).unwrap();
        assert_eq!(batch.toggle_reset(), ToggleReset::Endpoint);
        batch.mark_scheduled();
        batch.complete(Err(TransferError::Stall), 0);
        batch.finish();

        assert!(!ep_in.toggle());
        assert!(ep_out.toggle());
        assert!(log.lock().unwrap().contains(&Event::ResetToggle(
            Target::new(3, 1, Direction::In),
            ToggleReset::Endpoint
        )));

        // A device-wide reset reaches both directions.
        ep_in.set_toggle(true);
        let mut batch = TransferBatch::create(&ep_out).unwrap();
        batch.set_toggle_reset(ToggleReset::All);
        batch.complete(Err(TransferError::Fault), 0);
        batch.finish();

        assert!(!ep_in.toggle());
        assert!(!ep_out.toggle());

        drop(bus.table.remove_device(3));
    }

    /// Bus whose `batch_destroy` inspects the endpoint description.
    struct DescriptorBus {
        seen: Mutex<Vec<(bool, u16, TransferType)>>,
    }

    impl Bus for DescriptorBus {
        fn batch_destroy(&self, batch: &mut TransferBatch) -> Option<()> {
            self.seen.lock().unwrap().push((
                batch.endpoint().is_some(),
                batch.descriptor().max_packet_size,
                batch.transfer_type(),
            ));
            Some(())
        }
    }

    #[test]
    fn batch_destroy_reads_descriptor() {
        let bus = Arc::new(DescriptorBus {
            seen: Mutex::new(Vec::new()),
        });
        let ep = bulk(bus.clone(), Direction::Out);

        let batch = TransferBatch::create(&ep).unwrap();
        assert!(batch
            .endpoint()
            .is_some_and(|e| EndpointRef::ptr_eq(e, &ep)));
        batch.destroy();

        // Through `Drop` as well.
        drop(TransferBatch::create(&ep).unwrap());

        assert_eq!(
            *bus.seen.lock().unwrap(),
            vec![
                (false, 512, TransferType::Bulk),
                (false, 512, TransferType::Bulk),
            ]
        );
        assert_eq!(ep.ref_count(), 1);
    }

    #[test]
    fn control_setup_stage() {
        let (bus, log) = recording_bus(false);
        let ep = EndpointRef::new(bus.clone(), EndpointDescriptor::default_control(3, 64));

        // GET_DESCRIPTOR(DEVICE), 18 bytes
        let setup = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00];
        let mut batch = TransferBatch::create(&ep).unwrap();
        assert_eq!(batch.setup(), &[0; SETUP_PACKET_SIZE]);
        batch.set_setup(setup);
        batch.alloc_buffer(18).unwrap();
        assert_eq!(batch.setup(), &setup);
        assert_eq!(batch.direction(), Direction::Both);
        assert_eq!(batch.requested_len(), 18);

        batch.set_on_complete(recording_callback(&log));
        batch.complete(Ok(()), 18);
        batch.finish();

        assert_eq!(
            log.lock().unwrap()[1],
            Event::Callback(Ok(()), 18)
        );
    }
}
