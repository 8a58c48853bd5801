//! Host-controller independent core of a USB host stack.
//!
//! `usbhost` provides the pieces every host controller driver shares:
//!
//! * [`EndpointRef`] is a counted handle to an [`Endpoint`], shared between
//!   the driver's [`EndpointTable`] and every [`TransferBatch`] in flight on
//!   it. An endpoint is freed only once the table and all batches have let go.
//! * [`Bus`] is implemented by each controller backend (OHCI, UHCI, ...).
//!   Every operation is optional and falls back to generic behavior.
//! * [`TransferBatch`] carries one transaction from creation to completion.
//!   It ends through exactly one of `finish`, `abort` or `destroy`, and its
//!   completion handler runs at most once.
//!
//! When a batch fails, the data toggles selected by its [`ToggleReset`] policy
//! are resynchronized through the bus *before* the completion handler runs, so
//! a resubmission from the handler starts from a consistent toggle state.
//!
//! ### Lifecycle
//!
//! ```
//! use std::sync::Arc;
//! use usbhost::{Bus, EndpointDescriptor, EndpointRef, EndpointTable, TransferBatch};
//!
//! struct MyController;
//! impl Bus for MyController {}
//!
//! let table = EndpointTable::new();
//! let ep = EndpointRef::new(Arc::new(MyController), EndpointDescriptor::default_control(1, 64));
//! table.register(ep.add_ref()).unwrap();
//!
//! let mut batch = TransferBatch::create(&ep).unwrap();
//! batch.alloc_buffer(18).unwrap();
//! batch.set_on_complete(|completion| {
//!     println!("{:?}: {} bytes", completion.status, completion.actual_len);
//!     Ok(())
//! });
//! batch.mark_scheduled();
//!
//! // ... later, from the controller's completion path:
//! batch.complete(Ok(()), 18);
//! batch.finish();
//!
//! assert_eq!(ep.ref_count(), 2);
//! ```
//!
//! ### Logging
//!
//! Lifecycle steps are logged through the [`log`](https://docs.rs/log) crate
//! at `debug` and `trace` level. Failures that do not affect a batch's
//! outcome, such as a failed toggle reset or a completion handler returning
//! an error, are logged at `warn`.

mod error;
pub use error::{Error, ErrorKind, TransferError};

mod endpoint;
pub use endpoint::{Direction, Endpoint, EndpointDescriptor, EndpointRef, Target, TransferType};

mod table;
pub use table::EndpointTable;

mod bus;
pub use bus::Bus;

mod batch;
pub use batch::{BatchState, Completion, ToggleReset, TransferBatch, SETUP_PACKET_SIZE};

mod completion;
pub use completion::CompletionQueue;
