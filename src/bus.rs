//! Host controller backend interface.

use crate::{Endpoint, EndpointRef, Error, Target, ToggleReset, TransferBatch};

/// Operations a host controller backend provides to the generic framework.
///
/// One `Bus` exists per host controller instance. Every operation is optional:
/// the default implementations return `None`, meaning the backend does not
/// provide it, and the framework falls back to its generic behavior. The
/// framework asks the bus at each call site rather than remembering the
/// answer, so an implementation may decide per call.
///
/// | operation          | generic behavior when absent                 |
/// |--------------------|----------------------------------------------|
/// | `batch_create`     | plain [`TransferBatch::new`]                 |
/// | `batch_destroy`    | the batch is simply deallocated              |
/// | `reset_toggle`     | reported as [`ErrorKind::Unsupported`][crate::ErrorKind::Unsupported] |
/// | `endpoint_destroy` | the endpoint is simply deallocated           |
///
/// Implementations are called from whichever context finishes a batch,
/// which may be an interrupt handler thread.
pub trait Bus: Send + Sync {
    /// Name used in log messages.
    fn name(&self) -> &str {
        "usb"
    }

    /// Create a batch for `endpoint` with a backend-specific layout.
    ///
    /// The backend normally builds the batch with [`TransferBatch::new`],
    /// which takes the batch's endpoint reference, and attaches its own data
    /// with [`TransferBatch::set_backend_data`].
    fn batch_create(&self, endpoint: &EndpointRef) -> Option<Result<TransferBatch, Error>> {
        let _ = endpoint;
        None
    }

    /// Release backend resources attached to a batch that is being destroyed.
    ///
    /// Called after the batch's endpoint reference was released. The batch
    /// memory itself, including its buffer, is freed by the framework once
    /// this returns.
    fn batch_destroy(&self, batch: &mut TransferBatch) -> Option<()> {
        let _ = batch;
        None
    }

    /// Resynchronize data toggles after a failed transfer.
    ///
    /// `mode` is never [`ToggleReset::None`]. For [`ToggleReset::Endpoint`]
    /// only the endpoint at `target` is reset; for [`ToggleReset::All`] every
    /// endpoint of `target.address` is. Backends keeping an
    /// [`EndpointTable`][crate::EndpointTable] can use
    /// [`EndpointTable::reset_toggle`][crate::EndpointTable::reset_toggle] for
    /// the software side.
    fn reset_toggle(&self, target: Target, mode: ToggleReset) -> Option<Result<(), Error>> {
        let _ = (target, mode);
        None
    }

    /// Release backend resources of an endpoint whose last reference was
    /// dropped.
    fn endpoint_destroy(&self, endpoint: &Endpoint) -> Option<()> {
        let _ = endpoint;
        None
    }
}
