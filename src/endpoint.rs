//! Endpoint objects shared between the driver and in-flight batches.

use std::{
    fmt::{self, Debug, Display},
    ops::Deref,
    ptr::NonNull,
    sync::{
        atomic::{fence, AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use log::trace;

use crate::Bus;

/// Endpoint type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransferType {
    /// Control endpoint.
    Control = 0,

    /// Isochronous endpoint.
    Isochronous = 1,

    /// Bulk endpoint.
    Bulk = 2,

    /// Interrupt endpoint.
    Interrupt = 3,
}

/// Direction of data flow on an endpoint, from the host's point of view.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to device.
    Out,

    /// Device to host.
    In,

    /// Both directions, used by control endpoints.
    Both,
}

impl Direction {
    /// Get the direction from the MSB of a USB endpoint address.
    pub fn from_address(addr: u8) -> Direction {
        match addr & 0x80 {
            0 => Direction::Out,
            _ => Direction::In,
        }
    }
}

/// Address of one endpoint: device address, endpoint number and direction.
///
/// The IN and OUT endpoints sharing a number are distinct targets with their
/// own data toggles. All endpoints of one device share the same `address`;
/// this is the scope of a [`ToggleReset::All`][crate::ToggleReset::All]
/// resynchronization.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// USB device address (0..=127).
    pub address: u8,

    /// Endpoint number (0..=15).
    pub endpoint: u8,

    pub direction: Direction,
}

impl Target {
    pub const fn new(address: u8, endpoint: u8, direction: Direction) -> Target {
        Target {
            address,
            endpoint,
            direction,
        }
    }

    /// Target from a device address and a USB endpoint address such as
    /// `0x81`.
    pub fn from_endpoint_address(address: u8, endpoint_address: u8) -> Target {
        Target::new(
            address,
            endpoint_address & 0x0f,
            Direction::from_address(endpoint_address),
        )
    }

    /// Whether `other` names the same endpoint. A bidirectional control
    /// endpoint matches either direction.
    pub fn matches(&self, other: &Target) -> bool {
        self.address == other.address
            && self.endpoint == other.endpoint
            && overlaps(self.direction, other.direction)
    }

    /// Whether `other` belongs to the same device.
    pub fn same_device(&self, other: &Target) -> bool {
        self.address == other.address
    }
}

fn overlaps(a: Direction, b: Direction) -> bool {
    a == b || a == Direction::Both || b == Direction::Both
}

impl Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {:?}", self.address, self.endpoint, self.direction)
    }
}

/// Static description of an endpoint, fixed when the device's interface is
/// configured.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub target: Target,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    /// Describe the default control pipe of the device at `address`.
    pub fn default_control(address: u8, max_packet_size: u16) -> EndpointDescriptor {
        EndpointDescriptor {
            target: Target::new(address, 0, Direction::Both),
            transfer_type: TransferType::Control,
            max_packet_size,
        }
    }
}

/// A USB endpoint known to the host controller driver.
///
/// Only reachable through an [`EndpointRef`].
pub struct Endpoint {
    descriptor: EndpointDescriptor,

    /// Host-side data toggle, `false` for DATA0.
    toggle: AtomicBool,

    /// Number of live `EndpointRef`s.
    refs: AtomicUsize,

    bus: Arc<dyn Bus>,
}

impl Endpoint {
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

    pub fn max_packet_size(&self) -> u16 {
        self.descriptor.max_packet_size
    }

    /// The bus this endpoint was created on.
    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// Current data toggle; `false` is DATA0, `true` is DATA1.
    ///
    /// Writers must be serialized by the backend; the core only assumes a
    /// single writer at the moment of a toggle reset.
    pub fn toggle(&self) -> bool {
        self.toggle.load(Ordering::Acquire)
    }

    pub fn set_toggle(&self, toggle: bool) {
        self.toggle.store(toggle, Ordering::Release);
    }

    /// Flip the toggle after a successfully acknowledged packet, returning the
    /// new value.
    pub fn advance_toggle(&self) -> bool {
        !self.toggle.fetch_xor(true, Ordering::AcqRel)
    }

    /// Number of references currently held on this endpoint.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("descriptor", &self.descriptor)
            .field("toggle", &self.toggle())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Counted reference to an [`Endpoint`].
///
/// Cloning takes a reference ([`add_ref`][EndpointRef::add_ref]) and dropping
/// releases one ([`del_ref`][EndpointRef::del_ref]). The endpoint is freed,
/// after giving the bus its `endpoint_destroy` hook, when the last reference
/// is released.
pub struct EndpointRef {
    ptr: NonNull<Endpoint>,
}

// SAFETY: all mutable state in `Endpoint` is atomic and `Bus: Send + Sync`
unsafe impl Send for EndpointRef {}
unsafe impl Sync for EndpointRef {}

impl EndpointRef {
    /// Create an endpoint on `bus`. The returned handle is the first
    /// reference; it is usually given to an
    /// [`EndpointTable`][crate::EndpointTable].
    pub fn new(bus: Arc<dyn Bus>, descriptor: EndpointDescriptor) -> EndpointRef {
        trace!("Creating endpoint {} on {}", descriptor.target, bus.name());
        let b = Box::new(Endpoint {
            descriptor,
            toggle: AtomicBool::new(false),
            refs: AtomicUsize::new(1),
            bus,
        });

        EndpointRef {
            ptr: Box::leak(b).into(),
        }
    }

    /// Take another reference on the endpoint.
    pub fn add_ref(&self) -> EndpointRef {
        // A new reference can only be made from an existing one, so no
        // synchronization is needed here.
        let prev = self.refs.fetch_add(1, Ordering::Relaxed);
        assert!(prev > 0, "add_ref on a released endpoint");
        EndpointRef { ptr: self.ptr }
    }

    /// Release this reference.
    pub fn del_ref(self) {
        drop(self)
    }

    /// Whether two handles name the same endpoint object.
    pub fn ptr_eq(this: &EndpointRef, other: &EndpointRef) -> bool {
        this.ptr == other.ptr
    }
}

impl Deref for EndpointRef {
    type Target = Endpoint;

    fn deref(&self) -> &Endpoint {
        // SAFETY: the endpoint lives as long as any reference exists
        unsafe { self.ptr.as_ref() }
    }
}

impl Clone for EndpointRef {
    fn clone(&self) -> Self {
        self.add_ref()
    }
}

impl Drop for EndpointRef {
    fn drop(&mut self) {
        let prev = self.refs.fetch_sub(1, Ordering::Release);
        assert!(prev > 0, "del_ref on a released endpoint");
        if prev != 1 {
            return;
        }

        // Synchronize with the release of every other reference before
        // tearing down.
        fence(Ordering::Acquire);

        // SAFETY: count reached zero, so this was the last handle
        let endpoint = unsafe { Box::from_raw(self.ptr.as_ptr()) };
        match endpoint.bus.endpoint_destroy(&endpoint) {
            Some(()) => trace!("Endpoint {} destroyed by bus", endpoint.target()),
            None => trace!("Endpoint {} disposed", endpoint.target()),
        }
    }
}

impl Debug for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&**self, f)
    }
}
