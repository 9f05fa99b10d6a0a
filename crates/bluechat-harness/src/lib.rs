//! BlueChat Harness
//!
//! In-memory implementation of the BlueChat radio capability set. A
//! [`VirtualRadio`] hosts any number of [`VirtualTransport`] endpoints that
//! discover and connect to each other over [`VirtualStream`] links. Tests use
//! the endpoint knobs and [`StreamProbe`]s to revoke permissions, switch the
//! adapter off, delay connects and inject stream faults.

pub mod link;
pub mod radio;

pub use link::{StreamProbe, VirtualStream, LINK_CAPACITY};
pub use radio::{VirtualListener, VirtualRadio, VirtualTransport, EVENT_CAPACITY};
