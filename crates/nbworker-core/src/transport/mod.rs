//! File-based rendezvous with the worker.
//!
//! A running worker advertises itself by writing a single JSON line to the
//! transport file. Clients wait for that file to appear and read the port,
//! PID and shared key from it.

mod descriptor;

pub use descriptor::{SharedSecret, TransportDescriptor, TransportFile};
