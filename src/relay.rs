//! The relay core: route one inbound event to its target set of connections.
//!
//! Fan-out delivery itself lives behind the [`Fanout`] trait so the routing
//! logic stays transport-agnostic; the TCP server implements it with a
//! broadcast channel, and tests implement it with an in-memory recorder.

use crate::event::{Envelope, Scope};

/// A unique ID assigned to each connected client.
pub type ClientId = u64;

/// The two fan-out primitives the transport layer provides.
pub trait Fanout {
    /// Deliver to every connection except `origin`.
    fn send_to_others(&self, origin: ClientId, envelope: Envelope);

    /// Deliver to every connection, `origin` included.
    fn send_to_all(&self, envelope: Envelope);
}

/// Forward one inbound event from `origin` to its target set.
///
/// The payload is forwarded unchanged; no acknowledgement is produced and
/// nothing is remembered between calls. Each invocation issues exactly one
/// fan-out, so duplicate events produce duplicate deliveries.
pub fn dispatch<F: Fanout>(fanout: &F, origin: ClientId, envelope: Envelope) {
    match envelope.scope() {
        Scope::Others => fanout.send_to_others(origin, envelope),
        Scope::All => fanout.send_to_all(envelope),
    }
}
