//! Redirect engine: the relay's state machine.
//!
//! `Idle --start(mode)--> Active(mode) --stop()--> Idle`
//!
//! - start/stop are idempotent and guarded by one atomic flag
//! - outbound: host chat tap -> capture policy -> envelope -> background send
//! - inbound: listener task -> decode -> loopback guard -> queue
//! - host tick: queue drain -> display or command re-emit

mod redirect;
mod state;

pub use redirect::{Delivery, EngineOptions, RedirectEngine};
pub use state::{EngineState, Mode, Status};
