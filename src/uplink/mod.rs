//! # Uplink Receive Engine
//!
//! The unicast side of the transport: fetching sparse, out-of-order uplink
//! frames from the message store and reassembling them into whole DMP
//! responses.

pub mod reassembly;
pub mod store;

pub use reassembly::UplinkReassembler;
pub use store::{MessageStore, TasMessageStore, UplinkFrame};
