//! Assembling whole method bodies
//!
//! [`MethodAssembler`] takes instructions and labels in order, simulating the frame as it goes,
//! then lays out and encodes the method. [`assemble_listing`] does the same for every method of
//! a textual listing.

mod errors;
mod listing;
mod method;
mod settings;

pub use errors::*;
pub use listing::*;
pub use method::*;
pub use settings::*;
