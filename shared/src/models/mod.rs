//! Domain models for harvest estimation records

mod harvest;
mod reference;

pub use harvest::*;
pub use reference::*;
