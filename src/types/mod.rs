pub mod base;
pub mod bindings;

pub use base::*;
pub use bindings::*;
