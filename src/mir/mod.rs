//! The instantiation engine: turns the merged templates into a concrete, typed program.

pub mod expressions;
pub mod instance;
pub mod instantiator;
pub mod resolve;
pub mod scope;

pub use instance::{FnKey, InstantiatedBody, InstantiatedClass, InstantiatedFunction, Program};
pub use instantiator::Instantiator;
