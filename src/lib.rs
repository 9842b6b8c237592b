pub mod compile;
pub mod cst;
pub mod encode;
pub mod errors;
pub mod lex;
pub mod mir;
pub mod parse;
pub mod types;

pub use compile::{Compiler, CompilerConfig};
pub use errors::{CompileError, CompileResult, ErrorKind};
