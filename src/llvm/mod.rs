pub mod ast;
pub mod callgraph;
pub mod cfg;
pub mod dataflow;
mod lexer;
mod parser;
pub mod print;
mod utils;

pub use lexer::LexerError;
pub use parser::{parse, ParseError};
