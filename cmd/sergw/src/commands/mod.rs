//! A thin module wrapper that contains all the different files that each
//! handle one command.

mod listen;
mod ports;

pub use listen::*;
pub use ports::*;
