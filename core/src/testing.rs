pub mod catalog;
pub mod outcome;
pub mod process;
pub mod runner;

pub use catalog::*;
pub use outcome::*;
pub use process::*;
pub use runner::*;
