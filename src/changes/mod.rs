pub mod collector;
pub mod json;

pub use collector::*;
pub use json::*;
