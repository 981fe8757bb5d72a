pub mod job;
pub mod style;

pub use job::*;
pub use style::*;
