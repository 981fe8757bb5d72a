pub mod history;
pub mod lifecycle;

pub use history::*;
pub use lifecycle::*;
