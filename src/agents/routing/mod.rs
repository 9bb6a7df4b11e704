pub mod assignment;
pub mod coordination;
pub mod decisions;
pub mod filters;

pub use assignment::*;
pub use coordination::*;
pub use decisions::*;
pub use filters::*;
