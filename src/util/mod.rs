pub mod size_unit;
pub mod write_lock_arc;

pub use size_unit::*;
pub use write_lock_arc::*;
