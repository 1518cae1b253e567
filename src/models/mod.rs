mod intake;
mod job;

pub use intake::*;
pub use job::*;
