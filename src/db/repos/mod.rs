pub mod cursor;
mod intake;
mod jobs;

pub use cursor::*;
pub use intake::*;
pub use jobs::*;
