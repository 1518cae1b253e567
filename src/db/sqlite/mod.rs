mod common;
mod intake;
mod jobs;

pub use intake::SqliteIntakeRepo;
pub use jobs::SqliteJobRepo;
