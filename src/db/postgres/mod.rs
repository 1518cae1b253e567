mod intake;
mod jobs;

pub use intake::PostgresIntakeRepo;
pub use jobs::PostgresJobRepo;
