//! Repository tests shared by both backends.
//!
//! Each test is an async function over trait objects, instantiated once per
//! backend by a `sqlite_test!` or `postgres_test!` macro. The SQLite copies
//! run on every `cargo test`. The PostgreSQL copies start a container and are
//! `#[ignore]`d; run them with `cargo test -- --ignored`.
