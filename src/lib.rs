pub mod cleanup;
pub mod config;
pub mod db;
pub mod models;
pub mod observability;
