// Library for tests to access modules

pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod history_repo;
pub mod maintenance;
pub mod models;
pub mod routes;
pub mod stream;
pub mod sysinfo_repo;
pub mod version;
