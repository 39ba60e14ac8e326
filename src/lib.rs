pub mod aggregate;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod grade;
pub mod models;
pub mod report;
pub mod session;
