pub mod config;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod roles;
pub mod session;
pub mod table;
pub mod terminology;
pub mod textutil;
pub mod tokenize;
