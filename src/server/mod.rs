pub mod command_dispatcher;
pub mod config;
pub mod core_services;
