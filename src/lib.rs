pub mod alerting;
pub mod db;
pub mod error;
pub mod links;
pub mod monitoring;
pub mod notifications;
pub mod remediation;
pub mod rules;
pub mod server;
pub mod services;
pub mod web;
