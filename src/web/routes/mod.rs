pub mod adjust_routes;
pub mod webhook_routes;
