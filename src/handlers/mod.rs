pub mod group_handlers;
pub mod health_handlers;
pub mod private_handlers;
