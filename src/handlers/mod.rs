pub mod health_handlers;
pub mod repository_handlers;
