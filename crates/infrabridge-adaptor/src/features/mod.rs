pub mod backend_management;
pub mod observability;
pub mod plugin_lifecycle;
