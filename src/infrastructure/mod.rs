// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod csv_export;
pub mod json_source;
pub mod notifiers;
pub mod subscriber_hub;
