// Application layer - Use cases and the traits external adapters implement
pub mod alert_state;
pub mod broadcaster;
pub mod comparator;
pub mod deviation_scorer;
pub mod history;
pub mod notifier;
pub mod novelty_detector;
pub mod reference_model;
pub mod sample_source;
pub mod similarity_scorer;
pub mod stream_orchestrator;
