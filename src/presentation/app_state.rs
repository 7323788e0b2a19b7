// Application state for HTTP handlers
use std::sync::Arc;

use crate::application::alert_state::AlertDispatcher;
use crate::application::comparator::Comparator;
use crate::application::history::HistoryStore;
use crate::infrastructure::subscriber_hub::SubscriberHub;

#[derive(Clone)]
pub struct AppState {
    pub comparator: Arc<Comparator>,
    pub history: HistoryStore,
    pub hub: SubscriberHub,
    pub alerts: AlertDispatcher,
}
