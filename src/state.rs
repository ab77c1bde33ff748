use std::sync::Arc;

use crate::auth::{AuthState, UserRegistry};
use crate::config::AppConfig;
use crate::ports::TimeProvider;
use crate::store::ContentStore;

#[derive(Clone)]
pub(crate) struct AppState<T> {
    pub(crate) config: AppConfig,
    pub(crate) auth: Option<AuthState>,
    pub(crate) users: Arc<UserRegistry>,
    pub(crate) store: ContentStore,
    pub(crate) time: T,
}

impl<T: TimeProvider> AppState<T> {
    pub(crate) fn reference_day(&self) -> time::Date {
        crate::clock::reference_day(&self.time, self.config.reference_zone, self.config.cutoff_hour)
    }
}
