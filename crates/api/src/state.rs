use authz_core::{Config, DatabasePool, MetricsExporter, RedisCacheAdapter};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: DatabasePool,
    pub redis: RedisCacheAdapter,
    pub metrics: Arc<MetricsExporter>,
}
