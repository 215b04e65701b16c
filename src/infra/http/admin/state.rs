use std::sync::Arc;

use crate::application::posts::PostService;
use crate::cache::CacheState;
use crate::infra::http::HealthProbe;

#[derive(Clone)]
pub struct AdminState {
    pub posts: Arc<PostService>,
    pub cache: CacheState,
    pub health: Arc<dyn HealthProbe>,
}
