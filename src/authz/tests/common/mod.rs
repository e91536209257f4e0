//! Shared helpers for integration tests

#![allow(dead_code)]

use gatehouse_authz::Entity;
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test harness; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Host model used as an ability scope
#[derive(Debug, Clone)]
pub struct Post {
    pub id: u64,
}

impl Entity for Post {
    const ENTITY_TYPE: &'static str = "Post";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

/// Second host model, to check type tags are not confused
#[derive(Debug, Clone)]
pub struct Comment {
    pub id: u64,
}

impl Entity for Comment {
    const ENTITY_TYPE: &'static str = "Comment";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}
