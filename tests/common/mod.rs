#![allow(dead_code)]

use std::sync::Arc;

use ddl_engine::config::ConfigBuilder;
use ddl_engine::{Domain, MemStore, Session};

pub fn fast_config() -> ConfigBuilder {
    ConfigBuilder::new().tick_ms(5).lease_ms(200).job_wait_timeout_ms(10_000)
}

pub async fn open(builder: ConfigBuilder) -> Arc<Domain> {
    Domain::open(MemStore::new_ref(), builder.build()).await.unwrap()
}

/// A session on a fresh store with `test` selected.
pub async fn test_session() -> Session {
    session_with(fast_config()).await
}

pub async fn session_with(builder: ConfigBuilder) -> Session {
    let domain = open(builder).await;
    let mut se = domain.new_session();
    se.use_db("test").unwrap();
    se
}
