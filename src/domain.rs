//! The per-process owner of a store: schema loading, the InfoSchema cache,
//! the DDL workers and bootstrap.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::autoid::AllocatorOptions;
use crate::config::AppConfig;
use crate::ddl::stmt::{ColumnDef, CreateDatabaseStmt, CreateTableStmt, IndexDef, IndexPart};
use crate::ddl::{Ddl, DdlVars, ExecContext, SchemaSyncer};
use crate::errors::{AdminError, Result};
use crate::infoschema::{Builder, InfoCache, InfoSchema};
use crate::kv::{StoreRef, run_in_new_txn};
use crate::meta::Meta;
use crate::model::{Datum, FieldType};
use crate::session::Session;
use crate::table::{self, WriteOptions};

pub const SYSTEM_DB: &str = "mysql";
pub const TEST_DB: &str = "test";

/// Loads InfoSchema generations from the metadata store into the cache.
pub(crate) struct SchemaLoader {
    store: StoreRef,
    opts: AllocatorOptions,
    txn_retry_limit: u32,
    cache: InfoCache,
    /// Serialises reloads so each version is built once.
    reload_lock: Mutex<()>,
}

enum Loaded {
    Current,
    Incremental { base_version: i64, is: Arc<InfoSchema> },
    Full(Arc<InfoSchema>),
}

impl SchemaLoader {
    fn new(store: StoreRef, config: &AppConfig) -> Self {
        Self {
            store,
            opts: AllocatorOptions {
                step: config.autoid.step,
                txn_retry_limit: config.ddl.txn_retry_limit,
            },
            txn_retry_limit: config.ddl.txn_retry_limit,
            cache: InfoCache::new(config.infoschema.cache_capacity),
            reload_lock: Mutex::new(()),
        }
    }

    fn latest(&self) -> Arc<InfoSchema> {
        self.cache.get_latest().unwrap_or_default()
    }

    /// Bring the cache up to the store's schema version. All pending diffs
    /// are applied to one builder against the latest metadata, so only the
    /// final generation is cached; a missing diff or an empty cache forces a
    /// full load.
    fn reload(&self) -> Result<Arc<InfoSchema>> {
        let _guard = self.reload_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.cache.get_latest();
        let loaded = run_in_new_txn(&self.store, self.txn_retry_limit, |txn| {
            let mut m = Meta::new(txn);
            let target = m.get_schema_version()?;
            let Some(current) = current.clone() else {
                return Ok(Loaded::Full(Builder::new(self.store.clone(), self.opts).load_full(&mut m)?.build()));
            };
            if current.schema_meta_version() >= target {
                return Ok(Loaded::Current);
            }
            let base_version = current.schema_meta_version();
            let mut builder = Builder::new(self.store.clone(), self.opts).init_with_old(&current);
            for version in base_version + 1..=target {
                let Some(diff) = m.get_schema_diff(version)? else {
                    debug!(schema_version = version, "schema diff missing, loading full schema");
                    return Ok(Loaded::Full(Builder::new(self.store.clone(), self.opts).load_full(&mut m)?.build()));
                };
                builder.apply_diff(&mut m, &diff)?;
            }
            Ok(Loaded::Incremental {
                base_version,
                is: builder.build(),
            })
        })?;

        match loaded {
            Loaded::Current => {}
            Loaded::Incremental { base_version, is } => {
                let schema_version = is.schema_meta_version();
                self.cache.insert_catch_up(is, base_version);
                debug!(
                    schema_version,
                    diffs = schema_version - base_version,
                    "schema reloaded incrementally"
                );
            }
            Loaded::Full(is) => {
                self.cache.reset();
                info!(schema_version = is.schema_meta_version(), "schema loaded in full");
                self.cache.insert(is);
            }
        }
        Ok(self.latest())
    }
}

#[async_trait]
impl SchemaSyncer for SchemaLoader {
    async fn sync(&self, version: i64) -> Result<()> {
        let is = self.reload()?;
        if is.schema_meta_version() < version {
            warn!(
                schema_version = is.schema_meta_version(),
                required = version,
                "local schema is behind the published version"
            );
        }
        Ok(())
    }
}

pub struct Domain {
    store: StoreRef,
    config: AppConfig,
    loader: Arc<SchemaLoader>,
    ddl: Ddl,
    shutdown: watch::Sender<bool>,
    reload_task: Mutex<Option<JoinHandle<()>>>,
}

impl Domain {
    /// Load the schema, start the DDL workers and bootstrap a fresh store.
    pub async fn open(store: StoreRef, config: AppConfig) -> Result<Arc<Domain>> {
        config.validate()?;
        let loader = Arc::new(SchemaLoader::new(store.clone(), &config));
        loader.reload()?;

        let vars = Arc::new(DdlVars::from_config(&config.reorg));
        let ddl = Ddl::new(store.clone(), config.ddl.clone(), vars, loader.clone());
        ddl.start();

        let (shutdown, _) = watch::channel(false);
        let domain = Arc::new(Domain {
            store,
            config,
            loader,
            ddl,
            shutdown,
            reload_task: Mutex::new(None),
        });
        domain.bootstrap().await?;
        domain.start_reload_loop();
        info!(schema_version = domain.info_schema().schema_meta_version(), "domain opened");
        Ok(domain)
    }

    /// Periodically pick up versions published by other domains on the same store.
    fn start_reload_loop(&self) {
        let loader = self.loader.clone();
        let interval = self.config.ddl.lease();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = loader.reload() {
                            warn!(error = %e, "background schema reload failed");
                        }
                    }
                }
            }
        });
        *self.reload_task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }

    async fn bootstrap(&self) -> Result<()> {
        let bootstrapped = run_in_new_txn(&self.store, self.config.ddl.txn_retry_limit, |txn| {
            Ok(Meta::new(txn).is_bootstrapped())
        })?;
        if bootstrapped {
            return Ok(());
        }
        info!("bootstrapping a fresh store");

        let mut ctx = self.exec_context();
        self.ddl
            .create_database(&ctx, &CreateDatabaseStmt {
                if_not_exists: true,
                ..CreateDatabaseStmt::new(SYSTEM_DB)
            })
            .await?;
        ctx.is = self.info_schema();
        ctx.current_db = Some(SYSTEM_DB.to_string());

        let mut tidb = CreateTableStmt::new(
            "tidb",
            vec![
                ColumnDef::new("VARIABLE_NAME", FieldType::varchar(64)).primary_key(),
                ColumnDef::new("VARIABLE_VALUE", FieldType::varchar(1024)),
                ColumnDef::new("COMMENT", FieldType::varchar(1024)),
            ],
        );
        tidb.if_not_exists = true;
        self.ddl.create_table(&ctx, &tidb).await?;

        let mut gc_delete_range = CreateTableStmt::new(
            "gc_delete_range",
            vec![
                ColumnDef::new("job_id", FieldType::bigint()).not_null(),
                ColumnDef::new("element_id", FieldType::bigint()).not_null(),
                ColumnDef::new("start_key", FieldType::varchar(255)).not_null(),
                ColumnDef::new("end_key", FieldType::varchar(255)).not_null(),
                ColumnDef::new("ts", FieldType::bigint()).not_null(),
            ],
        );
        gc_delete_range.indexes.push(
            IndexDef::new(
                "delete_range_index",
                vec![IndexPart::column("job_id"), IndexPart::column("element_id")],
            )
            .unique(),
        );
        gc_delete_range.if_not_exists = true;
        self.ddl.create_table(&ctx, &gc_delete_range).await?;

        self.ddl
            .create_database(&ctx, &CreateDatabaseStmt {
                if_not_exists: true,
                ..CreateDatabaseStmt::new(TEST_DB)
            })
            .await?;

        let tidb = self.info_schema().table_by_name(SYSTEM_DB, "tidb")?;
        run_in_new_txn(&self.store, self.config.ddl.txn_retry_limit, |txn| {
            table::add_record(
                txn,
                &tidb,
                &[],
                vec![
                    Datum::from("bootstrapped"),
                    Datum::from("True"),
                    Datum::from("Bootstrap flag. Do not delete."),
                ],
                WriteOptions::default(),
            )?;
            Meta::new(txn).set_bootstrapped();
            Ok(())
        })?;
        info!("bootstrap finished");
        Ok(())
    }

    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ddl(&self) -> &Ddl {
        &self.ddl
    }

    pub fn vars(&self) -> &Arc<DdlVars> {
        self.ddl.vars()
    }

    /// The newest cached InfoSchema.
    pub fn info_schema(&self) -> Arc<InfoSchema> {
        self.loader.latest()
    }

    /// The newest cached InfoSchema whose version is at most `version`.
    pub fn info_schema_as_of(&self, version: i64) -> Result<Arc<InfoSchema>> {
        self.loader
            .cache
            .get_by_version(version)
            .ok_or_else(|| AdminError::InfoSchemaExpired(version).into())
    }

    pub fn reload(&self) -> Result<Arc<InfoSchema>> {
        self.loader.reload()
    }

    pub fn exec_context(&self) -> ExecContext {
        let mut ctx = ExecContext::new(self.info_schema());
        ctx.charset_server = self.config.session.character_set_server.clone();
        ctx.collation_server = self.config.session.collation_server.clone();
        ctx
    }

    pub fn new_session(self: &Arc<Self>) -> Session {
        Session::new(self.clone())
    }

    /// Stop the workers and the reload loop. Queued jobs stay in the store.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = self
            .reload_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "schema reload task exited abnormally");
            }
        }
        self.ddl.close().await;
        info!("domain closed");
    }
}
