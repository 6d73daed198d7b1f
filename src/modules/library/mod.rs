pub mod clock;
pub mod dialogue;
pub mod error;
pub mod manager;
pub mod models;
pub mod pagination;
pub mod phrases;
pub mod routes;
pub mod session;
pub mod store;
pub mod turn;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use shelf_db::{CachedSnapshotStore, FileSnapshotStore, InMemorySnapshotStore, SnapshotStore};
use shelf_kernel::settings::{Settings, StorageBackend, StorageSettings};
use shelf_kernel::{InitCtx, Module};

use clock::SystemClock;
use manager::LibraryManager;
use phrases::Phrases;
use store::LibraryStore;
use turn::TurnHandler;

/// Personal library module: catalog, loans and the conversational turn endpoint.
pub struct LibraryModule {
    handler: TurnHandler,
}

impl LibraryModule {
    pub fn new(handler: TurnHandler) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &TurnHandler {
        &self.handler
    }
}

#[async_trait]
impl Module for LibraryModule {
    fn name(&self) -> &'static str {
        "library"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            backend = ?ctx.settings.storage.backend,
            cache_enabled = ctx.settings.storage.cache_enabled,
            loan_days = ctx.settings.library.loan_days,
            "library module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.handler.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        routes::openapi()
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "library module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "library module stopped");
        Ok(())
    }
}

/// Snapshot store selected by the storage settings.
pub fn build_store(settings: &StorageSettings) -> Arc<dyn SnapshotStore> {
    let durable: Arc<dyn SnapshotStore> = match settings.backend {
        StorageBackend::Memory => Arc::new(InMemorySnapshotStore::new()),
        StorageBackend::File => Arc::new(FileSnapshotStore::new(&settings.data_dir)),
    };

    if settings.cache_enabled {
        Arc::new(CachedSnapshotStore::new(
            durable,
            Duration::from_secs(settings.cache_ttl_seconds),
        ))
    } else {
        durable
    }
}

/// Turn handler wired from settings, with the system clock.
pub fn turn_handler(settings: &Settings) -> TurnHandler {
    let store = LibraryStore::new(
        build_store(&settings.storage),
        Duration::from_millis(settings.storage.io_timeout_ms),
    );
    let manager = LibraryManager::new(store, Arc::new(SystemClock), settings.library.loan_days);
    TurnHandler::new(manager, Phrases::default(), settings.library.page_size)
}

/// Create a new instance of the library module
pub fn create_module(settings: &Settings) -> Arc<dyn Module> {
    Arc::new(LibraryModule::new(turn_handler(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_kernel::ModuleRegistry;

    #[tokio::test]
    async fn module_runs_through_registry_lifecycle() {
        let settings = Settings::default();
        let mut registry = ModuleRegistry::new();
        registry.register(create_module(&settings));

        let ctx = InitCtx {
            settings: &settings,
        };
        registry.init_all(&ctx).await.unwrap();
        registry.start_all(&ctx).await.unwrap();
        assert!(registry.get_module("library").is_some());
        assert!(registry.get_module("library").unwrap().openapi().is_some());
        registry.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn file_backend_persists_between_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.storage.backend = StorageBackend::File;
        settings.storage.data_dir = dir.path().display().to_string();

        let first = turn_handler(&settings);
        first
            .manager()
            .add_book("reader", "Dune", "Frank Herbert", "scifi")
            .await
            .unwrap();

        let second = turn_handler(&settings);
        assert_eq!(second.manager().catalog_size("reader").await.unwrap(), 1);
        assert!(dir.path().join("reader.json").exists());
    }
}
