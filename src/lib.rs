//! shelf application library
//!
//! Conversational personal library: a book catalog, loan tracking and a
//! multi-turn "add a book" dialogue, served as a kernel module over HTTP.

pub mod modules;
pub mod utils;

use anyhow::Context;
use shelf_kernel::settings::Settings;
use shelf_kernel::{InitCtx, ModuleRegistry};

/// Re-export commonly used types
pub use modules::library::turn::{Intent, TurnHandler, TurnRequest, TurnResponse};
pub use modules::library::session::ConversationState;

/// Register modules, run their lifecycle and serve HTTP until shutdown.
pub async fn run_server(settings: Settings) -> anyhow::Result<()> {
    let mut registry = ModuleRegistry::new();
    modules::register_all(&mut registry, &settings);

    let ctx = InitCtx {
        settings: &settings,
    };
    registry
        .init_all(&ctx)
        .await
        .context("module initialization failed")?;
    registry
        .start_all(&ctx)
        .await
        .context("module startup failed")?;

    let served = shelf_http::start_server(&registry, &settings).await;

    registry.stop_all().await.context("module shutdown failed")?;
    served
}
