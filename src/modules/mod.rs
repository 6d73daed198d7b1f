pub mod library;

use shelf_kernel::settings::Settings;
use shelf_kernel::ModuleRegistry;

/// Register all project-specific modules with the registry
pub fn register_all(registry: &mut ModuleRegistry, settings: &Settings) {
    registry.register(library::create_module(settings));
}
