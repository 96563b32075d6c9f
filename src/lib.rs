pub mod conf;
pub mod context;
pub mod error;
#[path = "bootstrap/app_bootstrap.rs"]
pub mod app_bootstrap;
#[path = "bootstrap/command_registry.rs"]
pub mod command_registry;

// Modules
pub mod modules;

pub use app_bootstrap::AppContext;
pub use context::RequestContext;
pub use error::{MdmError, MdmResult};
