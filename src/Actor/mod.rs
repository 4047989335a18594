pub mod context;
pub mod logger;
pub mod module;
pub mod registry;

pub use context::{Context, DispatchMode, Flow, Handler};
pub use logger::{Logger, LOGGER_NAME};
pub use module::{Module, ModuleLoader, ModulePath, Modules, Service, MAX_MODULE_TYPE};
pub use registry::{Registry, HANDLE_MASK, HANDLE_REMOTE_SHIFT};
