//! Module table.
//!
//! A module is a named factory of service instances. Compiled-in modules
//! are inserted up front; anything else is resolved on demand through a
//! [`ModuleLoader`] walking a `;`-separated search path in which each
//! template carries exactly one `?` placeholder.

use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;

use super::context::Context;
use crate::error::{Error, Result};

/// Upper bound on distinct modules.
pub const MAX_MODULE_TYPE: usize = 32;

/// A module instance. One is created per launched service.
pub trait Service: Send + Sync + 'static {
    /// Required. Typically installs a handler with `ctx.set_handler`.
    fn init(&self, ctx: &Arc<Context>, params: &str) -> Result<()>;

    fn release(&self) {}

    fn signal(&self, _signal: i32) {}
}

type Factory = Box<dyn Fn() -> Box<dyn Service> + Send + Sync>;

pub struct Module {
    name: String,
    factory: Factory,
}

impl Module {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Service> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
        }
    }

    /// Module whose instances are `S::default()`.
    pub fn of<S: Service + Default>(name: impl Into<String>) -> Self {
        Self::new(name, || Box::new(S::default()) as Box<dyn Service>)
    }

    /// Module with no per-instance state: every instance runs `init`.
    pub fn from_init<F>(name: impl Into<String>, init: F) -> Self
    where
        F: Fn(&Arc<Context>, &str) -> Result<()> + Send + Sync + 'static,
    {
        let init = Arc::new(init);
        Self::new(name, move || {
            Box::new(InitFn(Arc::clone(&init))) as Box<dyn Service>
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create(&self) -> Box<dyn Service> {
        (self.factory)()
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module").field("name", &self.name).finish()
    }
}

struct InitFn<F>(Arc<F>);

impl<F> Service for InitFn<F>
where
    F: Fn(&Arc<Context>, &str) -> Result<()> + Send + Sync + 'static,
{
    fn init(&self, ctx: &Arc<Context>, params: &str) -> Result<()> {
        (self.0)(ctx, params)
    }
}

/// Resolves modules that were not inserted ahead of time.
pub trait ModuleLoader: Send + Sync {
    /// Try to load `name` from `path`. `Ok(None)` means not there.
    fn load(&self, name: &str, path: &std::path::Path) -> Result<Option<Module>>;
}

/// Parsed search path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModulePath {
    templates: Vec<String>,
}

impl ModulePath {
    pub fn parse(path: &str) -> Result<Self> {
        let templates: Vec<String> = path
            .split(';')
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();
        if templates.is_empty() {
            return Err(Error::InvalidModulePath {
                path: path.to_owned(),
                reason: "no template".into(),
            });
        }
        for template in &templates {
            if template.matches('?').count() != 1 {
                return Err(Error::InvalidModulePath {
                    path: template.clone(),
                    reason: "template needs exactly one '?'".into(),
                });
            }
        }
        Ok(Self { templates })
    }

    /// Candidate files for `name`, in search order.
    pub fn expand(&self, name: &str) -> Vec<PathBuf> {
        self.templates
            .iter()
            .map(|t| PathBuf::from(t.replacen('?', name, 1)))
            .collect()
    }
}

/// Name of the exported entry point `api` of module `name`: the last
/// dotted segment of the name followed by `_api`.
pub fn symbol_name(name: &str, api: &str) -> String {
    let base = name.rsplit('.').next().unwrap_or(name);
    format!("{base}_{api}")
}

pub struct Modules {
    path: ModulePath,
    table: RwLock<Vec<Arc<Module>>>,
    loader: Option<Box<dyn ModuleLoader>>,
    // Serializes loads so a module is created once.
    load_lock: Mutex<()>,
}

impl Modules {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self {
            path: ModulePath::parse(path)?,
            table: RwLock::new(Vec::new()),
            loader: None,
            load_lock: Mutex::new(()),
        })
    }

    pub fn with_loader(mut self, loader: Box<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn set_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.loader = Some(loader);
    }

    pub fn path(&self) -> &ModulePath {
        &self.path
    }

    fn find(&self, name: &str) -> Option<Arc<Module>> {
        self.table.read().iter().find(|m| m.name() == name).cloned()
    }

    /// Register a compiled-in module.
    pub fn insert(&self, module: Module) -> Result<Arc<Module>> {
        let _guard = self.load_lock.lock();
        self.insert_locked(module)
    }

    fn insert_locked(&self, module: Module) -> Result<Arc<Module>> {
        let mut table = self.table.write();
        if table.iter().any(|m| m.name() == module.name()) {
            return Err(Error::ModuleExists {
                name: module.name,
            });
        }
        if table.len() >= MAX_MODULE_TYPE {
            return Err(Error::ModuleTableFull {
                max: MAX_MODULE_TYPE,
            });
        }
        let module = Arc::new(module);
        table.push(Arc::clone(&module));
        Ok(module)
    }

    /// Look a module up, loading it through the loader on first use.
    pub fn query(&self, name: &str) -> Result<Arc<Module>> {
        if let Some(module) = self.find(name) {
            return Ok(module);
        }

        let _guard = self.load_lock.lock();
        if let Some(module) = self.find(name) {
            return Ok(module);
        }

        let candidates = self.path.expand(name);
        if let Some(loader) = &self.loader {
            for candidate in &candidates {
                match loader.load(name, candidate)? {
                    Some(module) => {
                        tracing::debug!(module = name, path = %candidate.display(), "Module loaded");
                        return self.insert_locked(module);
                    }
                    None => continue,
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(";");
        tracing::error!(module = name, tried = %tried, "Module not found");
        Err(Error::ModuleNotFound {
            name: name.to_owned(),
            tried,
        })
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
