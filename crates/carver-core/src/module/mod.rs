//! The module framework.
//!
//! Analysis in carver is split into modules. Each module is described by a
//! [`ModuleSpec`]: its priority, whether it is a primary (user-facing) module,
//! the options it understands, the parameters it is built from, and the
//! modules it depends on. Specs live in a statically built [`Registry`].
//!
//! The [`ModuleGraph`] resolves dependencies, constructs every dependency at
//! most once per run, shares it by reference between all modules that ask for
//! it, and drives each module through its lifecycle:
//!
//! ```text
//! construct ─► load ─► init ─► (plugin pre_scan) ─► run ─► (plugin post_scan) ─► unload
//! ```
//!
//! While a module runs it reports through a [`ModuleContext`], which
//! validates findings and forwards them to the module's dependencies.

mod context;
mod graph;
pub mod options;

use crate::error::Result;
use crate::finding::{Failure, Finding};
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::path::PathBuf;
use std::rc::Rc;

pub use context::ModuleContext;
pub use graph::ModuleGraph;
pub use options::{
    argv, Assign, Kwarg, Kwargs, ModuleOption, OptionEntry, OptionTable, OptionValue, ParsedArgs,
    ValueKind,
};

/// Registry name of the general configuration module
pub const GENERAL_MODULE: &str = "general";

/// Registry name of the extraction engine module
pub const EXTRACTOR_MODULE: &str = "extractor";

/// Attribute the general configuration is bound to
pub const CONFIG_ATTRIBUTE: &str = "config";

/// Attribute the extraction engine is bound to
pub const EXTRACTOR_ATTRIBUTE: &str = "extractor";

/// Upcasting helper so shared modules can be downcast to their concrete type
pub trait AsAny: Any {
    /// Returns `self` as `&dyn Any`
    fn as_any(&self) -> &dyn Any;
    /// Returns `self` as `&mut dyn Any`
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Behaviour shared by every analysis module
pub trait Module: AsAny {
    /// Post-construction hook
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    /// Pre-run hook
    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Main work; returns whether the module considers its run successful
    fn run(&mut self, ctx: &mut ModuleContext<'_>) -> Result<bool>;

    /// Receives findings reported by modules that depend on this one
    fn callback(&mut self, finding: &Finding) -> Result<()> {
        let _ = finding;
        Ok(())
    }

    /// Hands over files discovered for scanning since the last call
    fn take_pending(&mut self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Clears per-target state before the next target file is scanned
    fn reset(&mut self) {}

    /// Called once the module (or the module owning this dependency) is done
    fn unload(&mut self) {}
}

/// A module instance shared between the graph and its dependents
pub type SharedModule = Rc<RefCell<Box<dyn Module>>>;

/// Builds a module from its resolved parameters and bound dependencies
pub type ModuleFactory = fn(&Kwargs, &Dependencies) -> Result<Box<dyn Module>>;

/// A dependency declared by a module
#[derive(Debug, Clone)]
pub struct Dependency {
    /// Name the dependency is bound to in the dependent module
    pub attribute: &'static str,
    /// Registry name of the dependency module
    pub module: &'static str,
    /// Fixed construction parameters
    pub kwargs: Vec<(&'static str, OptionValue)>,
}

impl Dependency {
    /// Declares a dependency on `module`, bound as `attribute`
    pub fn new(attribute: &'static str, module: &'static str) -> Self {
        Self {
            attribute,
            module,
            kwargs: Vec::new(),
        }
    }

    /// Adds a fixed construction parameter
    pub fn with(mut self, name: &'static str, value: OptionValue) -> Self {
        self.kwargs.push((name, value));
        self
    }
}

/// Dependencies every module gets unless it declares its own list
pub fn default_dependencies() -> Vec<Dependency> {
    vec![
        Dependency::new(CONFIG_ATTRIBUTE, GENERAL_MODULE),
        Dependency::new(EXTRACTOR_ATTRIBUTE, EXTRACTOR_MODULE),
    ]
}

/// Static description of a module
#[derive(Clone)]
pub struct ModuleSpec {
    /// Registry name
    pub name: &'static str,
    /// Display title
    pub title: &'static str,
    /// Execution order; higher runs first
    pub priority: i32,
    /// Whether the module counts towards "did anything run"
    pub primary: bool,
    /// Options understood by the module
    pub options: Vec<ModuleOption>,
    /// Constructor parameters and their defaults
    pub kwargs: Vec<Kwarg>,
    dependencies: Option<Vec<Dependency>>,
    /// Constructor
    pub factory: ModuleFactory,
}

impl std::fmt::Debug for ModuleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSpec")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("primary", &self.primary)
            .field("dependencies", &self.dependencies())
            .finish_non_exhaustive()
    }
}

impl ModuleSpec {
    /// Creates a spec with the default dependencies and an `enabled` parameter
    pub fn new(name: &'static str, factory: ModuleFactory) -> Self {
        Self {
            name,
            title: name,
            priority: 0,
            primary: false,
            options: Vec::new(),
            kwargs: vec![Kwarg::new("enabled", OptionValue::Bool(false))],
            dependencies: None,
            factory,
        }
    }

    /// Sets the display title
    pub fn title(mut self, title: &'static str) -> Self {
        self.title = title;
        self
    }

    /// Sets the execution priority
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the module as primary
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Adds an option
    pub fn option(mut self, option: ModuleOption) -> Self {
        self.options.push(option);
        self
    }

    /// Declares (or redeclares) a constructor parameter
    pub fn kwarg(mut self, name: &'static str, default: OptionValue) -> Self {
        self.kwargs.retain(|k| k.name != name);
        self.kwargs.push(Kwarg::new(name, default));
        self
    }

    /// Replaces the default dependencies with an explicit list
    pub fn depends_on(mut self, dependencies: Vec<Dependency>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    /// Returns the effective dependency list
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.dependencies
            .clone()
            .unwrap_or_else(default_dependencies)
    }
}

/// Statically built table of known modules
#[derive(Debug, Clone, Default)]
pub struct Registry {
    specs: Vec<ModuleSpec>,
}

impl Registry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in module
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for spec in [
            crate::config::spec(),
            crate::extract::spec(),
            crate::scanner::spec(),
        ] {
            registry.specs.push(spec);
        }
        registry
    }

    /// Adds a module; names must be unique
    pub fn register(&mut self, spec: ModuleSpec) -> Result<()> {
        if self.get(spec.name).is_some() {
            return Err(crate::Error::invalid_argument(format!(
                "module '{}' registered twice",
                spec.name
            )));
        }
        self.specs.push(spec);
        Ok(())
    }

    /// Looks up a module by name
    pub fn get(&self, name: &str) -> Option<&ModuleSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    /// Iterates in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ModuleSpec> {
        self.specs.iter()
    }

    /// Module names in execution order: descending priority, ties by registration
    pub fn execution_order(&self) -> Vec<&'static str> {
        let mut specs: Vec<&ModuleSpec> = self.specs.iter().collect();
        specs.sort_by(|a, b| b.priority.cmp(&a.priority));
        specs.into_iter().map(|spec| spec.name).collect()
    }
}

/// Dependencies bound to one module
#[derive(Clone, Default)]
pub struct Dependencies {
    bound: Vec<(&'static str, &'static str, SharedModule)>,
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.bound.iter().map(|(attr, module, _)| (attr, module)))
            .finish()
    }
}

impl Dependencies {
    /// Creates an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a module instance under `attribute`
    pub fn bind(&mut self, attribute: &'static str, module: &'static str, shared: SharedModule) {
        self.bound.retain(|(attr, _, _)| *attr != attribute);
        self.bound.push((attribute, module, shared));
    }

    /// Whether `attribute` is bound
    pub fn contains(&self, attribute: &str) -> bool {
        self.bound.iter().any(|(attr, _, _)| *attr == attribute)
    }

    /// Borrows the dependency bound to `attribute` as its concrete type
    pub fn get<T: Module>(&self, attribute: &str) -> Option<Ref<'_, T>> {
        let shared = self.shared(attribute)?;
        let borrowed = shared.try_borrow().ok()?;
        Ref::filter_map(borrowed, |module| (**module).as_any().downcast_ref::<T>()).ok()
    }

    /// Mutably borrows the dependency bound to `attribute` as its concrete type
    pub fn get_mut<T: Module>(&self, attribute: &str) -> Option<RefMut<'_, T>> {
        let shared = self.shared(attribute)?;
        let borrowed = shared.try_borrow_mut().ok()?;
        RefMut::filter_map(borrowed, |module| {
            (**module).as_any_mut().downcast_mut::<T>()
        })
        .ok()
    }

    /// Returns the shared handle bound to `attribute`
    pub fn shared(&self, attribute: &str) -> Option<&SharedModule> {
        self.bound
            .iter()
            .find(|(attr, _, _)| *attr == attribute)
            .map(|(_, _, shared)| shared)
    }

    /// Iterates over `(attribute, module name, handle)`
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &'static str, &SharedModule)> {
        self.bound
            .iter()
            .map(|(attr, module, shared)| (*attr, *module, shared))
    }

    /// Collects pending files from every dependency
    pub fn take_pending(&self) -> Vec<PathBuf> {
        let mut pending = Vec::new();
        for (_, _, shared) in self.iter() {
            if let Ok(mut module) = shared.try_borrow_mut() {
                pending.extend(module.take_pending());
            }
        }
        pending
    }

    /// Resets every dependency
    pub fn reset_all(&self) {
        for (_, _, shared) in self.iter() {
            if let Ok(mut module) = shared.try_borrow_mut() {
                module.reset();
            }
        }
    }

    /// Tells every dependency that its owner is done
    pub fn unload_all(&self) {
        for (_, _, shared) in self.iter() {
            if let Ok(mut module) = shared.try_borrow_mut() {
                module.unload();
            }
        }
    }
}

/// Outcome of one module's run
#[derive(Debug)]
pub struct ModuleReport {
    /// Registry name
    pub name: &'static str,
    /// Display title
    pub title: &'static str,
    /// Whether the module is primary
    pub primary: bool,
    /// Whether the module was enabled
    pub enabled: bool,
    /// Whether `run` reported success
    pub success: bool,
    /// Valid findings, in reporting order
    pub findings: Vec<Finding>,
    /// Recorded failures
    pub failures: Vec<Failure>,
}

impl ModuleReport {
    /// Creates an empty report
    pub fn new(spec: &ModuleSpec, enabled: bool) -> Self {
        Self {
            name: spec.name,
            title: spec.title,
            primary: spec.primary,
            enabled,
            success: false,
            findings: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Whether the report belongs in the result set
    pub fn is_reportable(&self) -> bool {
        self.enabled && (self.primary || !self.findings.is_empty() || !self.failures.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        resets: usize,
    }

    impl Module for Counter {
        fn run(&mut self, _ctx: &mut ModuleContext<'_>) -> Result<bool> {
            Ok(true)
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    fn build(_kwargs: &Kwargs, _deps: &Dependencies) -> Result<Box<dyn Module>> {
        Ok(Box::new(Counter { resets: 0 }))
    }

    #[test]
    fn test_execution_order() {
        let mut registry = Registry::new();
        registry.register(ModuleSpec::new("low", build).priority(-1)).unwrap();
        registry.register(ModuleSpec::new("first", build).priority(5)).unwrap();
        registry.register(ModuleSpec::new("second", build).priority(5)).unwrap();

        assert_eq!(registry.execution_order(), vec!["first", "second", "low"]);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = Registry::new();
        registry.register(ModuleSpec::new("a", build)).unwrap();
        assert!(registry.register(ModuleSpec::new("a", build)).is_err());
    }

    #[test]
    fn test_default_dependencies() {
        let spec = ModuleSpec::new("scan", build);
        let names: Vec<_> = spec.dependencies().iter().map(|d| d.module).collect();
        assert_eq!(names, vec![GENERAL_MODULE, EXTRACTOR_MODULE]);

        let spec = spec.depends_on(Vec::new());
        assert!(spec.dependencies().is_empty());
    }

    #[test]
    fn test_dependencies_downcast_and_reset() {
        let counter: Box<dyn Module> = Box::new(Counter { resets: 0 });
        let shared: SharedModule = Rc::new(RefCell::new(counter));
        let mut deps = Dependencies::new();
        deps.bind("counter", "counter", Rc::clone(&shared));

        deps.reset_all();
        deps.reset_all();

        assert_eq!(deps.get::<Counter>("counter").unwrap().resets, 2);
        assert!(deps.get::<Counter>("missing").is_none());
        assert!(deps.take_pending().is_empty());
    }

    #[test]
    fn test_builtin_registry() {
        let registry = Registry::builtin();
        assert!(registry.get(GENERAL_MODULE).is_some());
        assert!(registry.get(EXTRACTOR_MODULE).is_some());
        assert!(registry.get("signature").is_some());
        assert!(OptionTable::aggregate(&registry).is_ok());
    }
}
