//! Dependency resolution and module execution.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  execution_order  ┌─────────────┐  instance()  ┌──────────────┐
//! │ Registry │ ────────────────► │ ModuleGraph │ ───────────► │ loaded cache │
//! └──────────┘                   └──────┬──────┘              └──────────────┘
//!                                       │ main()
//!                                       ▼
//!                              ModuleContext (findings, failures)
//! ```
//!
//! A dependency is constructed the first time any module asks for it, run
//! once if it is enabled, and then shared by every later module that
//! declares it. Modules that are being resolved are tracked on a stack so a
//! dependency cycle is reported instead of recursing forever.

use super::{
    argv, Dependencies, Kwargs, ModuleContext, ModuleReport, ModuleSpec, OptionTable,
    OptionValue, ParsedArgs, Registry, SharedModule,
};
use crate::error::{Error, Result};
use crate::finding::{Failure, Finding};
use crate::plugin::Plugin;
use crate::status::ScanStatus;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A constructed module and what was bound into it
#[derive(Clone)]
struct Instance {
    module: SharedModule,
    dependencies: Dependencies,
    enabled: bool,
    failed: bool,
}

/// Resolves, constructs and runs the modules of a [`Registry`]
pub struct ModuleGraph {
    registry: Registry,
    options: OptionTable,
    args: ParsedArgs,
    loaded: HashMap<&'static str, Instance>,
    resolving: Vec<&'static str>,
    plugins: Vec<Box<dyn Plugin>>,
    status: Arc<ScanStatus>,
}

impl ModuleGraph {
    /// Creates a graph for one run.
    ///
    /// All modules' options are merged first, so conflicting flag names and
    /// values for unknown options are rejected before anything is built.
    pub fn new(registry: Registry, args: ParsedArgs) -> Result<Self> {
        let options = OptionTable::aggregate(&registry)?;
        options.validate(&args)?;

        Ok(Self {
            registry,
            options,
            args,
            loaded: HashMap::new(),
            resolving: Vec::new(),
            plugins: Vec::new(),
            status: Arc::new(ScanStatus::new()),
        })
    }

    /// Adds a plugin
    pub fn with_plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
        debug!("Registered plugin '{}'", plugin.name());
        self.plugins.push(plugin);
        self
    }

    /// Progress counters, safe to observe from another thread
    pub fn status(&self) -> Arc<ScanStatus> {
        Arc::clone(&self.status)
    }

    /// The merged option table
    pub fn options(&self) -> &OptionTable {
        &self.options
    }

    /// The module registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolves the constructor parameters a module would be built with
    pub fn argv(&self, name: &str) -> Result<Kwargs> {
        let spec = self
            .registry
            .get(name)
            .ok_or_else(|| Error::module_not_found(name, "argv"))?;
        self.kwargs_for(spec, &[])
    }

    /// Runs every registered module in execution order.
    ///
    /// Configuration errors abort the run. Everything else is recorded on
    /// the module it happened in. Only enabled modules that are primary or
    /// produced findings or failures are returned.
    pub fn execute(&mut self) -> Result<Vec<ModuleReport>> {
        let mut reports = Vec::new();

        for name in self.registry.execution_order() {
            let report = self.run(name)?;
            if report.is_reportable() {
                reports.push(report);
            } else {
                debug!("Module '{}' has nothing to report", name);
            }
        }

        Ok(reports)
    }

    /// Runs a single module as a top-level module
    pub fn run(&mut self, name: &str) -> Result<ModuleReport> {
        let spec = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| Error::module_not_found(name, "execute"))?;
        let enabled = self.kwargs_for(&spec, &[])?.enabled();
        let mut report = ModuleReport::new(&spec, enabled);

        let instance = match self.instance(spec.name, &[]) {
            Ok(instance) => instance,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("Could not load module '{}': {}", spec.name, e);
                let mut finding = Finding::new(0, format!("failed to load module '{}'", spec.name)).hidden();
                finding.module = spec.name.to_string();
                report.failures.push(Failure::new(finding, e));
                return Ok(report);
            }
        };

        report.enabled = instance.enabled;
        if instance.enabled {
            info!("Running module '{}'", spec.name);
            let (success, findings, failures) =
                main(spec.name, &instance, &mut self.plugins, &self.status);
            report.success = success;
            report.findings = findings;
            report.failures = failures;
        }

        instance.dependencies.unload_all();
        if let Ok(mut module) = instance.module.try_borrow_mut() {
            module.unload();
        }

        Ok(report)
    }

    /// Constructs (or returns the already constructed) module `name`
    pub fn load(&mut self, name: &str) -> Result<SharedModule> {
        let spec_name = self
            .registry
            .get(name)
            .map(|spec| spec.name)
            .ok_or_else(|| Error::module_not_found(name, "load"))?;
        Ok(self.instance(spec_name, &[])?.module)
    }

    fn kwargs_for(
        &self,
        spec: &ModuleSpec,
        fixed: &[(&'static str, OptionValue)],
    ) -> Result<Kwargs> {
        let mut provided = argv(spec, &self.args)?;
        for (name, value) in fixed {
            provided.retain(|(existing, _)| existing != name);
            provided.push((name.to_string(), value.clone()));
        }
        Kwargs::resolve(spec.name, &spec.kwargs, provided)
    }

    fn instance(
        &mut self,
        name: &'static str,
        fixed: &[(&'static str, OptionValue)],
    ) -> Result<Instance> {
        if let Some(instance) = self.loaded.get(name) {
            return Ok(instance.clone());
        }

        if let Some(start) = self.resolving.iter().position(|resolving| *resolving == name) {
            let mut chain: Vec<String> =
                self.resolving[start..].iter().map(|n| n.to_string()).collect();
            chain.push(name.to_string());
            return Err(Error::DependencyCycle { chain });
        }

        let spec = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| Error::module_not_found(name, "load"))?;

        self.resolving.push(name);
        let built = self.construct(&spec, fixed);
        self.resolving.pop();

        let instance = built?;
        self.loaded.insert(name, instance.clone());
        Ok(instance)
    }

    fn construct(
        &mut self,
        spec: &ModuleSpec,
        fixed: &[(&'static str, OptionValue)],
    ) -> Result<Instance> {
        let kwargs = self.kwargs_for(spec, fixed)?;
        let enabled = kwargs.enabled();
        let dependencies = self.dependencies(spec, enabled)?;

        let mut module = (spec.factory)(&kwargs, &dependencies)?;
        module.load()?;
        debug!(
            "Loaded module '{}' (enabled: {}, dependencies: {:?})",
            spec.name, enabled, dependencies
        );

        Ok(Instance {
            module: Rc::new(RefCell::new(module)),
            dependencies,
            enabled,
            failed: false,
        })
    }

    fn dependencies(&mut self, spec: &ModuleSpec, enabled: bool) -> Result<Dependencies> {
        let mut bound = Dependencies::new();

        for dependency in spec.dependencies() {
            if dependency.module == spec.name {
                continue;
            }
            if self.registry.get(dependency.module).is_none() {
                return Err(Error::module_not_found(dependency.module, spec.name));
            }
            if !enabled && !dependency.kwargs.is_empty() {
                debug!(
                    "Not loading '{}' for disabled module '{}'",
                    dependency.module, spec.name
                );
                continue;
            }

            let instance = match self.loaded.get(dependency.module) {
                Some(cached) => cached.clone(),
                None => {
                    let instance = self
                        .instance(dependency.module, &dependency.kwargs)
                        .map_err(|e| match e {
                            Error::ModuleNotFound { .. } | Error::DependencyCycle { .. } => e,
                            e if e.is_fatal() => e,
                            e => {
                                warn!("Dependency '{}' failed to load: {}", dependency.module, e);
                                Error::dependency_failed(spec.name, dependency.module)
                            }
                        })?;

                    if instance.enabled && !self.run_dependency(dependency.module, &instance) {
                        if let Some(cached) = self.loaded.get_mut(dependency.module) {
                            cached.failed = true;
                        }
                        return Err(Error::dependency_failed(spec.name, dependency.module));
                    }
                    instance
                }
            };

            if instance.failed {
                return Err(Error::dependency_failed(spec.name, dependency.module));
            }

            bound.bind(dependency.attribute, dependency.module, instance.module);
        }

        Ok(bound)
    }

    fn run_dependency(&mut self, name: &'static str, instance: &Instance) -> bool {
        debug!("Running dependency '{}'", name);
        let (_, _, failures) = main(name, instance, &mut self.plugins, &self.status);
        for failure in &failures {
            warn!("{}", failure);
        }
        failures.is_empty()
    }
}

/// Drives one module through init, the plugin hooks and run
fn main(
    name: &'static str,
    instance: &Instance,
    plugins: &mut [Box<dyn Plugin>],
    status: &ScanStatus,
) -> (bool, Vec<Finding>, Vec<Failure>) {
    let mut module = match instance.module.try_borrow_mut() {
        Ok(module) => module,
        Err(_) => {
            let failure = Failure::described(name, "module is already running");
            return (false, Vec::new(), vec![failure]);
        }
    };

    let mut ctx = ModuleContext::new(name, &instance.dependencies, plugins, status);

    let success = match module.init(&mut ctx) {
        Err(e) => {
            error!("Module '{}' failed to initialize: {}", name, e);
            ctx.error("initialization failed", e);
            false
        }
        Ok(()) => {
            ctx.pre_scan();
            let success = match module.run(&mut ctx) {
                Ok(success) => success,
                Err(e) => {
                    error!("Module '{}' failed: {}", name, e);
                    ctx.error("run failed", e);
                    false
                }
            };
            ctx.post_scan();
            success
        }
    };

    let (findings, failures) = ctx.finish();
    status.clear();
    (success, findings, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Dependency, Module, ModuleOption};
    use pretty_assertions::assert_eq;

    /// Counts how often it ran and how many findings it was handed
    struct Tally {
        runs: usize,
        seen: usize,
    }

    impl Module for Tally {
        fn run(&mut self, _ctx: &mut ModuleContext<'_>) -> Result<bool> {
            self.runs += 1;
            Ok(true)
        }

        fn callback(&mut self, _finding: &Finding) -> Result<()> {
            self.seen += 1;
            Ok(())
        }
    }

    /// Reports what its tally dependency has observed so far
    struct Reporter;

    impl Module for Reporter {
        fn run(&mut self, ctx: &mut ModuleContext<'_>) -> Result<bool> {
            let (runs, seen) = match ctx.dependencies().get::<Tally>("tally") {
                Some(tally) => (tally.runs, tally.seen),
                None => return Ok(false),
            };
            ctx.result(Finding::new(0, format!("runs={} seen={}", runs, seen)));
            Ok(true)
        }
    }

    struct Broken;

    impl Module for Broken {
        fn run(&mut self, _ctx: &mut ModuleContext<'_>) -> Result<bool> {
            Err(Error::internal("boom"))
        }
    }

    fn tally(_: &Kwargs, _: &Dependencies) -> Result<Box<dyn Module>> {
        Ok(Box::new(Tally { runs: 0, seen: 0 }))
    }

    fn reporter(_: &Kwargs, _: &Dependencies) -> Result<Box<dyn Module>> {
        Ok(Box::new(Reporter))
    }

    fn broken(_: &Kwargs, _: &Dependencies) -> Result<Box<dyn Module>> {
        Ok(Box::new(Broken))
    }

    fn enabled_reporter(name: &'static str, priority: i32) -> ModuleSpec {
        ModuleSpec::new(name, reporter)
            .primary()
            .priority(priority)
            .kwarg("enabled", OptionValue::Bool(true))
            .depends_on(vec![Dependency::new("tally", "tally")])
    }

    fn tally_spec() -> ModuleSpec {
        ModuleSpec::new("tally", tally)
            .kwarg("enabled", OptionValue::Bool(true))
            .depends_on(Vec::new())
    }

    #[test]
    fn test_dependency_shared_between_modules() {
        let mut registry = Registry::new();
        registry.register(tally_spec()).unwrap();
        registry.register(enabled_reporter("first", 2)).unwrap();
        registry.register(enabled_reporter("second", 1)).unwrap();

        let mut graph = ModuleGraph::new(registry, ParsedArgs::new()).unwrap();
        let reports = graph.execute().unwrap();

        let lines: Vec<_> = reports
            .iter()
            .filter(|r| r.name != "tally")
            .map(|r| r.findings[0].description.clone())
            .collect();
        // The dependency ran once; the second module sees the first one's finding.
        assert_eq!(lines, vec!["runs=1 seen=0", "runs=1 seen=1"]);
    }

    #[test]
    fn test_missing_dependency_does_not_stop_siblings() {
        let mut registry = Registry::new();
        registry.register(tally_spec()).unwrap();
        registry
            .register(
                ModuleSpec::new("orphan", reporter)
                    .primary()
                    .priority(5)
                    .kwarg("enabled", OptionValue::Bool(true))
                    .depends_on(vec![Dependency::new("ghost", "ghost")]),
            )
            .unwrap();
        registry.register(enabled_reporter("healthy", 1)).unwrap();

        let mut graph = ModuleGraph::new(registry, ParsedArgs::new()).unwrap();
        assert!(matches!(
            graph.load("orphan"),
            Err(Error::ModuleNotFound { ref name, .. }) if name == "ghost"
        ));

        let reports = graph.execute().unwrap();
        let orphan = reports.iter().find(|r| r.name == "orphan").unwrap();
        assert!(!orphan.success);
        assert_eq!(orphan.failures.len(), 1);

        let healthy = reports.iter().find(|r| r.name == "healthy").unwrap();
        assert!(healthy.success);
        assert_eq!(healthy.findings.len(), 1);
    }

    #[test]
    fn test_dependency_cycle_detected() {
        let mut registry = Registry::new();
        for (name, next) in [("a", "b"), ("b", "c"), ("c", "a")] {
            registry
                .register(ModuleSpec::new(name, tally).depends_on(vec![Dependency::new(next, next)]))
                .unwrap();
        }

        let mut graph = ModuleGraph::new(registry, ParsedArgs::new()).unwrap();
        let err = graph.load("a").err().unwrap();
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> c -> a");
    }

    #[test]
    fn test_self_dependency_ignored() {
        let mut registry = Registry::new();
        registry
            .register(ModuleSpec::new("loop", tally).depends_on(vec![Dependency::new("me", "loop")]))
            .unwrap();

        let mut graph = ModuleGraph::new(registry, ParsedArgs::new()).unwrap();
        assert!(graph.load("loop").is_ok());
    }

    #[test]
    fn test_failed_dependency_aborts_requester() {
        let mut registry = Registry::new();
        registry
            .register(
                ModuleSpec::new("tally", broken)
                    .kwarg("enabled", OptionValue::Bool(true))
                    .depends_on(Vec::new()),
            )
            .unwrap();
        registry.register(enabled_reporter("user", 1)).unwrap();

        let mut graph = ModuleGraph::new(registry, ParsedArgs::new()).unwrap();
        let report = graph.run("user").unwrap();
        assert!(!report.success);
        assert!(matches!(
            report.failures[0].cause,
            Some(Error::DependencyFailed { .. })
        ));
    }

    #[test]
    fn test_run_error_recorded_as_failure() {
        let mut registry = Registry::new();
        registry
            .register(
                ModuleSpec::new("broken", broken)
                    .primary()
                    .kwarg("enabled", OptionValue::Bool(true))
                    .depends_on(Vec::new()),
            )
            .unwrap();

        let mut graph = ModuleGraph::new(registry, ParsedArgs::new()).unwrap();
        let reports = graph.execute().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].success);
        assert_eq!(reports[0].failures[0].to_string(), "[broken] run failed: internal error: boom");
    }

    #[test]
    fn test_fixed_kwargs_skipped_for_disabled_requester() {
        let mut registry = Registry::new();
        registry
            .register(
                ModuleSpec::new("tally", tally)
                    .kwarg("mode", OptionValue::Str(String::new()))
                    .depends_on(Vec::new()),
            )
            .unwrap();
        registry
            .register(
                ModuleSpec::new("idle", reporter)
                    .option(ModuleOption::flag("idle", "enable").sets("enabled", OptionValue::Bool(true)))
                    .depends_on(vec![Dependency::new("tally", "tally")
                        .with("mode", OptionValue::Str("fast".into()))]),
            )
            .unwrap();

        let mut graph = ModuleGraph::new(registry.clone(), ParsedArgs::new()).unwrap();
        let report = graph.run("idle").unwrap();
        assert!(!report.enabled);
        assert!(!graph.loaded.contains_key("tally"));

        let mut args = ParsedArgs::new();
        args.insert("idle".into(), OptionValue::Bool(true));
        let mut graph = ModuleGraph::new(registry, args).unwrap();
        graph.run("idle").unwrap();
        assert!(graph.loaded.contains_key("tally"));
    }

    #[test]
    fn test_disabled_modules_not_reported() {
        let mut registry = Registry::new();
        registry.register(tally_spec()).unwrap();
        registry
            .register(
                ModuleSpec::new("quiet", reporter)
                    .primary()
                    .depends_on(vec![Dependency::new("tally", "tally")]),
            )
            .unwrap();

        let mut graph = ModuleGraph::new(registry, ParsedArgs::new()).unwrap();
        let reports = graph.execute().unwrap();
        assert!(reports.iter().all(|r| r.name != "quiet"));
    }
}
