//! Option aggregation and typed module parameters.
//!
//! Every module declares the command-line options it understands and the
//! parameters ("kwargs") it is constructed from. An option maps onto one or
//! more kwargs: a flag assigns fixed values, a valued option forwards what the
//! user typed. The [`OptionTable`] merges all modules' options so clashing
//! flag names are caught before anything runs, and [`argv`] turns the parsed
//! values into the kwargs of a single module.
//!
//! ```text
//!  --matryoshka ──► matryoshka = 8      (priority 0)
//!  --depth 3    ──► matryoshka = 3      (priority 1, wins)
//! ```

use super::{ModuleSpec, Registry};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Kind of value an option accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Present or absent
    Flag,
    /// Integer, with `0x`/`0o`/`0b` prefixes recognised
    Int,
    /// Free-form string
    Str,
    /// Repeatable string
    List,
}

/// A typed option or parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// String
    Str(String),
    /// List of strings
    List(Vec<String>),
}

impl OptionValue {
    /// Parses a raw command-line value for an option of the given kind
    pub fn parse(kind: ValueKind, raw: &str) -> Result<Self> {
        match kind {
            ValueKind::Flag => Ok(Self::Bool(true)),
            ValueKind::Int => parse_int(raw)
                .map(Self::Int)
                .ok_or_else(|| Error::invalid_argument(format!("'{}' is not a valid integer", raw))),
            ValueKind::Str => Ok(Self::Str(raw.to_string())),
            ValueKind::List => Ok(Self::List(vec![raw.to_string()])),
        }
    }

    /// Whether the value counts as "given" on the command line
    pub fn is_set(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::List(items) => !items.is_empty(),
            _ => true,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "a boolean",
            Self::Int(_) => "an integer",
            Self::Str(_) => "a string",
            Self::List(_) => "a list",
        }
    }

    fn matches_kind(&self, kind: ValueKind) -> bool {
        matches!(
            (self, kind),
            (Self::Bool(_), ValueKind::Flag)
                | (Self::Int(_), ValueKind::Int)
                | (Self::Str(_), ValueKind::Str)
                | (Self::List(_), ValueKind::List)
        )
    }
}

/// What an option assigns to a kwarg when it is given
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assign {
    /// A fixed value
    Value(OptionValue),
    /// The value supplied on the command line
    Provided,
}

/// A command-line option declared by a module
#[derive(Debug, Clone)]
pub struct ModuleOption {
    /// Single-character flag
    pub short: Option<char>,
    /// Long flag name, also the key in [`ParsedArgs`]
    pub long: &'static str,
    /// Kind of value accepted
    pub kind: ValueKind,
    /// Kwargs assigned when the option is given
    pub kwargs: Vec<(&'static str, Assign)>,
    /// Later options of equal or higher priority override earlier ones
    pub priority: i32,
    /// Help text
    pub help: &'static str,
    /// Whether the option is the positional argument list
    pub positional: bool,
}

impl ModuleOption {
    /// Declares an option with the given long name and value kind
    pub fn new(long: &'static str, kind: ValueKind, help: &'static str) -> Self {
        Self {
            short: None,
            long,
            kind,
            kwargs: Vec::new(),
            priority: 0,
            help,
            positional: false,
        }
    }

    /// Declares a boolean flag
    pub fn flag(long: &'static str, help: &'static str) -> Self {
        Self::new(long, ValueKind::Flag, help)
    }

    /// Sets the short flag
    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    /// Assigns a fixed value to `kwarg` when the option is given
    pub fn sets(mut self, kwarg: &'static str, value: OptionValue) -> Self {
        self.kwargs.push((kwarg, Assign::Value(value)));
        self
    }

    /// Forwards the option's value to `kwarg`
    pub fn takes(mut self, kwarg: &'static str) -> Self {
        self.kwargs.push((kwarg, Assign::Provided));
        self
    }

    /// Sets the override priority
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the option as the positional argument list
    pub fn positional(mut self) -> Self {
        self.positional = true;
        self
    }
}

/// A constructor parameter and its default
#[derive(Debug, Clone)]
pub struct Kwarg {
    /// Parameter name
    pub name: &'static str,
    /// Default value, which also fixes the parameter's type
    pub default: OptionValue,
}

impl Kwarg {
    /// Declares a parameter
    pub fn new(name: &'static str, default: OptionValue) -> Self {
        Self { name, default }
    }
}

/// Option values as parsed from the command line, keyed by long name
pub type ParsedArgs = BTreeMap<String, OptionValue>;

/// Validated constructor parameters for one module
#[derive(Debug, Clone)]
pub struct Kwargs {
    module: String,
    values: BTreeMap<&'static str, OptionValue>,
}

impl Kwargs {
    /// Resolves `provided` values against a module's kwargs schema.
    ///
    /// Every declared parameter gets its default unless overridden. Unknown
    /// names and type mismatches are rejected.
    pub fn resolve(
        module: &str,
        schema: &[Kwarg],
        provided: impl IntoIterator<Item = (String, OptionValue)>,
    ) -> Result<Self> {
        let mut values: BTreeMap<&'static str, OptionValue> = schema
            .iter()
            .map(|kwarg| (kwarg.name, kwarg.default.clone()))
            .collect();

        for (name, value) in provided {
            let Some(kwarg) = schema.iter().find(|k| k.name == name) else {
                return Err(Error::UnknownKwarg {
                    module: module.to_string(),
                    name,
                });
            };
            values.insert(kwarg.name, coerce(module, kwarg, value)?);
        }

        Ok(Self {
            module: module.to_string(),
            values,
        })
    }

    /// Whether the module was switched on
    pub fn enabled(&self) -> bool {
        matches!(self.values.get("enabled"), Some(OptionValue::Bool(true)))
    }

    /// Reads a boolean parameter
    pub fn flag(&self, name: &str) -> Result<bool> {
        match self.get(name)? {
            OptionValue::Bool(b) => Ok(*b),
            other => Err(self.mismatch(name, "a boolean", other)),
        }
    }

    /// Reads an integer parameter
    pub fn int(&self, name: &str) -> Result<i64> {
        match self.get(name)? {
            OptionValue::Int(i) => Ok(*i),
            other => Err(self.mismatch(name, "an integer", other)),
        }
    }

    /// Reads a non-negative integer parameter
    pub fn uint(&self, name: &str) -> Result<u64> {
        let value = self.int(name)?;
        u64::try_from(value).map_err(|_| {
            Error::invalid_argument(format!("{} must not be negative (got {})", name, value))
        })
    }

    /// Reads a string parameter
    pub fn string(&self, name: &str) -> Result<String> {
        match self.get(name)? {
            OptionValue::Str(s) => Ok(s.clone()),
            other => Err(self.mismatch(name, "a string", other)),
        }
    }

    /// Reads a list parameter
    pub fn list(&self, name: &str) -> Result<Vec<String>> {
        match self.get(name)? {
            OptionValue::List(items) => Ok(items.clone()),
            other => Err(self.mismatch(name, "a list", other)),
        }
    }

    fn get(&self, name: &str) -> Result<&OptionValue> {
        self.values.get(name).ok_or_else(|| Error::UnknownKwarg {
            module: self.module.clone(),
            name: name.to_string(),
        })
    }

    fn mismatch(&self, name: &str, expected: &str, got: &OptionValue) -> Error {
        Error::internal(format!(
            "parameter '{}' of module '{}' is {}, not {}",
            name,
            self.module,
            got.type_name(),
            expected
        ))
    }
}

fn coerce(module: &str, kwarg: &Kwarg, value: OptionValue) -> Result<OptionValue> {
    match (&kwarg.default, value) {
        (OptionValue::Bool(_), v @ OptionValue::Bool(_))
        | (OptionValue::Int(_), v @ OptionValue::Int(_))
        | (OptionValue::Str(_), v @ OptionValue::Str(_))
        | (OptionValue::List(_), v @ OptionValue::List(_)) => Ok(v),
        (OptionValue::List(_), OptionValue::Str(s)) => Ok(OptionValue::List(vec![s])),
        (default, v) => Err(Error::invalid_argument(format!(
            "parameter '{}' of module '{}' expects {}, got {}",
            kwarg.name,
            module,
            default.type_name(),
            v.type_name()
        ))),
    }
}

/// Translates parsed option values into kwargs for one module.
///
/// Only the module's own options are considered. When several options
/// assign the same kwarg, the last one whose priority is equal to or higher
/// than the previous assignment wins.
pub fn argv(spec: &ModuleSpec, args: &ParsedArgs) -> Result<Vec<(String, OptionValue)>> {
    let mut last_priority: HashMap<&str, i32> = HashMap::new();
    let mut assigned: BTreeMap<&str, OptionValue> = BTreeMap::new();

    for option in &spec.options {
        let Some(value) = args.get(option.long) else {
            continue;
        };
        if !value.is_set() {
            continue;
        }
        if !value.matches_kind(option.kind) {
            return Err(Error::invalid_argument(format!(
                "--{} expects {:?}, got {}",
                option.long,
                option.kind,
                value.type_name()
            )));
        }

        for &(name, ref assign) in &option.kwargs {
            let overrides = last_priority
                .get(name)
                .map_or(true, |previous| *previous <= option.priority);
            if !overrides {
                continue;
            }

            last_priority.insert(name, option.priority);
            let resolved = match assign {
                Assign::Value(fixed) => fixed.clone(),
                Assign::Provided => value.clone(),
            };
            assigned.insert(name, resolved);
        }
    }

    Ok(assigned
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect())
}

/// An option together with the module that declared it
#[derive(Debug, Clone)]
pub struct OptionEntry {
    /// Declaring module
    pub module: &'static str,
    /// The option
    pub option: ModuleOption,
}

/// All modules' options merged into one table
#[derive(Debug, Clone, Default)]
pub struct OptionTable {
    entries: Vec<OptionEntry>,
}

impl OptionTable {
    /// Merges every registered module's options, rejecting clashing names
    pub fn aggregate(registry: &Registry) -> Result<Self> {
        let mut table = Self::default();

        for spec in registry.iter() {
            for option in &spec.options {
                if let Some(existing) = table.clash(option) {
                    return Err(Error::OptionConflict {
                        option: option.long.to_string(),
                        first: existing.module.to_string(),
                        second: spec.name.to_string(),
                    });
                }
                table.entries.push(OptionEntry {
                    module: spec.name,
                    option: option.clone(),
                });
            }
        }

        Ok(table)
    }

    fn clash(&self, option: &ModuleOption) -> Option<&OptionEntry> {
        self.entries.iter().find(|entry| {
            let other = &entry.option;
            other.long == option.long
                || (option.short.is_some() && other.short == option.short)
                || (option.positional && other.positional)
        })
    }

    /// Iterates over all options in registration order
    pub fn iter(&self) -> impl Iterator<Item = &OptionEntry> {
        self.entries.iter()
    }

    /// Looks up an option by long name
    pub fn find(&self, long: &str) -> Option<&OptionEntry> {
        self.entries.iter().find(|entry| entry.option.long == long)
    }

    /// Checks that every parsed value names a known option of the right kind
    pub fn validate(&self, args: &ParsedArgs) -> Result<()> {
        for (name, value) in args {
            let entry = self
                .find(name)
                .ok_or_else(|| Error::invalid_argument(format!("unknown option --{}", name)))?;
            if !value.matches_kind(entry.option.kind) {
                return Err(Error::invalid_argument(format!(
                    "--{} expects {:?}, got {}",
                    name,
                    entry.option.kind,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }
}

/// Parses an integer with automatic base detection (`0x`, `0o`, `0b`)
pub fn parse_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };

    let lower = digits.to_ascii_lowercase();
    let (radix, body) = if let Some(hex) = lower.strip_prefix("0x") {
        (16, hex.to_string())
    } else if let Some(oct) = lower.strip_prefix("0o") {
        (8, oct.to_string())
    } else if let Some(bin) = lower.strip_prefix("0b") {
        (2, bin.to_string())
    } else {
        (10, lower)
    };

    if body.is_empty() {
        return None;
    }

    let value = i64::from_str_radix(&body, radix).ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Dependencies, Module, ModuleContext};
    use pretty_assertions::assert_eq;

    struct Inert;

    impl Module for Inert {
        fn run(&mut self, _ctx: &mut ModuleContext<'_>) -> Result<bool> {
            Ok(true)
        }
    }

    fn build(_kwargs: &Kwargs, _deps: &Dependencies) -> Result<Box<dyn Module>> {
        Ok(Box::new(Inert))
    }

    fn extractor_like() -> ModuleSpec {
        ModuleSpec::new("ext", build)
            .kwarg("matryoshka", OptionValue::Int(0))
            .kwarg("rules", OptionValue::List(Vec::new()))
            .option(
                ModuleOption::flag("matryoshka", "recurse")
                    .short('M')
                    .sets("matryoshka", OptionValue::Int(8)),
            )
            .option(
                ModuleOption::new("depth", ValueKind::Int, "depth")
                    .takes("matryoshka")
                    .priority(1),
            )
            .option(
                ModuleOption::new("dd", ValueKind::List, "rule")
                    .short('D')
                    .sets("enabled", OptionValue::Bool(true))
                    .takes("rules"),
            )
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("0x1F"), Some(31));
        assert_eq!(parse_int("-0x10"), Some(-16));
        assert_eq!(parse_int("0b101"), Some(5));
        assert_eq!(parse_int("0o17"), Some(15));
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("0x"), None);
        assert_eq!(parse_int("twelve"), None);
    }

    #[test]
    fn test_higher_priority_overrides() {
        let spec = extractor_like();
        let mut args = ParsedArgs::new();
        args.insert("matryoshka".into(), OptionValue::Bool(true));
        args.insert("depth".into(), OptionValue::Int(3));

        let assigned = argv(&spec, &args).unwrap();
        assert_eq!(assigned, vec![("matryoshka".to_string(), OptionValue::Int(3))]);
    }

    #[test]
    fn test_lower_priority_does_not_override() {
        let spec = ModuleSpec::new("ext", build)
            .kwarg("matryoshka", OptionValue::Int(0))
            .option(
                ModuleOption::new("depth", ValueKind::Int, "depth")
                    .takes("matryoshka")
                    .priority(1),
            )
            .option(ModuleOption::flag("matryoshka", "recurse").sets("matryoshka", OptionValue::Int(8)));

        let mut args = ParsedArgs::new();
        args.insert("matryoshka".into(), OptionValue::Bool(true));
        args.insert("depth".into(), OptionValue::Int(2));

        let assigned = argv(&spec, &args).unwrap();
        assert_eq!(assigned, vec![("matryoshka".to_string(), OptionValue::Int(2))]);
    }

    #[test]
    fn test_kwargs_defaults_and_overrides() {
        let spec = extractor_like();
        let mut args = ParsedArgs::new();
        args.insert(
            "dd".into(),
            OptionValue::List(vec!["gzip:gz".into(), "zip:zip".into()]),
        );

        let kwargs = Kwargs::resolve(spec.name, &spec.kwargs, argv(&spec, &args).unwrap()).unwrap();
        assert!(kwargs.enabled());
        assert_eq!(kwargs.int("matryoshka").unwrap(), 0);
        assert_eq!(kwargs.list("rules").unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_kwarg_rejected() {
        let spec = extractor_like();
        let err = Kwargs::resolve(
            spec.name,
            &spec.kwargs,
            vec![("bogus".to_string(), OptionValue::Bool(true))],
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownKwarg { .. }));
    }

    #[test]
    fn test_kwarg_type_mismatch_rejected() {
        let spec = extractor_like();
        let err = Kwargs::resolve(
            spec.name,
            &spec.kwargs,
            vec![("matryoshka".to_string(), OptionValue::Str("deep".into()))],
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_option_conflict_detected() {
        let mut registry = Registry::new();
        registry.register(extractor_like()).unwrap();
        registry
            .register(
                ModuleSpec::new("other", build)
                    .option(ModuleOption::flag("deep", "clashes on -M").short('M')),
            )
            .unwrap();

        let err = OptionTable::aggregate(&registry).unwrap_err();
        assert!(matches!(err, Error::OptionConflict { ref option, .. } if option == "deep"));
    }

    #[test]
    fn test_validate_unknown_option() {
        let mut registry = Registry::new();
        registry.register(extractor_like()).unwrap();
        let table = OptionTable::aggregate(&registry).unwrap();

        let mut args = ParsedArgs::new();
        args.insert("depth".into(), OptionValue::Int(1));
        assert!(table.validate(&args).is_ok());

        args.insert("nope".into(), OptionValue::Bool(true));
        assert!(table.validate(&args).is_err());
    }
}
