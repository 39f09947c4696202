//! Module registry for one configuration scope.
//!
//! # Responsibilities
//! - Turn rule descriptors into resolved, owned module bindings
//! - Preserve configuration order (= dispatch order)
//! - Publish whole registries atomically on reload
//!
//! # Design Decisions
//! - Keep-but-skip: an `off` rule is resolved and kept with
//!   `enabled = false`, never dropped, so it stays visible in summaries
//! - Arguments are copied; the registry does not borrow from the config
//! - A load failure fails the whole scope; nothing is silently omitted
//! - Immutable once built; `RegistryCell` swaps snapshots, in-flight
//!   dispatches keep the snapshot they started with

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::inspect::error::RegistryError;
use crate::inspect::loader::ModuleLoader;
use crate::inspect::module::{EntryPoint, ModuleArgument};

/// Literal that enables a rule.
pub const STATE_ON: &str = "on";
/// Literal that disables a rule.
pub const STATE_OFF: &str = "off";

/// Most module arguments the directive form accepts.
pub const MAX_DIRECTIVE_MODULE_ARGS: usize = 4;

/// One configured rule, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDescriptor {
    /// Module name; also the entry point symbol.
    pub name: String,
    pub library: PathBuf,
    /// `on` or `off`.
    pub state: String,
    pub args: Vec<String>,
}

impl RuleDescriptor {
    /// Parse the tokens following a `modules` directive:
    /// `<name> <library> <on|off> [arg...]`.
    pub fn from_directive<S: AsRef<str>>(tokens: &[S]) -> Result<Self, RegistryError> {
        if tokens.len() < 3 || tokens.len() > 3 + MAX_DIRECTIVE_MODULE_ARGS {
            return Err(RegistryError::DirectiveArity(tokens.len()));
        }

        Ok(Self {
            name: tokens[0].as_ref().to_string(),
            library: PathBuf::from(tokens[1].as_ref()),
            state: tokens[2].as_ref().to_string(),
            args: tokens[3..].iter().map(|t| t.as_ref().to_string()).collect(),
        })
    }
}

/// A resolved module with its arguments and enabled state.
pub struct ModuleBinding {
    name: Arc<str>,
    library: PathBuf,
    enabled: bool,
    arguments: Vec<ModuleArgument>,
    entry_point: EntryPoint,
}

impl ModuleBinding {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn library(&self) -> &PathBuf {
        &self.library
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn arguments(&self) -> &[ModuleArgument] {
        &self.arguments
    }

    pub fn entry_point(&self) -> &EntryPoint {
        &self.entry_point
    }
}

impl std::fmt::Debug for ModuleBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleBinding")
            .field("name", &self.name)
            .field("library", &self.library)
            .field("enabled", &self.enabled)
            .field("arguments", &self.arguments.len())
            .finish_non_exhaustive()
    }
}

/// Projection of a binding for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingSummary {
    pub name: String,
    pub library: String,
    pub enabled: bool,
    pub argument_count: usize,
}

/// Ordered, immutable collection of bindings.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    bindings: Vec<ModuleBinding>,
}

impl ModuleRegistry {
    /// A registry with no rules: inspection disabled for the scope.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve every rule, in order.
    pub fn build<'r, I>(rules: I, loader: &dyn ModuleLoader) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = &'r RuleDescriptor>,
    {
        let mut bindings = Vec::new();

        for (index, rule) in rules.into_iter().enumerate() {
            let rule_no = index + 1;

            let enabled = match rule.state.as_str() {
                STATE_ON => true,
                STATE_OFF => false,
                other => {
                    return Err(RegistryError::InvalidState {
                        rule: rule_no,
                        module: rule.name.clone(),
                        value: other.to_string(),
                    })
                }
            };

            let arguments = rule
                .args
                .iter()
                .enumerate()
                .map(|(i, token)| {
                    ModuleArgument::new(token).map_err(|source| RegistryError::Argument {
                        rule: rule_no,
                        module: rule.name.clone(),
                        index: i,
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let entry_point = loader.resolve(&rule.library, &rule.name).map_err(|source| {
                RegistryError::ModuleLoad {
                    rule: rule_no,
                    module: rule.name.clone(),
                    library: rule.library.clone(),
                    source,
                }
            })?;

            tracing::debug!(
                module = %rule.name,
                library = %rule.library.display(),
                enabled,
                args = arguments.len(),
                "Module bound"
            );

            bindings.push(ModuleBinding {
                name: Arc::from(rule.name.as_str()),
                library: rule.library.clone(),
                enabled,
                arguments,
                entry_point,
            });
        }

        Ok(Self { bindings })
    }

    /// Number of bindings, disabled ones included.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// All bindings in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &ModuleBinding> {
        self.bindings.iter()
    }

    /// Enabled bindings in dispatch order.
    pub fn enabled(&self) -> impl Iterator<Item = &ModuleBinding> {
        self.bindings.iter().filter(|b| b.enabled)
    }

    pub fn summary(&self) -> Vec<BindingSummary> {
        self.bindings
            .iter()
            .map(|b| BindingSummary {
                name: b.name.to_string(),
                library: b.library.display().to_string(),
                enabled: b.enabled,
                argument_count: b.arguments.len(),
            })
            .collect()
    }
}

/// Live registry of one scope, replaced wholesale on reload.
#[derive(Debug)]
pub struct RegistryCell {
    current: ArcSwap<ModuleRegistry>,
}

impl RegistryCell {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self {
            current: ArcSwap::from_pointee(registry),
        }
    }

    /// Snapshot for one dispatch.
    pub fn load(&self) -> Arc<ModuleRegistry> {
        self.current.load_full()
    }

    /// Replace the registry. Dispatches already running keep their snapshot.
    pub fn publish(&self, registry: ModuleRegistry) {
        self.current.store(Arc::new(registry));
    }
}

impl Default for RegistryCell {
    fn default() -> Self {
        Self::new(ModuleRegistry::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::error::LoadError;
    use crate::inspect::loader::BuiltinLoader;
    use crate::inspect::record::StatusCode;

    const LIB: &str = "/opt/mods/libtest.so";

    fn loader() -> BuiltinLoader {
        let mut loader = BuiltinLoader::new();
        loader.register_fn(LIB, "alpha", |_, _| StatusCode::Ok);
        loader.register_fn(LIB, "beta", |_, _| StatusCode::Ok);
        loader
    }

    fn rule(name: &str, state: &str, args: &[&str]) -> RuleDescriptor {
        RuleDescriptor {
            name: name.into(),
            library: LIB.into(),
            state: state.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_build_preserves_order_and_projection() {
        let rules = vec![
            rule("beta", "on", &["x", "y"]),
            rule("alpha", "off", &[]),
            rule("beta", "on", &["z"]),
        ];
        let registry = ModuleRegistry::build(&rules, &loader()).unwrap();

        let projected: Vec<_> = registry
            .summary()
            .into_iter()
            .map(|s| (s.name, s.enabled, s.argument_count))
            .collect();
        let expected: Vec<_> = rules
            .iter()
            .map(|r| (r.name.clone(), r.state == "on", r.args.len()))
            .collect();
        assert_eq!(projected, expected);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.enabled().count(), 2);
    }

    #[test]
    fn test_each_argument_copied_to_its_own_slot() {
        let rules = vec![rule("alpha", "on", &["first", "second", "third"])];
        let registry = ModuleRegistry::build(&rules, &loader()).unwrap();
        let binding = registry.iter().next().unwrap();
        let args: Vec<_> = binding.arguments().iter().map(|a| a.as_str().unwrap()).collect();
        assert_eq!(args, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_load_failure_names_rule_and_library() {
        let rules = vec![rule("alpha", "on", &[]), rule("gamma", "on", &[])];
        let err = ModuleRegistry::build(&rules, &loader()).unwrap_err();
        match err {
            RegistryError::ModuleLoad { rule, module, library, source } => {
                assert_eq!(rule, 2);
                assert_eq!(module, "gamma");
                assert_eq!(library, PathBuf::from(LIB));
                assert!(matches!(source, LoadError::SymbolNotFound { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_state_rejected() {
        let rules = vec![rule("alpha", "maybe", &[])];
        assert!(matches!(
            ModuleRegistry::build(&rules, &loader()),
            Err(RegistryError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_oversized_argument_rejected() {
        let long = "a".repeat(256);
        let rules = vec![rule("alpha", "on", &[long.as_str()])];
        assert!(matches!(
            ModuleRegistry::build(&rules, &loader()),
            Err(RegistryError::Argument { index: 0, .. })
        ));
    }

    #[test]
    fn test_directive_parsing() {
        let rule = RuleDescriptor::from_directive(&["dump", "builtin", "on", "/tmp", "verbose"]).unwrap();
        assert_eq!(rule.name, "dump");
        assert_eq!(rule.library, PathBuf::from("builtin"));
        assert_eq!(rule.state, "on");
        assert_eq!(rule.args, vec!["/tmp", "verbose"]);

        assert!(matches!(
            RuleDescriptor::from_directive(&["dump", "builtin"]),
            Err(RegistryError::DirectiveArity(2))
        ));
        assert!(matches!(
            RuleDescriptor::from_directive(&["a", "b", "on", "1", "2", "3", "4", "5"]),
            Err(RegistryError::DirectiveArity(8))
        ));
    }

    #[test]
    fn test_cell_publish_keeps_old_snapshot() {
        let cell = RegistryCell::default();
        let before = cell.load();
        assert!(before.is_empty());

        let rules = vec![rule("alpha", "on", &[])];
        cell.publish(ModuleRegistry::build(&rules, &loader()).unwrap());

        assert!(before.is_empty());
        assert_eq!(cell.load().len(), 1);
    }
}
