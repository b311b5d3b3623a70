//! Command routing.
//!
//! A [`Router`] turns a raw command string such as `"demo/greet|cli/cat"` into
//! an ordered list of [`CommandDescriptor`]s. It holds a stack of
//! [`Resolver`]s; the first one returning a non-empty list wins, and the
//! built-in resolver always runs last.
//!
//! The built-in resolver splits the raw string on the chain separator and
//! resolves every segment on its own:
//!
//! - `/demo/greet` is already rooted: the leading `/` is dropped
//! - `demo/greet` gets the configured api root prepended (if any)
//! - `cli/<name>` maps to a registered external executable
//! - otherwise the last path segment is the method and the rest the type
//!
//! Segments that map to nothing are skipped and reported as `NotFound`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use serde_json::Value;

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::metadata::MetadataCache;
use crate::value::InputMap;

/// Splits a slash path into its non-empty, trimmed segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// `" /a//b/ "` → `"a/b"`.
pub fn normalize_path(path: &str) -> String {
    split_path(path).join("/")
}

/// What a descriptor invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorTarget {
    Method { type_name: String, method: String },
    External { name: String, executable: PathBuf },
}

/// One resolved invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDescriptor {
    /// Result map key: the normalized resolved path.
    pub label: String,
    /// The chain segment this descriptor came from.
    pub raw: String,
    pub target: DescriptorTarget,
    /// Inputs bound by the resolver, layered over the request input.
    pub bound: InputMap,
}

impl CommandDescriptor {
    pub fn method(
        raw: impl Into<String>,
        type_name: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        let type_name = type_name.into();
        let method = method.into();
        Self {
            label: format!("{}/{}", type_name, method),
            raw: raw.into(),
            target: DescriptorTarget::Method { type_name, method },
            bound: InputMap::new(),
        }
    }

    pub fn external(
        raw: impl Into<String>,
        label: impl Into<String>,
        name: impl Into<String>,
        executable: impl Into<PathBuf>,
    ) -> Self {
        Self {
            label: label.into(),
            raw: raw.into(),
            target: DescriptorTarget::External {
                name: name.into(),
                executable: executable.into(),
            },
            bound: InputMap::new(),
        }
    }

    /// Adds a per-descriptor input.
    pub fn bind(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bound.insert(key.into(), value.into());
        self
    }

    /// Path used for hook matching: `"/" + label`.
    pub fn hook_path(&self) -> String {
        format!("/{}", self.label)
    }

    pub fn is_external(&self) -> bool {
        matches!(self.target, DescriptorTarget::External { .. })
    }
}

/// A pluggable resolution strategy.
///
/// Returning an empty list passes the raw string on to the next resolver.
pub type Resolver = Rc<dyn Fn(&str, &RouteScope<'_>) -> Vec<CommandDescriptor>>;

/// Router settings taken from [`DispatchConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct RouterSettings {
    pub api_root: String,
    pub chain_separator: String,
    pub cli_prefix: String,
    pub default_method: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            api_root: String::new(),
            chain_separator: "|".to_string(),
            cli_prefix: "cli".to_string(),
            default_method: "index".to_string(),
        }
    }
}

/// What a resolver can see while resolving one raw string.
pub struct RouteScope<'a> {
    metadata: &'a MetadataCache,
    settings: &'a RouterSettings,
    executables: &'a BTreeMap<String, PathBuf>,
    diagnostics: RefCell<Vec<DispatchError>>,
}

impl<'a> RouteScope<'a> {
    fn new(
        metadata: &'a MetadataCache,
        settings: &'a RouterSettings,
        executables: &'a BTreeMap<String, PathBuf>,
    ) -> Self {
        Self {
            metadata,
            settings,
            executables,
            diagnostics: RefCell::default(),
        }
    }

    pub fn metadata(&self) -> &MetadataCache {
        self.metadata
    }

    pub fn settings(&self) -> &RouterSettings {
        self.settings
    }

    /// Splits a raw command on the chain separator, dropping blank segments.
    pub fn split_chain<'r>(&self, raw: &'r str) -> Vec<&'r str> {
        let separator = self.settings.chain_separator.as_str();
        if separator.is_empty() {
            return vec![raw.trim()].into_iter().filter(|s| !s.is_empty()).collect();
        }
        raw.split(separator)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Applies the api-root rewrite and normalizes the token.
    ///
    /// Tokens under the cli prefix are never rooted.
    pub fn rooted(&self, token: &str) -> String {
        let token = token.trim();
        let normalized = normalize_path(token);
        let is_cli = split_path(&normalized).first() == Some(&self.settings.cli_prefix.as_str());
        if token.starts_with('/') || is_cli || self.settings.api_root.is_empty() {
            normalized
        } else {
            normalize_path(&format!("{}/{}", self.settings.api_root, normalized))
        }
    }

    /// Maps a normalized path to a descriptor without recording diagnostics.
    pub fn lookup(&self, raw: &str, path: &str) -> Option<CommandDescriptor> {
        let segments = split_path(path);
        match segments.as_slice() {
            [] => None,
            [prefix, rest @ ..] if *prefix == self.settings.cli_prefix => {
                if rest.is_empty() {
                    return None;
                }
                let name = rest.join("/");
                self.executables.get(&name).map(|executable| {
                    CommandDescriptor::external(raw, path, name.clone(), executable.clone())
                })
            }
            [single] => {
                let method = self.settings.default_method.as_str();
                self.metadata
                    .has_method(single, method)
                    .then(|| CommandDescriptor::method(raw, *single, method))
            }
            [type_path @ .., method] => {
                let type_name = type_path.join("/");
                self.metadata
                    .has_method(&type_name, method)
                    .then(|| CommandDescriptor::method(raw, type_name.clone(), *method))
            }
        }
    }

    /// Roots and looks up one chain segment, recording `NotFound` on a miss.
    pub fn resolve_segment(&self, segment: &str) -> Option<CommandDescriptor> {
        let path = self.rooted(segment);
        let found = self.lookup(segment, &path);
        if found.is_none() {
            tracing::debug!(segment, path = %path, "unmapped command segment");
            self.not_found(path);
        }
        found
    }

    /// Records a non-fatal `NotFound` diagnostic.
    pub fn not_found(&self, target: impl Into<String>) {
        self.diagnostics.borrow_mut().push(DispatchError::NotFound {
            target: target.into(),
        });
    }

    fn into_diagnostics(self) -> Vec<DispatchError> {
        self.diagnostics.into_inner()
    }
}

/// Descriptors plus the non-fatal problems found while resolving.
#[derive(Debug, Default)]
pub struct Resolution {
    pub descriptors: Vec<CommandDescriptor>,
    pub diagnostics: Vec<DispatchError>,
}

/// Resolver stack with a built-in fallback.
#[derive(Clone, Default)]
pub struct Router {
    resolvers: Vec<Resolver>,
    settings: RouterSettings,
    executables: BTreeMap<String, PathBuf>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            resolvers: Vec::new(),
            settings: RouterSettings {
                api_root: normalize_path(&config.api_root),
                chain_separator: config.chain_separator.clone(),
                cli_prefix: config.cli_prefix.clone(),
                default_method: config.default_method.clone(),
            },
            executables: config
                .executables
                .iter()
                .map(|(name, path)| (normalize_path(name), path.clone()))
                .collect(),
        }
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub fn set_api_root(&mut self, root: &str) -> &mut Self {
        self.settings.api_root = normalize_path(root);
        self
    }

    /// Puts `resolver` on top of the stack.
    pub fn prepend<F>(&mut self, resolver: F) -> &mut Self
    where
        F: Fn(&str, &RouteScope<'_>) -> Vec<CommandDescriptor> + 'static,
    {
        self.resolvers.insert(0, Rc::new(resolver));
        self
    }

    pub fn prepend_resolver(&mut self, resolver: Resolver) -> &mut Self {
        self.resolvers.insert(0, resolver);
        self
    }

    /// Maps `cli/<name>` to an executable.
    pub fn executable(&mut self, name: impl AsRef<str>, path: impl Into<PathBuf>) -> &mut Self {
        self.executables
            .insert(normalize_path(name.as_ref()), path.into());
        self
    }

    pub fn executables(&self) -> &BTreeMap<String, PathBuf> {
        &self.executables
    }

    /// Resolves `raw`.
    ///
    /// Only the winning resolver's diagnostics are kept; when every custom
    /// resolver comes back empty, the built-in one reports.
    pub fn resolve(&self, raw: &str, metadata: &MetadataCache) -> Resolution {
        for (index, resolver) in self.resolvers.iter().enumerate() {
            let scope = RouteScope::new(metadata, &self.settings, &self.executables);
            let descriptors = resolver(raw, &scope);
            if !descriptors.is_empty() {
                tracing::debug!(raw, resolver = index, count = descriptors.len(), "resolved");
                return Resolution {
                    descriptors,
                    diagnostics: scope.into_diagnostics(),
                };
            }
        }

        let scope = RouteScope::new(metadata, &self.settings, &self.executables);
        let descriptors = default_resolver(raw, &scope);
        tracing::debug!(raw, count = descriptors.len(), "resolved by default resolver");
        Resolution {
            descriptors,
            diagnostics: scope.into_diagnostics(),
        }
    }

    /// A resolver that treats the last path segment as an argument.
    ///
    /// `"demo/greet/Alice"` resolves to `demo/greet` with `name = "Alice"`
    /// bound when `demo/greet/Alice` itself is unmapped. Falls through (empty
    /// result) if any chain segment cannot be resolved this way.
    pub fn trailing_argument(param: impl Into<String>) -> Resolver {
        let param = param.into();
        Rc::new(move |raw: &str, scope: &RouteScope<'_>| {
            let mut out = Vec::new();
            for segment in scope.split_chain(raw) {
                let path = scope.rooted(segment);
                if let Some(found) = scope.lookup(segment, &path) {
                    out.push(found);
                    continue;
                }
                let Some((parent, tail)) = path.rsplit_once('/') else {
                    return Vec::new();
                };
                match scope.lookup(segment, parent) {
                    Some(found) if !found.is_external() => {
                        out.push(found.bind(param.clone(), tail))
                    }
                    _ => return Vec::new(),
                }
            }
            out
        })
    }
}

fn default_resolver(raw: &str, scope: &RouteScope<'_>) -> Vec<CommandDescriptor> {
    scope
        .split_chain(raw)
        .into_iter()
        .filter_map(|segment| scope.resolve_segment(segment))
        .collect()
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("resolvers", &self.resolvers.len())
            .field("settings", &self.settings)
            .field("executables", &self.executables)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TypeDef, TypeRegistry};
    use crate::value::into_value;
    use serde_json::json;

    fn metadata() -> MetadataCache {
        let mut registry = TypeRegistry::new();
        for (ty, method) in [
            ("demo", "greet"),
            ("a", "b"),
            ("c", "d"),
            ("api/users", "list"),
            ("x", "index"),
        ] {
            let def = registry
                .get(ty)
                .cloned()
                .unwrap_or_else(|| TypeDef::new(ty))
                .static_method(method, Vec::new(), |_| into_value("ok"));
            registry.register(def);
        }
        MetadataCache::new(registry)
    }

    fn labels(resolution: &Resolution) -> Vec<&str> {
        resolution
            .descriptors
            .iter()
            .map(|d| d.label.as_str())
            .collect()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(" /a//b/ "), "a/b");
        assert_eq!(normalize_path("///"), "");
        assert_eq!(split_path("a/ b /c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_chain_in_order() {
        let router = Router::new();
        let res = router.resolve("c/d | a/b", &metadata());
        assert_eq!(labels(&res), vec!["c/d", "a/b"]);
        assert!(res.diagnostics.is_empty());
        assert_eq!(res.descriptors[0].raw, "c/d");
    }

    #[test]
    fn test_unmapped_segment_is_skipped_with_diagnostic() {
        let router = Router::new();
        let res = router.resolve("a/b|nope/none|c/d", &metadata());
        assert_eq!(labels(&res), vec!["a/b", "c/d"]);
        assert_eq!(res.diagnostics.len(), 1);
        assert!(matches!(
            &res.diagnostics[0],
            DispatchError::NotFound { target } if target == "nope/none"
        ));
    }

    #[test]
    fn test_api_root_rewrite() {
        let mut router = Router::new();
        router.set_api_root("/api/");
        let res = router.resolve("users/list|/demo/greet", &metadata());
        assert_eq!(labels(&res), vec!["api/users/list", "demo/greet"]);
    }

    #[test]
    fn test_single_segment_uses_default_method() {
        let res = Router::new().resolve("x", &metadata());
        assert_eq!(labels(&res), vec!["x/index"]);
        assert_eq!(
            res.descriptors[0].target,
            DescriptorTarget::Method {
                type_name: "x".into(),
                method: "index".into()
            }
        );
    }

    #[test]
    fn test_cli_prefix_maps_executables() {
        let mut router = Router::new();
        router.set_api_root("api").executable("cat", "/bin/cat");
        let res = router.resolve("cli/cat|cli/missing", &metadata());
        assert_eq!(labels(&res), vec!["cli/cat"]);
        assert_eq!(
            res.descriptors[0].target,
            DescriptorTarget::External {
                name: "cat".into(),
                executable: PathBuf::from("/bin/cat")
            }
        );
        assert_eq!(res.diagnostics.len(), 1);
    }

    #[test]
    fn test_config_executable_names_are_normalized() {
        let config = DispatchConfig::from_yaml_str(
            "executables:\n  /cat/: /bin/cat\n  tools//jq: /usr/bin/jq\n",
        )
        .unwrap();
        let router = Router::from_config(&config);
        assert!(router.executables().contains_key("cat"));
        assert!(router.executables().contains_key("tools/jq"));

        let res = router.resolve("cli/cat|cli/tools/jq", &metadata());
        assert_eq!(labels(&res), vec!["cli/cat", "cli/tools/jq"]);
        assert!(res.diagnostics.is_empty());
    }

    #[test]
    fn test_first_non_empty_resolver_wins() {
        let mut router = Router::new();
        router.prepend(|_, _| Vec::new());
        router.prepend(|raw, scope| {
            if raw == "alias" {
                scope.resolve_segment("demo/greet").into_iter().collect()
            } else {
                Vec::new()
            }
        });

        let res = router.resolve("alias", &metadata());
        assert_eq!(labels(&res), vec!["demo/greet"]);
        assert_eq!(res.descriptors[0].raw, "demo/greet");

        // both custom resolvers decline; the fallback still resolves
        let res = router.resolve("x", &metadata());
        assert_eq!(labels(&res), vec!["x/index"]);
    }

    #[test]
    fn test_prepend_puts_resolver_on_top() {
        let mut router = Router::new();
        router.prepend(|raw, _| vec![CommandDescriptor::method(raw, "a", "b")]);
        router.prepend(|raw, _| vec![CommandDescriptor::method(raw, "c", "d")]);
        let res = router.resolve("anything", &metadata());
        assert_eq!(labels(&res), vec!["c/d"]);
    }

    #[test]
    fn test_declined_resolver_diagnostics_are_dropped() {
        let mut router = Router::new();
        router.prepend(|raw, scope| {
            scope.not_found(raw);
            Vec::new()
        });
        let res = router.resolve("a/b", &metadata());
        assert_eq!(labels(&res), vec!["a/b"]);
        assert!(res.diagnostics.is_empty());
    }

    #[test]
    fn test_trailing_argument_resolver() {
        let mut router = Router::new();
        router.prepend_resolver(Router::trailing_argument("name"));

        let res = router.resolve("demo/greet/Alice|a/b", &metadata());
        assert_eq!(labels(&res), vec!["demo/greet", "a/b"]);
        assert_eq!(res.descriptors[0].bound.get("name"), Some(&json!("Alice")));
        assert!(res.descriptors[1].bound.is_empty());

        // unresolvable tail falls through to the default resolver
        let res = router.resolve("nope/x/y", &metadata());
        assert!(res.descriptors.is_empty());
        assert_eq!(res.diagnostics.len(), 1);
    }

    #[test]
    fn test_custom_separator() {
        let config = DispatchConfig {
            chain_separator: ",".into(),
            ..DispatchConfig::default()
        };
        let router = Router::from_config(&config);
        let res = router.resolve("a/b,c/d", &metadata());
        assert_eq!(labels(&res), vec!["a/b", "c/d"]);
    }

    #[test]
    fn test_hook_path() {
        let d = CommandDescriptor::method("a/b", "a", "b");
        assert_eq!(d.hook_path(), "/a/b");
    }
}
