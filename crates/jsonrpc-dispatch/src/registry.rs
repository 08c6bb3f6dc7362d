//! Method registry: `service -> method -> handler`.
//!
//! Directly registered handlers live in the default service and are addressed
//! by their bare name. Services installed through [`RpcService`] are addressed
//! as `Service.method`; the split happens on the last `.`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::RegistryError;

/// A registered method. Handlers run synchronously and report through the
/// context they are given.
pub type Handler = Arc<dyn Fn(&mut RequestContext) + Send + Sync>;

/// A receiver whose methods are exported as `Name.method`.
///
/// Usually implemented with `#[rpc_service]` on an inherent `impl` block.
pub trait RpcService: Send + Sync + 'static {
    /// Bind every exported method to this receiver.
    fn methods(self: Arc<Self>) -> Vec<(&'static str, Handler)>;
}

#[derive(Default)]
struct Services {
    default: HashMap<String, Handler>,
    named: HashMap<String, HashMap<String, Handler>>,
}

/// Registry of handlers, safe to mutate while lookups are in flight.
#[derive(Default)]
pub struct MethodRegistry {
    services: RwLock<Services>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `method` in the default service. A later
    /// registration of the same name replaces the earlier one.
    pub fn register_handler<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(&mut RequestContext) + Send + Sync + 'static,
    {
        self.insert_handler(method, Arc::new(handler));
    }

    pub fn insert_handler(&self, method: impl Into<String>, handler: Handler) {
        let method = method.into();
        if method.contains('.') {
            warn!(
                method = %method,
                "handler name contains '.', lookups will route it to a named service"
            );
        }
        if self.services.write().default.insert(method.clone(), handler).is_some() {
            warn!(method = %method, "replaced existing handler");
        }
    }

    /// Install a service under the last path segment of its type name.
    pub fn register_service<S>(&self, service: Arc<S>) -> Result<(), RegistryError>
    where
        S: RpcService,
    {
        let name = derive_service_name(std::any::type_name::<S>())?;
        self.install(name, service.methods())
    }

    /// Install a service under an explicit name.
    pub fn register_service_named<S>(&self, name: impl Into<String>, service: Arc<S>) -> Result<(), RegistryError>
    where
        S: RpcService,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::NoServiceName(std::any::type_name::<S>().to_string()));
        }
        self.install(name, service.methods())
    }

    fn install(&self, name: String, methods: Vec<(&'static str, Handler)>) -> Result<(), RegistryError> {
        let mut services = self.services.write();
        if services.named.contains_key(&name) {
            return Err(RegistryError::DuplicateService(name));
        }
        if methods.is_empty() {
            warn!(service = %name, "service exports no methods");
        }
        debug!(service = %name, methods = methods.len(), "registered service");
        let table = methods
            .into_iter()
            .map(|(method, handler)| (method.to_string(), handler))
            .collect();
        services.named.insert(name, table);
        Ok(())
    }

    /// Resolve a method string. `None` means no such service or method.
    pub fn lookup(&self, method: &str) -> Option<Handler> {
        let services = self.services.read();
        match method.rsplit_once('.') {
            None => services.default.get(method).cloned(),
            Some((service, name)) => services.named.get(service)?.get(name).cloned(),
        }
    }

    /// Fully qualified names of every registered method, sorted.
    pub fn registered_methods(&self) -> Vec<String> {
        let services = self.services.read();
        let mut names: Vec<String> = services.default.keys().cloned().collect();
        for (service, methods) in &services.named {
            names.extend(methods.keys().map(|method| format!("{service}.{method}")));
        }
        names.sort();
        names
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.registered_methods())
            .finish()
    }
}

/// Service name for a Rust type path as produced by [`std::any::type_name`].
///
/// Generic arguments are dropped and the last path segment is kept, so
/// `my_app::rpc::Arith<u32>` becomes `Arith`. Anonymous or structural types
/// (references, tuples, slices, closures) have no name; names that do not
/// start with an uppercase letter are treated as unexported.
pub fn derive_service_name(type_name: &str) -> Result<String, RegistryError> {
    let no_name = || RegistryError::NoServiceName(type_name.to_string());

    if type_name.starts_with(['&', '*', '(', '[']) {
        return Err(no_name());
    }
    let path = type_name.split('<').next().unwrap_or_default();
    let name = path.rsplit("::").next().unwrap_or_default();

    let mut chars = name.chars();
    let first = chars.next().ok_or_else(no_name)?;
    let is_ident = (first.is_alphabetic() || first == '_') && chars.all(|c| c.is_alphanumeric() || c == '_');
    if !is_ident {
        return Err(no_name());
    }
    if !first.is_ascii_uppercase() {
        return Err(RegistryError::ServiceNotExported(name.to_string()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    struct Arith;

    impl RpcService for Arith {
        fn methods(self: Arc<Self>) -> Vec<(&'static str, Handler)> {
            let add: Handler = Arc::new(|ctx: &mut RequestContext| ctx.set_result(json!("add")));
            vec![("add", add)]
        }
    }

    struct Generic<T>(std::marker::PhantomData<T>);

    impl<T: Send + Sync + 'static> RpcService for Generic<T> {
        fn methods(self: Arc<Self>) -> Vec<(&'static str, Handler)> {
            Vec::new()
        }
    }

    #[test]
    fn test_default_service_lookup() {
        let registry = MethodRegistry::new();
        registry.register_handler("echo", |_ctx: &mut RequestContext| {});
        assert!(registry.lookup("echo").is_some());
        assert!(registry.lookup("missing").is_none());
        assert!(registry.lookup(".echo").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let registry = MethodRegistry::new();
        registry.register_handler("v", |ctx: &mut RequestContext| ctx.set_result(json!(1)));
        registry.register_handler("v", |ctx: &mut RequestContext| ctx.set_result(json!(2)));

        let mut ctx = RequestContext::default();
        (registry.lookup("v").unwrap())(&mut ctx);
        assert!(matches!(ctx.result(), Some(crate::Payload::Node(v)) if *v == json!(2)));
    }

    #[test]
    fn test_named_service_lookup() {
        let registry = MethodRegistry::new();
        registry.register_service(Arc::new(Arith)).unwrap();
        assert!(registry.lookup("Arith.add").is_some());
        assert!(registry.lookup("Arith.sub").is_none());
        assert!(registry.lookup("add").is_none());
        assert!(registry.lookup("Other.add").is_none());
    }

    #[test]
    fn test_split_on_last_dot() {
        let registry = MethodRegistry::new();
        registry.register_service_named("math.v1", Arc::new(Arith)).unwrap();
        assert!(registry.lookup("math.v1.add").is_some());
        assert!(registry.lookup("v1.add").is_none());
    }

    #[test]
    fn test_registration_errors() {
        let registry = MethodRegistry::new();
        registry.register_service(Arc::new(Arith)).unwrap();
        assert_eq!(
            registry.register_service(Arc::new(Arith)),
            Err(RegistryError::DuplicateService("Arith".to_string()))
        );
        assert!(matches!(
            registry.register_service_named("", Arc::new(Arith)),
            Err(RegistryError::NoServiceName(_))
        ));
        registry.register_service_named("Calc", Arc::new(Arith)).unwrap();
    }

    #[test]
    fn test_generic_service_name() {
        let registry = MethodRegistry::new();
        registry
            .register_service(Arc::new(Generic::<Vec<u8>>(std::marker::PhantomData)))
            .unwrap();
        assert_eq!(registry.registered_methods(), Vec::<String>::new());
        assert!(matches!(
            registry.register_service(Arc::new(Generic::<u8>(std::marker::PhantomData))),
            Err(RegistryError::DuplicateService(name)) if name == "Generic"
        ));
    }

    #[test]
    fn test_derive_service_name() {
        assert_eq!(derive_service_name("app::rpc::Arith").unwrap(), "Arith");
        assert_eq!(derive_service_name("Arith").unwrap(), "Arith");
        assert_eq!(derive_service_name("app::Cache<alloc::string::String>").unwrap(), "Cache");
        assert_eq!(
            derive_service_name("i32"),
            Err(RegistryError::ServiceNotExported("i32".to_string()))
        );
        assert_eq!(
            derive_service_name("app::lower"),
            Err(RegistryError::ServiceNotExported("lower".to_string()))
        );
        for anonymous in ["&str", "(i32, u8)", "[u8]", "*const u8", "app::main::{{closure}}", ""] {
            assert!(
                matches!(derive_service_name(anonymous), Err(RegistryError::NoServiceName(_))),
                "{anonymous}"
            );
        }
    }

    #[test]
    fn test_registered_methods_sorted() {
        let registry = MethodRegistry::new();
        registry.register_handler("zeta", |_ctx: &mut RequestContext| {});
        registry.register_handler("alpha", |_ctx: &mut RequestContext| {});
        registry.register_service(Arc::new(Arith)).unwrap();
        assert_eq!(registry.registered_methods(), vec!["Arith.add", "alpha", "zeta"]);
    }

    #[traced_test]
    #[test]
    fn test_dotted_handler_name_warns() {
        let registry = MethodRegistry::new();
        registry.register_handler("a.b", |_ctx: &mut RequestContext| {});
        assert!(logs_contain("handler name contains '.'"));
        assert!(registry.lookup("a.b").is_none());
    }
}
