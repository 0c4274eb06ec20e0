//! Service registry

use super::spec::ServiceSpec;
use crate::error::{Result, SigilError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Static declarations of every service in a composition, keyed by name
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    /// Services indexed by name
    services: HashMap<String, Arc<ServiceSpec>>,
    /// Registration order
    order: Vec<String>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an ordered declaration list
    pub fn from_specs<I>(specs: I) -> Result<Self>
    where
        I: IntoIterator<Item = ServiceSpec>,
    {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    /// Register a service
    pub fn register(&mut self, spec: ServiceSpec) -> Result<()> {
        if self.services.contains_key(&spec.name) {
            return Err(SigilError::DuplicateName(spec.name));
        }

        self.order.push(spec.name.clone());
        self.services.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    /// Look up a service by name
    pub fn resolve(&self, name: &str) -> Result<Arc<ServiceSpec>> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| SigilError::UnknownService(name.to_string()))
    }

    /// Check whether a service is registered
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Service names in registration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Services in registration order
    pub fn specs(&self) -> impl Iterator<Item = &Arc<ServiceSpec>> {
        self.order.iter().filter_map(|name| self.services.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Expand `names` with their transitive dependencies, dependencies first
    pub fn start_order(&self, names: &[String]) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();

        for name in names {
            self.topological_sort(name, &mut visited, &mut visiting, &mut order)?;
        }

        Ok(order)
    }

    fn topological_sort(
        &self,
        service: &str,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if visited.contains(service) {
            return Ok(());
        }

        if visiting.contains(service) {
            return Err(SigilError::CircularDependency(service.to_string()));
        }

        let spec = self.resolve(service)?;
        visiting.insert(service.to_string());

        for dep in &spec.depends_on {
            self.topological_sort(dep, visited, visiting, order)?;
        }

        visiting.remove(service);
        visited.insert(service.to_string());
        order.push(service.to_string());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ServiceRegistry::new();
        registry
            .register(ServiceSpec::new("log").image("grafana/loki:2.4.1"))
            .unwrap();

        let spec = registry.resolve("log").unwrap();
        assert_eq!(spec.image.as_deref(), Some("grafana/loki:2.4.1"));
        assert!(matches!(
            registry.resolve("db"),
            Err(SigilError::UnknownService(name)) if name == "db"
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ServiceRegistry::new();
        registry.register(ServiceSpec::new("db")).unwrap();

        let result = registry.register(ServiceSpec::new("db"));
        assert!(matches!(result, Err(SigilError::DuplicateName(name)) if name == "db"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_keep_registration_order() {
        let registry = ServiceRegistry::from_specs(vec![
            ServiceSpec::new("log"),
            ServiceSpec::new("db"),
            ServiceSpec::new("driver"),
        ])
        .unwrap();

        assert_eq!(registry.names(), names(&["log", "db", "driver"]).as_slice());
    }

    #[test]
    fn test_start_order() {
        let registry = ServiceRegistry::from_specs(vec![
            ServiceSpec::new("web").depends_on("api"),
            ServiceSpec::new("api").depends_on("db"),
            ServiceSpec::new("db"),
        ])
        .unwrap();

        let order = registry.start_order(&names(&["web"])).unwrap();
        assert_eq!(order, names(&["db", "api", "web"]));

        let order = registry.start_order(&names(&["db", "web"])).unwrap();
        assert_eq!(order, names(&["db", "api", "web"]));
    }

    #[test]
    fn test_circular_dependency_detection() {
        let registry = ServiceRegistry::from_specs(vec![
            ServiceSpec::new("a").depends_on("b"),
            ServiceSpec::new("b").depends_on("a"),
        ])
        .unwrap();

        let result = registry.start_order(&names(&["a"]));
        assert!(matches!(result, Err(SigilError::CircularDependency(_))));
    }

    #[test]
    fn test_dangling_dependency() {
        let registry =
            ServiceRegistry::from_specs(vec![ServiceSpec::new("a").depends_on("ghost")]).unwrap();

        let result = registry.start_order(&names(&["a"]));
        assert!(matches!(result, Err(SigilError::UnknownService(name)) if name == "ghost"));
    }
}
