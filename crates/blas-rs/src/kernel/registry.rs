//! Runtime kernel-set registry for selecting numeric implementations by name.
//!
//! The portable kernels are always present. Other crates add their kernel sets with
//! [`register_kernels`]; handles resolve a set through [`create_kernels`] or
//! [`resolve_kernels`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::{BlasKernels, PortableKernels};

/// Factory function that creates a new kernel-set instance.
pub type KernelsConstructor = Box<dyn Fn() -> Arc<dyn BlasKernels> + Send + Sync>;

/// Global registry mapping kernel-set names to constructors.
struct KernelRegistry {
    kernels: RwLock<HashMap<String, KernelsConstructor>>,
}

impl KernelRegistry {
    fn new() -> Self {
        let mut kernels: HashMap<String, KernelsConstructor> = HashMap::new();
        kernels.insert(
            PortableKernels::NAME.to_string(),
            Box::new(|| Arc::new(PortableKernels::new()) as Arc<dyn BlasKernels>),
        );
        Self {
            kernels: RwLock::new(kernels),
        }
    }

    fn register(&self, name: String, constructor: KernelsConstructor) {
        self.kernels.write().insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Arc<dyn BlasKernels>> {
        let registry = self.kernels.read();
        let constructor = registry.get(name)?;
        Some(constructor())
    }

    fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kernels.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn contains(&self, name: &str) -> bool {
        self.kernels.read().contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<KernelRegistry> = OnceLock::new();

fn global_registry() -> &'static KernelRegistry {
    GLOBAL_REGISTRY.get_or_init(KernelRegistry::new)
}

/// Registers a kernel set under `name`, replacing any previous registration.
///
/// The constructor runs each time a handle requests the set.
///
/// # Example
/// ```ignore
/// use blas_rs::kernel::registry::register_kernels;
///
/// pub fn register() {
///     register_kernels("my_kernels", || Arc::new(MyKernels::new()));
/// }
/// ```
pub fn register_kernels<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Arc<dyn BlasKernels> + Send + Sync + 'static,
{
    let name = name.into();
    log::debug!("registering kernel set {name}");
    global_registry().register(name, Box::new(constructor));
}

/// Creates a kernel set by name, or `None` when nothing is registered under it.
pub fn create_kernels(name: &str) -> Option<Arc<dyn BlasKernels>> {
    global_registry().create(name)
}

/// Creates the named kernel set, falling back to the portable kernels with a warning.
pub fn resolve_kernels(name: &str) -> Arc<dyn BlasKernels> {
    match create_kernels(name) {
        Some(kernels) => kernels,
        None => {
            log::warn!(
                "kernel set {name:?} is not registered (have {:?}); using {}",
                list_kernels(),
                PortableKernels::NAME
            );
            Arc::new(PortableKernels::new())
        }
    }
}

/// Lists registered kernel-set names in sorted order.
pub fn list_kernels() -> Vec<String> {
    global_registry().list()
}

pub fn has_kernels(name: &str) -> bool {
    global_registry().contains(name)
}
