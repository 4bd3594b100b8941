use std::fmt;
use std::sync::Arc;

use lfs_api::BASIC_ADAPTER;
use lfs_store::ContentStore;
use lfs_types::Direction;
use tracing::warn;

use crate::adapter::TransferAdapter;
use crate::basic::BasicTransfer;
use crate::config::TransferConfig;
use crate::error::Result;

/// Builds a fresh adapter for one direction.
pub type AdapterFactory = Arc<dyn Fn(Direction) -> Arc<dyn TransferAdapter> + Send + Sync>;

struct Registration {
    name: String,
    direction: Direction,
    factory: AdapterFactory,
}

/// Registry of transfer adapters, by name and direction.
#[derive(Default)]
pub struct AdapterManifest {
    adapters: Vec<Registration>,
}

impl AdapterManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manifest with the `basic` adapter registered both ways.
    pub fn with_basic(store: ContentStore, http: reqwest::Client) -> Self {
        let mut manifest = Self::new();
        let factory: AdapterFactory = Arc::new(move |direction: Direction| -> Arc<dyn TransferAdapter> {
            Arc::new(BasicTransfer::adapter(direction, store.clone(), http.clone()))
        });
        manifest.register(BASIC_ADAPTER, Direction::Download, Arc::clone(&factory));
        manifest.register(BASIC_ADAPTER, Direction::Upload, factory);
        manifest
    }

    /// [`AdapterManifest::with_basic`] with an HTTP client built from
    /// `config.http`.
    pub fn from_config(store: ContentStore, config: &TransferConfig) -> Result<Self> {
        let http = config.http.build_client()?;
        Ok(Self::with_basic(store, http))
    }

    /// Register `factory` under `name`. A later registration of the same
    /// name and direction replaces the earlier one.
    pub fn register(&mut self, name: impl Into<String>, direction: Direction, factory: AdapterFactory) {
        let name = name.into();
        self.adapters
            .retain(|r| !(r.name == name && r.direction == direction));
        self.adapters.push(Registration {
            name,
            direction,
            factory,
        });
    }

    pub fn is_registered(&self, name: &str, direction: Direction) -> bool {
        self.adapters
            .iter()
            .any(|r| r.name == name && r.direction == direction)
    }

    /// Registered names for `direction`, in registration order.
    pub fn names(&self, direction: Direction) -> Vec<String> {
        self.adapters
            .iter()
            .filter(|r| r.direction == direction)
            .map(|r| r.name.clone())
            .collect()
    }

    /// Names to advertise in a batch request, honoring the enabled list
    /// and `basic_transfers_only`.
    pub fn advertised(&self, direction: Direction, config: &TransferConfig) -> Vec<String> {
        if config.basic_transfers_only {
            return vec![BASIC_ADAPTER.to_string()];
        }
        if config.adapters.is_empty() {
            return self.names(direction);
        }
        config
            .adapters
            .iter()
            .filter(|name| self.is_registered(name, direction))
            .cloned()
            .collect()
    }

    /// The name that [`AdapterManifest::new_adapter_or_default`] will use for `name`.
    pub fn resolve(&self, name: &str, direction: Direction) -> Option<String> {
        if self.is_registered(name, direction) {
            return Some(name.to_string());
        }
        if self.is_registered(BASIC_ADAPTER, direction) {
            warn!(adapter = name, "unknown transfer adapter, falling back to basic");
            return Some(BASIC_ADAPTER.to_string());
        }
        None
    }

    pub fn new_adapter(&self, name: &str, direction: Direction) -> Option<Arc<dyn TransferAdapter>> {
        self.adapters
            .iter()
            .find(|r| r.name == name && r.direction == direction)
            .map(|r| (r.factory)(direction))
    }

    /// Build `name`, or `basic` if `name` is not registered.
    pub fn new_adapter_or_default(
        &self,
        name: &str,
        direction: Direction,
    ) -> Option<Arc<dyn TransferAdapter>> {
        let resolved = self.resolve(name, direction)?;
        self.new_adapter(&resolved, direction)
    }
}

impl fmt::Debug for AdapterManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.adapters.iter().map(|r| (&r.name, r.direction)))
            .finish()
    }
}
