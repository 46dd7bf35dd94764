//! Devfile registry aggregation.
//!
//! Catalogs of every configured registry are fetched in parallel through
//! [`ConcurrentTasks`]. Each task writes into its own slot of a
//! priority-indexed result vector, so the output order does not depend on
//! which registry answers first.

pub mod catalog;

use crate::error::Result;
use crate::tasks::ConcurrentTasks;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

pub use catalog::{CatalogSource, DirectoryCatalog, IndexEntry, StackVersion};

/// A configured registry endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub secure: bool,
}

/// A stack offered by a registry, tagged with the registry's priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevfileStack {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub language: String,
    pub project_type: String,
    pub tags: Vec<String>,
    pub architectures: Vec<String>,
    pub default_version: String,
    pub default_starter_projects: Vec<String>,
    pub versions: Vec<StackVersion>,
    pub registry: Registry,
    /// Position of the registry in the searched list; 0 is searched first
    pub priority: usize,
}

impl DevfileStack {
    fn from_entry(entry: IndexEntry, registry: &Registry) -> Self {
        let mut stack = DevfileStack {
            name: entry.name,
            display_name: entry.display_name,
            description: entry.description,
            language: entry.language,
            project_type: entry.project_type,
            tags: entry.tags,
            architectures: entry.architectures,
            default_version: entry.version,
            default_starter_projects: entry.starter_projects,
            versions: entry.versions,
            registry: registry.clone(),
            priority: 0,
        };

        // The last version flagged default wins
        if let Some(default) = stack.versions.iter().rev().find(|v| v.is_default) {
            stack.default_version = default.version.clone();
            stack.default_starter_projects = default.starter_projects.clone();
        }
        stack.versions.sort_by_key(|v| version_key(&v.version));
        stack
    }

    fn matches(&self, filter: &StackFilter) -> bool {
        if let Some(name) = &filter.stack {
            if &self.name != name {
                return false;
            }
        }
        match &filter.text {
            Some(text) if !text.is_empty() => {
                self.name.contains(text.as_str())
                    || self.description.contains(text.as_str())
                    || self.architectures.iter().any(|a| a.contains(text.as_str()))
            }
            _ => true,
        }
    }
}

/// Numeric dotted-version key; unparsable versions sort first.
fn version_key(version: &str) -> Option<Vec<u64>> {
    version
        .trim_start_matches('v')
        .split(['.', '-', '+'])
        .take(3)
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Narrows the stack listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackFilter {
    /// Only search the registry with this name
    pub registry: Option<String>,
    /// Exact stack name
    pub stack: Option<String>,
    /// Substring of the name, description or an architecture
    pub text: Option<String>,
}

/// Lists stacks across registries.
pub struct RegistryClient<C> {
    catalog: Arc<C>,
}

impl<C> Clone for RegistryClient<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
        }
    }
}

impl<C: CatalogSource + 'static> RegistryClient<C> {
    pub fn new(catalog: C) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    /// Registries to search: all of them, or only the first one named `name`.
    pub fn select_registries(registries: &[Registry], name: Option<&str>) -> Vec<Registry> {
        match name {
            Some(name) => registries
                .iter()
                .find(|r| r.name == name)
                .cloned()
                .into_iter()
                .collect(),
            None => registries.to_vec(),
        }
    }

    /// Fetch every registry's catalog concurrently and return the matching stacks,
    /// sorted by name and then by registry priority.
    ///
    /// A registry that cannot be read is reported with a warning and contributes nothing.
    pub async fn list_stacks(
        &self,
        registries: &[Registry],
        filter: &StackFilter,
    ) -> Result<Vec<DevfileStack>> {
        let selected = Self::select_registries(registries, filter.registry.as_deref());
        if selected.is_empty() {
            return Ok(Vec::new());
        }

        let slots: Arc<Slots> =
            Arc::new(Mutex::new(vec![Vec::new(); selected.len()]));
        let mut tasks = ConcurrentTasks::with_capacity(selected.len());

        for (priority, registry) in selected.into_iter().enumerate() {
            let catalog = self.catalog.clone();
            let slots = slots.clone();
            tasks.add(async move {
                let entries = match catalog.fetch_index(&registry).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::warn!(
                            "Registry {} is not set up properly: {}. Check the registry URL and add it again",
                            registry.name,
                            e
                        );
                        return Ok(());
                    }
                };

                let stacks: Vec<DevfileStack> = entries
                    .into_iter()
                    .filter(IndexEntry::is_stack)
                    .map(|entry| {
                        let mut stack = DevfileStack::from_entry(entry, &registry);
                        stack.priority = priority;
                        stack
                    })
                    .collect();
                tracing::debug!("Registry {} offers {} stacks", registry.name, stacks.len());

                store_slot(&slots, priority, stacks);
                Ok(())
            });
        }
        tasks.run().await?;

        let per_registry = take_slots(&slots);

        let mut stacks: Vec<DevfileStack> = per_registry
            .into_iter()
            .flatten()
            .filter(|stack| stack.matches(filter))
            .collect();
        stacks.sort_by(|a, b| a.name.cmp(&b.name).then(a.priority.cmp(&b.priority)));
        Ok(stacks)
    }
}

type Slots = Mutex<Vec<Vec<DevfileStack>>>;

// A task that panicked elsewhere must not cost another registry its results
fn store_slot(slots: &Slots, priority: usize, stacks: Vec<DevfileStack>) {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    slots[priority] = stacks;
}

fn take_slots(slots: &Slots) -> Vec<Vec<DevfileStack>> {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::take(&mut *slots)
}
