//! Selection resolver.
//!
//! Turns raw operator toggles into a dependency-closed selection:
//!
//! - ascent: an Agent pulls in its Assistant, Engine and Collection (and so on
//!   for any tree member)
//! - reference: an Engine pulls in every DataStore it names by id, when that
//!   DataStore is in the snapshot
//! - optionally, an Agent pulls in its Authorization
//!
//! Closure only ever adds. Turning a child off never turns its parent off.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::Snapshot;
use crate::resources::ResourceKind;

/// Resource names chosen for restore, by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionSet {
    items: BTreeMap<ResourceKind, BTreeSet<String>>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the name was not selected before.
    pub fn insert(&mut self, kind: ResourceKind, name: impl Into<String>) -> bool {
        self.items.entry(kind).or_default().insert(name.into())
    }

    pub fn remove(&mut self, kind: ResourceKind, name: &str) -> bool {
        let removed = self.items.get_mut(&kind).is_some_and(|names| names.remove(name));
        if self.items.get(&kind).is_some_and(BTreeSet::is_empty) {
            self.items.remove(&kind);
        }
        removed
    }

    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.items.get(&kind).is_some_and(|names| names.contains(name))
    }

    pub fn names(&self, kind: ResourceKind) -> impl Iterator<Item = &str> {
        self.items.get(&kind).into_iter().flatten().map(String::as_str)
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.items.get(&kind).map_or(0, BTreeSet::len)
    }

    pub fn len(&self) -> usize {
        self.items.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_superset(&self, other: &SelectionSet) -> bool {
        other
            .items
            .iter()
            .all(|(kind, names)| names.iter().all(|n| self.contains(*kind, n)))
    }

    pub fn extend(&mut self, other: SelectionSet) {
        for (kind, names) in other.items {
            self.items.entry(kind).or_default().extend(names);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverOptions {
    /// Selecting an Agent also selects the Authorization it references.
    #[serde(default)]
    pub include_agent_authorizations: bool,
}

/// Dependency edges of one snapshot, by resource name.
struct GraphIndex {
    parents: HashMap<String, (ResourceKind, String)>,
    engine_data_stores: HashMap<String, Vec<String>>,
    agent_authorizations: HashMap<String, String>,
}

impl GraphIndex {
    fn new(snapshot: &Snapshot) -> Self {
        let data_stores_by_id: HashMap<&str, &str> = snapshot
            .data_stores
            .iter()
            .map(|ds| (ds.id(), ds.name.as_str()))
            .collect();
        let authorizations_by_id: HashMap<&str, &str> = snapshot
            .authorizations
            .iter()
            .map(|a| (a.id(), a.name.as_str()))
            .collect();

        let mut index = Self {
            parents: HashMap::new(),
            engine_data_stores: HashMap::new(),
            agent_authorizations: HashMap::new(),
        };
        snapshot.walk(|kind, resource, parent| {
            if let (Some(parent), Some(parent_kind)) = (parent, kind.parent_kind()) {
                index
                    .parents
                    .insert(resource.name.clone(), (parent_kind, parent.name.clone()));
            }
            match kind {
                ResourceKind::Engine => {
                    let linked = resource
                        .data_store_ids()
                        .iter()
                        .filter_map(|id| data_stores_by_id.get(id.as_str()))
                        .map(|name| name.to_string())
                        .collect();
                    index.engine_data_stores.insert(resource.name.clone(), linked);
                }
                ResourceKind::Agent => {
                    let linked = resource.authorization_ref().and_then(|auth| {
                        let id = auth.rsplit('/').next().unwrap_or_default().to_string();
                        authorizations_by_id.get(id.as_str()).map(|name| name.to_string())
                    });
                    if let Some(name) = linked {
                        index.agent_authorizations.insert(resource.name.clone(), name);
                    }
                }
                _ => {}
            }
        });
        index
    }

    fn close(&self, selection: &mut SelectionSet, options: ResolverOptions) {
        // Ascent first so every Engine it adds is seen by the reference pass.
        for kind in [ResourceKind::Agent, ResourceKind::Assistant, ResourceKind::Engine] {
            let names: Vec<String> = selection.names(kind).map(str::to_string).collect();
            for name in names {
                let mut current = name;
                while let Some((parent_kind, parent)) = self.parents.get(&current) {
                    selection.insert(*parent_kind, parent.clone());
                    current = parent.clone();
                }
            }
        }

        let engines: Vec<String> = selection.names(ResourceKind::Engine).map(str::to_string).collect();
        for engine in engines {
            for data_store in self.engine_data_stores.get(&engine).into_iter().flatten() {
                selection.insert(ResourceKind::DataStore, data_store.clone());
            }
        }

        if options.include_agent_authorizations {
            let agents: Vec<String> = selection.names(ResourceKind::Agent).map(str::to_string).collect();
            for agent in agents {
                if let Some(auth) = self.agent_authorizations.get(&agent) {
                    selection.insert(ResourceKind::Authorization, auth.clone());
                }
            }
        }
    }
}

/// Close `raw` over the snapshot's dependency edges.
///
/// Pure: the result is always a superset of `raw`, and resolving a resolved
/// set returns it unchanged. Names that are not in the snapshot are kept.
pub fn resolve(snapshot: &Snapshot, raw: &SelectionSet, options: ResolverOptions) -> SelectionSet {
    let mut selection = raw.clone();
    GraphIndex::new(snapshot).close(&mut selection, options);
    selection
}

/// Every resource in the snapshot.
pub fn select_all(snapshot: &Snapshot) -> SelectionSet {
    let mut selection = SelectionSet::new();
    snapshot.walk(|kind, resource, _| {
        selection.insert(kind, resource.name.clone());
    });
    selection
}

/// Interactive selection over one loaded snapshot.
#[derive(Debug, Clone)]
pub struct SelectionState {
    selected: SelectionSet,
    options: ResolverOptions,
}

impl SelectionState {
    /// Everything selected; backups are usually restored wholesale.
    pub fn all(snapshot: &Snapshot, options: ResolverOptions) -> Self {
        Self {
            selected: select_all(snapshot),
            options,
        }
    }

    pub fn none(options: ResolverOptions) -> Self {
        Self {
            selected: SelectionSet::new(),
            options,
        }
    }

    /// Select one item together with everything it implies.
    pub fn toggle_on(&mut self, snapshot: &Snapshot, kind: ResourceKind, name: &str) {
        let mut single = SelectionSet::new();
        single.insert(kind, name);
        self.selected.extend(resolve(snapshot, &single, self.options));
    }

    /// Deselect exactly this item.
    pub fn toggle_off(&mut self, kind: ResourceKind, name: &str) {
        self.selected.remove(kind, name);
    }

    pub fn select_none(&mut self) {
        self.selected = SelectionSet::new();
    }

    pub fn is_selected(&self, kind: ResourceKind, name: &str) -> bool {
        self.selected.contains(kind, name)
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selected
    }

    pub fn into_selection(self) -> SelectionSet {
        self.selected
    }
}
