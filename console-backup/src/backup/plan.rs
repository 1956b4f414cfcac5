//! Restore planner.
//!
//! Orders a selection into fixed phases so nothing is created before what it
//! depends on, and rewrites names and references for the target scope.

use serde::Serialize;
use serde_json::Value;
use strum::{Display, EnumIter, IntoEnumIterator};

use super::{BackupError, SelectionSet, Snapshot};
use crate::resources::{
    set_payload_authorization, set_payload_reasoning_engine, Resource, ResourceKind, ResourceName, ResourceRef,
    RestoreContext,
};

/// Restore phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display, EnumIter)]
pub enum RestorePhase {
    Authorizations,
    DataStores,
    Collections,
    Engines,
    Assistants,
    Agents,
    ReasoningEngines,
}

impl RestorePhase {
    pub fn kind(&self) -> ResourceKind {
        match self {
            RestorePhase::Authorizations => ResourceKind::Authorization,
            RestorePhase::DataStores => ResourceKind::DataStore,
            RestorePhase::Collections => ResourceKind::Collection,
            RestorePhase::Engines => ResourceKind::Engine,
            RestorePhase::Assistants => ResourceKind::Assistant,
            RestorePhase::Agents => ResourceKind::Agent,
            RestorePhase::ReasoningEngines => ResourceKind::ReasoningEngine,
        }
    }

    pub fn for_kind(kind: ResourceKind) -> RestorePhase {
        match kind {
            ResourceKind::Authorization => RestorePhase::Authorizations,
            ResourceKind::DataStore => RestorePhase::DataStores,
            ResourceKind::Collection => RestorePhase::Collections,
            ResourceKind::Engine => RestorePhase::Engines,
            ResourceKind::Assistant => RestorePhase::Assistants,
            ResourceKind::Agent => RestorePhase::Agents,
            ResourceKind::ReasoningEngine => RestorePhase::ReasoningEngines,
        }
    }
}

/// One create call to make.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedItem {
    pub kind: ResourceKind,
    /// The resource as named in the snapshot.
    pub source: ResourceRef,
    /// Parent to create under, already moved to the target scope.
    pub parent: String,
    pub id: String,
    pub payload: Value,
}

impl PlannedItem {
    /// Name the resource will have once created.
    pub fn target_name(&self) -> String {
        format!("{}/{}/{}", self.parent, self.kind.collection_segment(), self.id)
    }

    pub fn label(&self) -> &str {
        self.source.label()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestorePlan {
    phases: Vec<(RestorePhase, Vec<PlannedItem>)>,
}

impl RestorePlan {
    /// Plan the selected part of `snapshot` for `target`.
    ///
    /// Selected names that the snapshot does not contain are ignored.
    pub fn build(snapshot: &Snapshot, selection: &SelectionSet, target: &RestoreContext) -> Result<Self, BackupError> {
        let mut phases = Vec::new();
        for phase in RestorePhase::iter() {
            let kind = phase.kind();
            let items = snapshot
                .resources(kind)
                .into_iter()
                .filter(|r| selection.contains(kind, &r.name))
                .map(|r| plan_item(kind, r, target))
                .collect::<Result<Vec<_>, _>>()?;
            phases.push((phase, items));
        }
        Ok(Self { phases })
    }

    pub fn phases(&self) -> &[(RestorePhase, Vec<PlannedItem>)] {
        &self.phases
    }

    pub fn items(&self) -> impl Iterator<Item = &PlannedItem> {
        self.phases.iter().flat_map(|(_, items)| items.iter())
    }

    pub fn len(&self) -> usize {
        self.items().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Phase index of the item restoring `source_name`.
    pub fn phase_index(&self, source_name: &str) -> Option<usize> {
        self.phases
            .iter()
            .position(|(_, items)| items.iter().any(|i| i.source.name == source_name))
    }
}

fn plan_item(kind: ResourceKind, resource: &Resource, target: &RestoreContext) -> Result<PlannedItem, BackupError> {
    let name = resource
        .resource_name()
        .map_err(|e| BackupError::Validation(format!("bad {} name: {}", kind, e)))?;
    let moved = name.retarget(&target.project, target.location_for(kind));

    let mut payload = resource.create_payload();
    if kind == ResourceKind::Agent {
        if let Some(auth) = resource.authorization_ref().and_then(|a| retarget(&a, target, ResourceKind::Authorization)) {
            set_payload_authorization(&mut payload, &auth);
        }
        if let Some(engine) = resource
            .reasoning_engine_ref()
            .and_then(|r| retarget(&r, target, ResourceKind::ReasoningEngine))
        {
            set_payload_reasoning_engine(&mut payload, &engine);
        }
    }

    Ok(PlannedItem {
        kind,
        source: resource.to_ref(),
        parent: moved.parent_path(),
        id: moved.id().to_string(),
        payload,
    })
}

/// Move a reference held inside a payload to the target scope. References
/// that do not parse are left untouched.
fn retarget(reference: &str, target: &RestoreContext, kind: ResourceKind) -> Option<String> {
    ResourceName::parse(reference)
        .ok()
        .map(|name| name.retarget(&target.project, target.location_for(kind)).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::fixtures::{self, AGENT_A, ASST1, AUTH1, COL1, ENG1};
    use crate::backup::selection::select_all;

    fn target() -> RestoreContext {
        RestoreContext::new("dst", "eu", "europe-west4")
    }

    #[test]
    fn test_phase_order_is_fixed() {
        let phases: Vec<RestorePhase> = RestorePhase::iter().collect();
        assert_eq!(
            phases,
            vec![
                RestorePhase::Authorizations,
                RestorePhase::DataStores,
                RestorePhase::Collections,
                RestorePhase::Engines,
                RestorePhase::Assistants,
                RestorePhase::Agents,
                RestorePhase::ReasoningEngines,
            ]
        );
        for phase in phases {
            assert_eq!(RestorePhase::for_kind(phase.kind()), phase);
        }
    }

    #[test]
    fn test_children_planned_after_parents() {
        let snapshot = fixtures::scenario();
        let plan = RestorePlan::build(&snapshot, &select_all(&snapshot), &target()).unwrap();
        assert_eq!(plan.len(), 9);

        for item in plan.items() {
            if let Some(parent) = snapshot.parent_of(&item.source.name) {
                assert!(
                    plan.phase_index(&item.source.name) > plan.phase_index(&parent.name),
                    "{} planned before its parent",
                    item.source.name
                );
            }
        }
        assert!(plan.phase_index(AGENT_A) > plan.phase_index(AUTH1));
    }

    #[test]
    fn test_retargets_parents_and_references() {
        let snapshot = fixtures::scenario();
        let plan = RestorePlan::build(&snapshot, &select_all(&snapshot), &target()).unwrap();

        let agent = plan.items().find(|i| i.source.name == AGENT_A).unwrap();
        assert_eq!(
            agent.parent,
            "projects/dst/locations/eu/collections/col1/engines/eng1/assistants/asst1"
        );
        assert_eq!(agent.id, "agentA");
        assert_eq!(
            agent.payload["adkAgentDefinition"]["authorizations"][0],
            "projects/dst/locations/eu/authorizations/auth1"
        );
        assert_eq!(
            agent.payload["adkAgentDefinition"]["provisionedReasoningEngine"]["reasoningEngine"],
            "projects/dst/locations/europe-west4/reasoningEngines/re1"
        );

        let engine = plan.items().find(|i| i.source.name == ENG1).unwrap();
        assert!(engine.payload.get("createTime").is_none());
        assert_eq!(engine.target_name(), "projects/dst/locations/eu/collections/col1/engines/eng1");

        let (phase, items) = plan.phases().last().unwrap();
        assert_eq!(*phase, RestorePhase::ReasoningEngines);
        assert_eq!(items[0].parent, "projects/dst/locations/europe-west4");
    }

    #[test]
    fn test_only_selected_items_are_planned() {
        let snapshot = fixtures::scenario();
        let mut selection = SelectionSet::new();
        selection.insert(ResourceKind::Collection, COL1);
        selection.insert(ResourceKind::Assistant, ASST1);
        selection.insert(ResourceKind::Agent, "projects/src/locations/global/agents/not-in-snapshot");

        let plan = RestorePlan::build(&snapshot, &selection, &fixtures::source_context()).unwrap();
        let names: Vec<&str> = plan.items().map(|i| i.source.name.as_str()).collect();
        assert_eq!(names, vec![COL1, ASST1]);
        assert_eq!(plan.items().next().unwrap().parent, fixtures::SCOPE);
    }
}
