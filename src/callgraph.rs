//! Call graph construction seeded at the identified entry methods.
//!
//! The provider seam mirrors the whole-program analyzer the original
//! pipeline delegated to: identification produces the entry set, the
//! provider turns it into a directed call-site -> target graph, and the
//! path extractor only ever reads `edges_from`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::ir::{CallKind, CallSite, InstructionKind};
use crate::model::{MethodRef, ProgramModel};

/// Directed graph of resolved call targets, keyed by call site.
pub(crate) struct CallGraph {
    edges: BTreeMap<(MethodRef, u32), Vec<MethodRef>>,
}

impl CallGraph {
    pub(crate) fn edges_from(&self, caller: MethodRef, offset: u32) -> &[MethodRef] {
        self.edges
            .get(&(caller, offset))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn edges(&self) -> impl Iterator<Item = (MethodRef, u32, MethodRef)> + '_ {
        self.edges
            .iter()
            .flat_map(|(&(caller, offset), targets)| {
                targets.iter().map(move |&target| (caller, offset, target))
            })
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }
}

/// Builds a call graph from a set of entry methods. One-shot and
/// read-only afterwards.
pub(crate) trait CallGraphProvider {
    fn build(&self, model: &ProgramModel, entries: &BTreeSet<MethodRef>) -> CallGraph;
}

/// Class-hierarchy call-graph construction: static and special calls
/// resolve through the superclass chain; virtual and interface calls
/// additionally dispatch to every loaded subtype override.
pub(crate) struct ClassHierarchyProvider;

impl CallGraphProvider for ClassHierarchyProvider {
    fn build(&self, model: &ProgramModel, entries: &BTreeSet<MethodRef>) -> CallGraph {
        let mut edges = BTreeMap::new();
        let mut visited: BTreeSet<MethodRef> = BTreeSet::new();
        let mut worklist: VecDeque<MethodRef> = entries.iter().copied().collect();

        while let Some(caller) = worklist.pop_front() {
            if !visited.insert(caller) {
                continue;
            }
            if !model.class(caller.class).is_application {
                continue;
            }
            for instruction in &model.method(caller).instructions {
                let InstructionKind::Invoke(call) = &instruction.kind else {
                    continue;
                };
                let mut targets = resolve_targets(model, call);
                targets.sort();
                targets.dedup();
                if targets.is_empty() {
                    continue;
                }
                for &target in &targets {
                    if model.class(target.class).is_application
                        && model.method(target).has_body()
                    {
                        worklist.push_back(target);
                    }
                }
                edges.insert((caller, instruction.offset), targets);
            }
        }

        CallGraph { edges }
    }
}

fn resolve_targets(model: &ProgramModel, call: &CallSite) -> Vec<MethodRef> {
    match call.kind {
        CallKind::Static | CallKind::Special => model
            .resolve_concrete(&call.owner, &call.name, &call.descriptor)
            .into_iter()
            .collect(),
        CallKind::Virtual | CallKind::Interface => {
            let mut targets: Vec<MethodRef> = model
                .resolve_concrete(&call.owner, &call.name, &call.descriptor)
                .into_iter()
                .collect();
            for subtype in model.transitive_subtypes(&call.owner) {
                targets.extend(model.declared_method(subtype, &call.name, &call.descriptor));
            }
            targets
        }
    }
}
