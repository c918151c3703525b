//! Path extraction: depth-first enumeration of every acyclic call chain
//! from an entry method, one emitted trace per return instruction
//! reached anywhere in the traversal.
//!
//! The trace buffer is shared across frames: callee instructions splice
//! inline into the caller's trace at the call instruction, and a frame
//! pop removes the single most-recently appended entry. The recursion
//! stack is the set of methods currently open on the active path; a
//! callee already open is skipped silently, which truncates the cyclic
//! branch without reporting anything.
//!
//! The machine uses owned frames instead of host recursion so that deep
//! call graphs cannot exhaust the process stack.

use std::collections::BTreeSet;

use crate::callgraph::CallGraph;
use crate::ir::InstructionKind;
use crate::model::{MethodRef, ProgramModel};

/// Streaming consumer of completed path traces. `terminus` is the
/// method whose return instruction completed the trace.
pub(crate) trait TraceSink {
    fn emit(&mut self, terminus: &str, trace: &[String]);
}

struct Frame {
    method: MethodRef,
    instruction: usize,
    targets: Vec<MethodRef>,
    next_target: usize,
    expanded: bool,
}

impl Frame {
    fn new(method: MethodRef) -> Self {
        Self {
            method,
            instruction: 0,
            targets: Vec::new(),
            next_target: 0,
            expanded: false,
        }
    }
}

/// Walk every application-owned call chain reachable from `entry`,
/// emitting one trace per return point. Methods without bodies are
/// traversal leaves; a well-formed graph never makes this fail.
pub(crate) fn extract_paths(
    model: &ProgramModel,
    graph: &CallGraph,
    entry: MethodRef,
    sink: &mut dyn TraceSink,
) {
    if !model.method(entry).has_body() {
        return;
    }

    let mut trace: Vec<String> = Vec::new();
    let mut open: BTreeSet<MethodRef> = BTreeSet::from([entry]);
    let mut frames: Vec<Frame> = vec![Frame::new(entry)];

    while let Some(frame) = frames.last_mut() {
        let method = model.method(frame.method);
        if frame.instruction >= method.instructions.len() {
            let finished = frame.method;
            open.remove(&finished);
            frames.pop();
            trace.pop();
            continue;
        }

        let instruction = &method.instructions[frame.instruction];
        if !frame.expanded {
            trace.push(instruction.render());
            frame.expanded = true;
            if matches!(instruction.kind, InstructionKind::Invoke(_)) {
                frame.targets = graph
                    .edges_from(frame.method, instruction.offset)
                    .iter()
                    .copied()
                    .filter(|target| model.class(target.class).is_application)
                    .filter(|target| model.method(*target).has_body())
                    .filter(|target| !open.contains(target))
                    .collect();
                frame.next_target = 0;
            }
        }

        if frame.next_target < frame.targets.len() {
            let target = frame.targets[frame.next_target];
            frame.next_target += 1;
            open.insert(target);
            frames.push(Frame::new(target));
            continue;
        }

        if matches!(instruction.kind, InstructionKind::Return { .. }) {
            sink.emit(&model.signature(frame.method), &trace);
        }
        frame.instruction += 1;
        frame.expanded = false;
        frame.targets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callgraph::{CallGraphProvider, ClassHierarchyProvider};
    use crate::ir::CallKind;
    use crate::model::testutil::{class, invoke, method, ret};

    #[derive(Default)]
    struct CollectedTraces {
        traces: Vec<(String, Vec<String>)>,
    }

    impl TraceSink for CollectedTraces {
        fn emit(&mut self, terminus: &str, trace: &[String]) {
            self.traces.push((terminus.to_string(), trace.to_vec()));
        }
    }

    fn build(model: &ProgramModel, entry: MethodRef) -> CallGraph {
        ClassHierarchyProvider.build(model, &BTreeSet::from([entry]))
    }

    #[test]
    fn callee_instructions_splice_into_the_caller_trace() {
        let mut callee = class("com/a/Callee", None, &[]);
        callee.methods.push(method("leaf", "()V", vec![ret(0)]));
        let mut caller = class("com/a/Caller", None, &[]);
        caller.methods.push(method(
            "run",
            "()V",
            vec![
                invoke(0, CallKind::Static, "com/a/Callee", "leaf", "()V"),
                ret(3),
            ],
        ));

        let model = ProgramModel::from_classes(vec![callee, caller]);
        let entry = model
            .resolve_concrete("com/a/Caller", "run", "()V")
            .expect("entry");
        let graph = build(&model, entry);
        let mut sink = CollectedTraces::default();

        extract_paths(&model, &graph, entry, &mut sink);

        assert_eq!(2, sink.traces.len());
        // First terminus: the callee's own return, with the caller's
        // invoke as the accumulated prefix.
        let (terminus, trace) = &sink.traces[0];
        assert_eq!("com/a/Callee.leaf()V", terminus);
        assert_eq!(
            &vec![
                "invokestatic com/a/Callee.leaf()V".to_string(),
                "return".to_string(),
            ],
            trace
        );
        // Second terminus: the caller's return after the callee frame
        // unwound its single most-recent entry.
        let (terminus, trace) = &sink.traces[1];
        assert_eq!("com/a/Caller.run()V", terminus);
        assert_eq!(
            &vec![
                "invokestatic com/a/Callee.leaf()V".to_string(),
                "return".to_string(),
            ],
            trace
        );
    }

    #[test]
    fn mutual_recursion_truncates_at_the_cycle() {
        let mut a = class("com/a/A", None, &[]);
        // Body deliberately ends at the call: the only terminus in the
        // reachable subtree is B's return.
        a.methods.push(method(
            "ping",
            "()V",
            vec![invoke(0, CallKind::Static, "com/a/B", "pong", "()V")],
        ));
        let mut b = class("com/a/B", None, &[]);
        b.methods.push(method(
            "pong",
            "()V",
            vec![
                invoke(0, CallKind::Static, "com/a/A", "ping", "()V"),
                ret(3),
            ],
        ));

        let model = ProgramModel::from_classes(vec![a, b]);
        let entry = model
            .resolve_concrete("com/a/A", "ping", "()V")
            .expect("entry");
        let graph = build(&model, entry);
        let mut sink = CollectedTraces::default();

        extract_paths(&model, &graph, entry, &mut sink);

        assert_eq!(1, sink.traces.len());
        let (terminus, trace) = &sink.traces[0];
        assert_eq!("com/a/B.pong()V", terminus);
        assert_eq!(
            &vec![
                "invokestatic com/a/B.pong()V".to_string(),
                "invokestatic com/a/A.ping()V".to_string(),
                "return".to_string(),
            ],
            trace
        );
    }

    #[test]
    fn each_return_point_emits_its_own_trace_from_the_shared_prefix() {
        let mut multi = class("com/a/Multi", None, &[]);
        multi.methods.push(method(
            "either",
            "()V",
            vec![ret(0), ret(1)],
        ));

        let model = ProgramModel::from_classes(vec![multi]);
        let entry = model
            .resolve_concrete("com/a/Multi", "either", "()V")
            .expect("entry");
        let graph = build(&model, entry);
        let mut sink = CollectedTraces::default();

        extract_paths(&model, &graph, entry, &mut sink);

        assert_eq!(2, sink.traces.len());
        assert_eq!(vec!["return".to_string()], sink.traces[0].1);
        assert_eq!(
            vec!["return".to_string(), "return".to_string()],
            sink.traces[1].1
        );
    }

    #[test]
    fn bodiless_entries_and_callees_are_leaves() {
        let mut contract = class("com/a/Abstract", None, &[]);
        contract.methods.push(method("gone", "()V", Vec::new()));

        let model = ProgramModel::from_classes(vec![contract]);
        let entry = model
            .resolve_concrete("com/a/Abstract", "gone", "()V")
            .expect("entry");
        let graph = build(&model, entry);
        let mut sink = CollectedTraces::default();

        extract_paths(&model, &graph, entry, &mut sink);

        assert!(sink.traces.is_empty());
    }

    #[test]
    fn no_open_frame_repeats_in_an_emitted_trace() {
        // Diamond: run -> left -> shared, run -> right -> shared. The
        // shared callee legitimately appears on two sibling paths.
        let mut shared = class("com/a/Shared", None, &[]);
        shared.methods.push(method("common", "()V", vec![ret(0)]));
        let mut left = class("com/a/Left", None, &[]);
        left.methods.push(method(
            "go",
            "()V",
            vec![
                invoke(0, CallKind::Static, "com/a/Shared", "common", "()V"),
                ret(3),
            ],
        ));
        let mut right = class("com/a/Right", None, &[]);
        right.methods.push(method(
            "go",
            "()V",
            vec![
                invoke(0, CallKind::Static, "com/a/Shared", "common", "()V"),
                ret(3),
            ],
        ));
        let mut root = class("com/a/Root", None, &[]);
        root.methods.push(method(
            "run",
            "()V",
            vec![
                invoke(0, CallKind::Static, "com/a/Left", "go", "()V"),
                invoke(3, CallKind::Static, "com/a/Right", "go", "()V"),
                ret(6),
            ],
        ));

        let model = ProgramModel::from_classes(vec![shared, left, right, root]);
        let entry = model
            .resolve_concrete("com/a/Root", "run", "()V")
            .expect("entry");
        let graph = build(&model, entry);
        let mut sink = CollectedTraces::default();

        extract_paths(&model, &graph, entry, &mut sink);

        // Termini: Shared (under Left), Left, Shared (under Right),
        // Right, Root.
        let termini: Vec<&str> = sink
            .traces
            .iter()
            .map(|(terminus, _)| terminus.as_str())
            .collect();
        assert_eq!(
            vec![
                "com/a/Shared.common()V",
                "com/a/Left.go()V",
                "com/a/Shared.common()V",
                "com/a/Right.go()V",
                "com/a/Root.run()V",
            ],
            termini
        );
    }
}
