//! Entry-point identification: which methods of the analyzed artifact an
//! external, untrusted caller can reach without further gating.
//!
//! Two strategies run in order and the first non-empty result wins. The
//! strict strategy classifies registration call sites (service
//! publication, broadcast-receiver registration) and extracts remote-
//! interface implementations from the registered types. The fallback
//! scans the server namespace for binder subclasses directly.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::dataflow::{self, ValueFact};
use crate::descriptor;
use crate::ir::{Class, InstructionKind, Method};
use crate::model::{MethodRef, ProgramModel};

const SERVICE_REGISTRATION_NAMES: [&str; 2] = ["addService", "publishBinderService"];
const RECEIVER_REGISTRATION_NAMES: [&str; 2] = ["registerReceiver", "registerReceiverAsUser"];

/// Marker interface at the root of every cross-process callable contract.
pub(crate) const REMOTE_INTERFACE_MARKER: &str = "android/os/IInterface";
/// Root type of inter-process-communication receivers.
pub(crate) const IPC_RECEIVER_ROOT: &str = "android/os/Binder";
/// Namespace the fallback strategy scans for unregistered services.
pub(crate) const SERVER_NAMESPACE: &str = "com/android/server";

const RECEIVER_CALLBACK_NAME: &str = "onReceive";
const RECEIVER_CALLBACK_DESCRIPTOR: &str = "(Landroid/content/Context;Landroid/content/Intent;)V";

/// Sink for per-call-site resolution notes. Never affects control flow.
pub(crate) trait DiagnosticSink {
    fn log(&mut self, message: &str);
}

/// Default sink: stderr, silenced by `--quiet`.
pub(crate) struct StderrDiagnostics {
    pub(crate) quiet: bool,
}

impl DiagnosticSink for StderrDiagnostics {
    fn log(&mut self, message: &str) {
        if !self.quiet {
            eprintln!("{message}");
        }
    }
}

#[cfg(test)]
impl DiagnosticSink for Vec<String> {
    fn log(&mut self, message: &str) {
        self.push(message.to_string());
    }
}

type Strategy = fn(&ProgramModel, &mut dyn DiagnosticSink) -> BTreeSet<MethodRef>;

/// Identify every externally reachable entry method.
///
/// Errors only when both strategies come up empty; that is a fatal
/// precondition for the rest of the analysis. Per-call-site resolution
/// failures are logged and skipped.
pub(crate) fn identify_entry_points(
    model: &ProgramModel,
    diagnostics: &mut dyn DiagnosticSink,
) -> Result<BTreeSet<MethodRef>> {
    let strategies: [(&str, Strategy); 2] = [
        ("registration", registration_scan),
        ("server-namespace fallback", server_namespace_scan),
    ];
    for (name, strategy) in strategies {
        let entries = strategy(model, diagnostics);
        if !entries.is_empty() {
            return Ok(entries);
        }
        diagnostics.log(&format!("{name} strategy found no entry points"));
    }
    anyhow::bail!("no externally reachable entry points found; analysis cannot proceed")
}

/// Strict strategy: classify registration call sites across every
/// application method body, then extract remote-interface
/// implementations from the registered service types.
fn registration_scan(
    model: &ProgramModel,
    diagnostics: &mut dyn DiagnosticSink,
) -> BTreeSet<MethodRef> {
    let mut entries = BTreeSet::new();
    let mut service_types: BTreeSet<String> = BTreeSet::new();

    for (_, class) in model.application_classes() {
        if class.is_interface || class.is_phantom {
            continue;
        }
        for method in &class.methods {
            if !method.has_body() {
                continue;
            }
            scan_method_body(
                model,
                class,
                method,
                &mut service_types,
                &mut entries,
                diagnostics,
            );
        }
    }

    for type_name in &service_types {
        if let Some(index) = model.resolve_index(type_name) {
            entries.extend(remote_interface_implementations(model, index));
        }
    }
    entries
}

fn scan_method_body(
    model: &ProgramModel,
    class: &Class,
    method: &Method,
    service_types: &mut BTreeSet<String>,
    entries: &mut BTreeSet<MethodRef>,
    diagnostics: &mut dyn DiagnosticSink,
) {
    // Argument facts are computed once per body, and only for bodies
    // that actually contain a registration call.
    let mut facts: Option<BTreeMap<u32, Vec<ValueFact>>> = None;

    for instruction in &method.instructions {
        let InstructionKind::Invoke(call) = &instruction.kind else {
            continue;
        };
        let call_name = call.name.as_str();

        if SERVICE_REGISTRATION_NAMES.contains(&call_name)
            && descriptor::parameter_count(&call.descriptor) >= 2
        {
            let facts =
                facts.get_or_insert_with(|| dataflow::call_argument_facts(&class.name, method));
            match facts.get(&instruction.offset).and_then(|args| args.get(1)) {
                Some(ValueFact::Reference(type_name))
                    if model.resolve(type_name).is_some_and(|c| !c.is_phantom) =>
                {
                    diagnostics.log(&format!(
                        "service registration: {type_name} published via {call_name} in {}.{}",
                        class.name, method.name
                    ));
                    service_types.insert(type_name.clone());
                }
                _ => diagnostics.log(&format!(
                    "unresolved service argument at {call_name} call in {}.{} (offset {})",
                    class.name, method.name, instruction.offset
                )),
            }
        }

        if RECEIVER_REGISTRATION_NAMES.contains(&call_name) {
            let argc = descriptor::parameter_count(&call.descriptor);
            let permission_index = match argc {
                2 => None,
                n if n >= 4 => Some(2),
                // Any other arity is a non-match, not a failure.
                _ => continue,
            };
            let facts =
                facts.get_or_insert_with(|| dataflow::call_argument_facts(&class.name, method));
            let arguments = facts.get(&instruction.offset);
            let unprotected = match permission_index {
                None => true,
                Some(index) => matches!(
                    arguments.and_then(|args| args.get(index)),
                    Some(ValueFact::Null)
                ),
            };
            if !unprotected {
                continue;
            }
            let Some(ValueFact::Reference(receiver_type)) =
                arguments.and_then(|args| args.first())
            else {
                continue;
            };
            let Some(receiver) = model
                .resolve_index(receiver_type)
                .filter(|&index| !model.class(index).is_phantom)
            else {
                continue;
            };
            if let Some(callback) = model.declared_method(
                receiver,
                RECEIVER_CALLBACK_NAME,
                RECEIVER_CALLBACK_DESCRIPTOR,
            ) {
                diagnostics.log(&format!(
                    "unprotected receiver registration: {receiver_type} in {}.{}",
                    class.name, method.name
                ));
                entries.insert(callback);
            }
        }
    }
}

/// Fallback strategy: every non-interface, non-phantom application class
/// under the server namespace that transitively extends the IPC receiver
/// root, with remote-interface extraction applied directly.
fn server_namespace_scan(
    model: &ProgramModel,
    diagnostics: &mut dyn DiagnosticSink,
) -> BTreeSet<MethodRef> {
    let mut entries = BTreeSet::new();
    for (index, class) in model.application_classes() {
        if class.is_interface || class.is_phantom || !class.name.starts_with(SERVER_NAMESPACE) {
            continue;
        }
        if !model.extends_class(index, IPC_RECEIVER_ROOT) {
            continue;
        }
        let methods = remote_interface_implementations(model, index);
        if !methods.is_empty() {
            diagnostics.log(&format!("fallback: likely service implementation {}", class.name));
            entries.extend(methods);
        }
    }
    entries
}

/// For every remote interface in the class's interface closure, the
/// class's own implementation of each interface method.
pub(crate) fn remote_interface_implementations(
    model: &ProgramModel,
    class: usize,
) -> Vec<MethodRef> {
    let mut implementations = Vec::new();
    for interface_name in model.all_interfaces(class) {
        if !model.interface_reaches(&interface_name, REMOTE_INTERFACE_MARKER) {
            continue;
        }
        let Some(interface_index) = model.resolve_index(&interface_name) else {
            continue;
        };
        for declared in &model.class(interface_index).methods {
            if let Some(implementation) =
                model.declared_method(class, &declared.name, &declared.descriptor)
            {
                implementations.push(implementation);
            }
        }
    }
    implementations
}
