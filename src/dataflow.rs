//! Abstract evaluation of method bodies to recover call-site argument
//! facts. Replaces what a full IR would carry on each invoke expression:
//! whether an argument is the null literal and which reference type a
//! non-null argument has.
//!
//! The walk is linear over the instruction sequence with an abstract
//! operand stack and reference-typed locals. The stack is cleared at
//! branch instructions, branch targets, and exception-handler entries;
//! unmodeled opcodes degrade the state to `Unknown` instead of failing.

use std::collections::{BTreeMap, BTreeSet};

use crate::descriptor;
use crate::ir::{InstructionKind, Method};
use crate::opcodes;

/// What the abstract evaluation knows about one operand value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ValueFact {
    /// The null literal.
    Null,
    /// A value of the named reference type.
    Reference(String),
    Primitive,
    Unknown,
}

/// Per-invoke-offset argument facts for one method body. The receiver is
/// not included; index `i` is the i-th declared parameter.
pub(crate) fn call_argument_facts(
    class_name: &str,
    method: &Method,
) -> BTreeMap<u32, Vec<ValueFact>> {
    let mut facts = BTreeMap::new();
    let mut stack: Vec<ValueFact> = Vec::new();
    let mut locals = seed_locals(class_name, method);
    let merge_points = merge_points(method);

    for instruction in &method.instructions {
        if merge_points.contains(&instruction.offset) {
            stack.clear();
        }
        match &instruction.kind {
            InstructionKind::ConstNull => stack.push(ValueFact::Null),
            InstructionKind::ConstString(_) => {
                stack.push(ValueFact::Reference("java/lang/String".to_string()));
            }
            InstructionKind::New(class) => stack.push(ValueFact::Reference(class.clone())),
            InstructionKind::CheckCast(class) => {
                pop(&mut stack);
                stack.push(ValueFact::Reference(class.clone()));
            }
            InstructionKind::LoadLocal(index) => {
                stack.push(locals.get(index).cloned().unwrap_or(ValueFact::Unknown));
            }
            InstructionKind::StoreLocal(index) => {
                let value = pop(&mut stack);
                locals.insert(*index, value);
            }
            InstructionKind::Field(field) => match instruction.opcode {
                opcodes::GETSTATIC => stack.push(type_fact(&field.descriptor)),
                opcodes::GETFIELD => {
                    pop(&mut stack);
                    stack.push(type_fact(&field.descriptor));
                }
                opcodes::PUTFIELD => {
                    pop(&mut stack);
                    pop(&mut stack);
                }
                _ => {
                    pop(&mut stack);
                }
            },
            InstructionKind::Invoke(call) => {
                let argc = descriptor::parameter_count(&call.descriptor);
                facts.insert(instruction.offset, argument_facts(&stack, argc));
                for _ in 0..argc {
                    pop(&mut stack);
                }
                if instruction.opcode != opcodes::INVOKESTATIC {
                    pop(&mut stack);
                }
                match descriptor::return_type(&call.descriptor) {
                    Some("V") | None => {}
                    Some(returned) => stack.push(type_fact(returned)),
                }
            }
            InstructionKind::Branch(_) | InstructionKind::Return { .. } => stack.clear(),
            InstructionKind::Other => apply_plain(instruction.opcode, &mut stack),
        }
    }

    facts
}

fn argument_facts(stack: &[ValueFact], argc: usize) -> Vec<ValueFact> {
    let mut arguments = vec![ValueFact::Unknown; argc.saturating_sub(stack.len())];
    let present = argc - arguments.len();
    arguments.extend_from_slice(&stack[stack.len() - present..]);
    arguments
}

/// Stack effects of operand-only opcodes. Anything not modeled clears
/// the stack, so later facts stay conservative rather than stale.
fn apply_plain(opcode: u8, stack: &mut Vec<ValueFact>) {
    match opcode {
        opcodes::NOP | opcodes::IINC | opcodes::RET => {}
        // Primitive constants: iconst family through sipush.
        0x02..=0x11 => stack.push(ValueFact::Primitive),
        // ldc of a non-string constant.
        opcodes::LDC | opcodes::LDC_W => stack.push(ValueFact::Unknown),
        opcodes::LDC2_W => stack.push(ValueFact::Primitive),
        // Primitive loads, direct and short forms.
        0x15..=0x18 | 0x1a..=0x29 => stack.push(ValueFact::Primitive),
        // Array loads pop index and array.
        0x2e..=0x35 => {
            pop(stack);
            pop(stack);
            stack.push(if opcode == opcodes::AALOAD {
                ValueFact::Unknown
            } else {
                ValueFact::Primitive
            });
        }
        // Primitive stores, direct and short forms.
        0x36..=0x39 | 0x3b..=0x4a => {
            pop(stack);
        }
        // Array stores pop value, index, array.
        0x4f..=0x56 => {
            pop(stack);
            pop(stack);
            pop(stack);
        }
        opcodes::POP => {
            pop(stack);
        }
        opcodes::POP2 => {
            pop(stack);
            pop(stack);
        }
        opcodes::DUP => {
            let top = stack.last().cloned().unwrap_or(ValueFact::Unknown);
            stack.push(top);
        }
        opcodes::SWAP => {
            let length = stack.len();
            if length >= 2 {
                stack.swap(length - 1, length - 2);
            }
        }
        opcodes::NEWARRAY => {
            pop(stack);
            stack.push(ValueFact::Unknown);
        }
        opcodes::ANEWARRAY => {
            pop(stack);
            stack.push(ValueFact::Unknown);
        }
        opcodes::ARRAYLENGTH | opcodes::INSTANCEOF => {
            pop(stack);
            stack.push(ValueFact::Primitive);
        }
        opcodes::MONITORENTER | opcodes::MONITOREXIT => {
            pop(stack);
        }
        _ => stack.clear(),
    }
}

fn pop(stack: &mut Vec<ValueFact>) -> ValueFact {
    stack.pop().unwrap_or(ValueFact::Unknown)
}

fn type_fact(type_descriptor: &str) -> ValueFact {
    if let Some(class) = descriptor::object_class(type_descriptor) {
        ValueFact::Reference(class.to_string())
    } else if type_descriptor.starts_with('[') {
        ValueFact::Unknown
    } else {
        ValueFact::Primitive
    }
}

fn seed_locals(class_name: &str, method: &Method) -> BTreeMap<u16, ValueFact> {
    let mut locals = BTreeMap::new();
    let mut slot: u16 = 0;
    if !method.is_static {
        locals.insert(slot, ValueFact::Reference(class_name.to_string()));
        slot += 1;
    }
    for parameter in descriptor::parameter_types(&method.descriptor) {
        locals.insert(slot, type_fact(&parameter));
        slot += if descriptor::is_wide(&parameter) { 2 } else { 1 };
    }
    locals
}

/// Offsets where linear facts stop being trustworthy: branch targets and
/// exception-handler entries.
fn merge_points(method: &Method) -> BTreeSet<u32> {
    let mut points = BTreeSet::new();
    for instruction in &method.instructions {
        if let InstructionKind::Branch(targets) = &instruction.kind {
            points.extend(targets.iter().copied());
        }
    }
    for handler in &method.exception_handlers {
        points.insert(handler.handler_pc);
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::CallKind;
    use crate::model::testutil::{invoke, method, simple};
    use crate::opcodes;

    fn facts_for(body: Vec<crate::ir::Instruction>) -> BTreeMap<u32, Vec<ValueFact>> {
        call_argument_facts("com/a/Owner", &method("run", "()V", body))
    }

    #[test]
    fn new_dup_init_sequence_leaves_a_typed_reference() {
        // new Svc; dup; invokespecial <init>; ldc "name"; swap; addService(name, svc)
        let body = vec![
            simple(0, opcodes::NEW, InstructionKind::New("com/a/Svc".to_string())),
            simple(3, opcodes::DUP, InstructionKind::Other),
            invoke(4, CallKind::Special, "com/a/Svc", "<init>", "()V"),
            simple(
                7,
                opcodes::LDC,
                InstructionKind::ConstString("svc".to_string()),
            ),
            simple(9, opcodes::SWAP, InstructionKind::Other),
            invoke(
                10,
                CallKind::Static,
                "android/os/ServiceManager",
                "addService",
                "(Ljava/lang/String;Landroid/os/IBinder;)V",
            ),
        ];

        let facts = facts_for(body);
        let arguments = facts.get(&10).expect("addService facts");
        assert_eq!(
            &vec![
                ValueFact::Reference("java/lang/String".to_string()),
                ValueFact::Reference("com/a/Svc".to_string()),
            ],
            arguments
        );
    }

    #[test]
    fn null_literal_survives_to_the_call_site() {
        let body = vec![
            simple(0, opcodes::NEW, InstructionKind::New("com/a/R".to_string())),
            simple(3, opcodes::ACONST_NULL, InstructionKind::ConstNull),
            invoke(
                4,
                CallKind::Virtual,
                "android/content/Context",
                "registerReceiver",
                "(Landroid/content/BroadcastReceiver;Landroid/content/IntentFilter;)Landroid/content/Intent;",
            ),
        ];

        let facts = facts_for(body);
        let arguments = facts.get(&4).expect("registerReceiver facts");
        assert_eq!(ValueFact::Reference("com/a/R".to_string()), arguments[0]);
        assert_eq!(ValueFact::Null, arguments[1]);
    }

    #[test]
    fn locals_carry_parameter_types_with_wide_slots() {
        // Instance method (J Lcom/a/Handler;)V: this=0, long=1..2, handler=3.
        let body = vec![
            simple(0, opcodes::ALOAD_3, InstructionKind::LoadLocal(3)),
            invoke(1, CallKind::Virtual, "com/a/Handler", "post", "(Lcom/a/Handler;)V"),
        ];
        let facts = call_argument_facts(
            "com/a/Owner",
            &method("run", "(JLcom/a/Handler;)V", body),
        );

        assert_eq!(
            &vec![ValueFact::Reference("com/a/Handler".to_string())],
            facts.get(&1).expect("post facts")
        );
    }

    #[test]
    fn branch_targets_clear_the_abstract_stack() {
        let body = vec![
            simple(0, opcodes::NEW, InstructionKind::New("com/a/Svc".to_string())),
            simple(3, opcodes::GOTO, InstructionKind::Branch(vec![4])),
            invoke(
                4,
                CallKind::Static,
                "com/a/Log",
                "log",
                "(Ljava/lang/Object;)V",
            ),
        ];

        let facts = facts_for(body);
        assert_eq!(
            &vec![ValueFact::Unknown],
            facts.get(&4).expect("log facts")
        );
    }

    #[test]
    fn short_stacks_pad_missing_arguments_as_unknown() {
        let body = vec![invoke(
            0,
            CallKind::Virtual,
            "com/a/X",
            "two",
            "(II)V",
        )];

        let facts = facts_for(body);
        assert_eq!(
            &vec![ValueFact::Unknown, ValueFact::Unknown],
            facts.get(&0).expect("two facts")
        );
    }

    #[test]
    fn unmodeled_opcodes_degrade_to_unknown_not_stale() {
        let body = vec![
            simple(0, opcodes::NEW, InstructionKind::New("com/a/Svc".to_string())),
            // dup_x1 is not modeled; the stack must not keep claiming Svc.
            simple(3, 0x5a, InstructionKind::Other),
            invoke(4, CallKind::Static, "com/a/X", "one", "(Ljava/lang/Object;)V"),
        ];

        let facts = facts_for(body);
        assert_eq!(
            &vec![ValueFact::Unknown],
            facts.get(&4).expect("one facts")
        );
    }
}
