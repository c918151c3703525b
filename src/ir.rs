#![allow(dead_code)]

use crate::opcodes;

/// Intermediate representation for a loaded JVM class or interface.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) is_interface: bool,
    /// Loaded from the analyzed artifact rather than a platform stub.
    pub(crate) is_application: bool,
    /// Placeholder synthesized for a referenced but unloaded type.
    pub(crate) is_phantom: bool,
    pub(crate) methods: Vec<Method>,
}

/// Intermediate representation for a method and its decoded body.
///
/// An empty instruction sequence means the method carries no Code
/// attribute (abstract or native).
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) is_static: bool,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) exception_handlers: Vec<ExceptionHandler>,
}

impl Method {
    pub(crate) fn has_body(&self) -> bool {
        !self.instructions.is_empty()
    }
}

/// Exception handler metadata from the Code attribute.
#[derive(Clone, Debug)]
pub(crate) struct ExceptionHandler {
    pub(crate) start_pc: u32,
    pub(crate) end_pc: u32,
    pub(crate) handler_pc: u32,
    pub(crate) catch_type: Option<String>,
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) kind: InstructionKind,
}

/// Decoded operand payloads for the instruction families the analyses
/// inspect. Everything else stays `Other` and is identified by opcode.
#[derive(Clone, Debug)]
pub(crate) enum InstructionKind {
    Invoke(CallSite),
    New(String),
    CheckCast(String),
    Field(FieldRef),
    ConstString(String),
    ConstNull,
    LoadLocal(u16),
    StoreLocal(u16),
    Branch(Vec<u32>),
    Return { value: bool },
    Other,
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
}

/// Call opcode classification used by CHA resolution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

/// Field reference from a get/put instruction.
#[derive(Clone, Debug)]
pub(crate) struct FieldRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl Instruction {
    /// Stable one-line textual form used by path traces.
    pub(crate) fn render(&self) -> String {
        let mnemonic = opcodes::mnemonic(self.opcode);
        match &self.kind {
            InstructionKind::Invoke(call) => {
                format!("{mnemonic} {}.{}{}", call.owner, call.name, call.descriptor)
            }
            InstructionKind::New(class) => format!("{mnemonic} {class}"),
            InstructionKind::CheckCast(class) => format!("{mnemonic} {class}"),
            InstructionKind::Field(field) => {
                format!("{mnemonic} {}.{}:{}", field.owner, field.name, field.descriptor)
            }
            InstructionKind::ConstString(value) => format!("{mnemonic} \"{value}\""),
            InstructionKind::LoadLocal(index) | InstructionKind::StoreLocal(index) => {
                if matches!(self.opcode, opcodes::ALOAD | opcodes::ASTORE) {
                    format!("{mnemonic} {index}")
                } else {
                    mnemonic.to_string()
                }
            }
            InstructionKind::Branch(targets) => {
                let rendered: Vec<String> =
                    targets.iter().map(|target| target.to_string()).collect();
                format!("{mnemonic} {}", rendered.join(" "))
            }
            InstructionKind::ConstNull
            | InstructionKind::Return { .. }
            | InstructionKind::Other => mnemonic.to_string(),
        }
    }
}
