//! Loaded program model: class and method indexing plus the type
//! hierarchy queries the entry-point heuristics depend on.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::ir::{Class, Method};

/// Identity of a method inside the loaded model.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct MethodRef {
    pub(crate) class: usize,
    pub(crate) method: usize,
}

pub(crate) struct ProgramModel {
    classes: Vec<Class>,
    by_name: BTreeMap<String, usize>,
    subtypes: BTreeMap<String, Vec<usize>>,
}

impl ProgramModel {
    /// Index the loaded classes. The first definition of a name wins
    /// (the analyzed artifact is scanned before the platform stubs), and
    /// a phantom placeholder is synthesized for every super or interface
    /// name that was referenced but never loaded.
    pub(crate) fn from_classes(loaded: Vec<Class>) -> Self {
        let mut classes = Vec::with_capacity(loaded.len());
        let mut by_name = BTreeMap::new();
        for class in loaded {
            if by_name.contains_key(&class.name) {
                continue;
            }
            by_name.insert(class.name.clone(), classes.len());
            classes.push(class);
        }

        let mut referenced = BTreeSet::new();
        for class in &classes {
            referenced.extend(class.super_name.iter().cloned());
            referenced.extend(class.interfaces.iter().cloned());
        }
        for name in referenced {
            if by_name.contains_key(&name) {
                continue;
            }
            by_name.insert(name.clone(), classes.len());
            classes.push(Class {
                name,
                super_name: None,
                interfaces: Vec::new(),
                is_interface: false,
                is_application: false,
                is_phantom: true,
                methods: Vec::new(),
            });
        }

        let mut subtypes: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, class) in classes.iter().enumerate() {
            for parent in class.super_name.iter().chain(class.interfaces.iter()) {
                subtypes.entry(parent.clone()).or_default().push(index);
            }
        }

        Self {
            classes,
            by_name,
            subtypes,
        }
    }

    pub(crate) fn class(&self, index: usize) -> &Class {
        &self.classes[index]
    }

    pub(crate) fn resolve_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<&Class> {
        self.resolve_index(name).map(|index| self.class(index))
    }

    pub(crate) fn application_classes(&self) -> impl Iterator<Item = (usize, &Class)> {
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, class)| class.is_application)
    }

    pub(crate) fn method(&self, reference: MethodRef) -> &Method {
        &self.classes[reference.class].methods[reference.method]
    }

    /// Method declared directly on the class, matched by name and
    /// descriptor (subsignature match, declaring type ignored).
    pub(crate) fn declared_method(
        &self,
        class: usize,
        name: &str,
        descriptor: &str,
    ) -> Option<MethodRef> {
        self.classes[class]
            .methods
            .iter()
            .position(|method| method.name == name && method.descriptor == descriptor)
            .map(|method| MethodRef { class, method })
    }

    /// Declared method on `owner` or the nearest superclass declaring it.
    pub(crate) fn resolve_concrete(
        &self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Option<MethodRef> {
        let mut seen = BTreeSet::new();
        let mut current = self.resolve_index(owner);
        while let Some(index) = current {
            if !seen.insert(index) {
                break;
            }
            if let Some(found) = self.declared_method(index, name, descriptor) {
                return Some(found);
            }
            current = self.classes[index]
                .super_name
                .as_deref()
                .and_then(|parent| self.resolve_index(parent));
        }
        None
    }

    pub(crate) fn signature(&self, reference: MethodRef) -> String {
        let class = &self.classes[reference.class];
        let method = &class.methods[reference.method];
        format!("{}.{}{}", class.name, method.name, method.descriptor)
    }

    /// Interface closure of a class: its declared interfaces plus,
    /// walking the superclass chain, every interface declared above it.
    /// Iterative on purpose; hierarchies in obfuscated artifacts can be
    /// deep or even cyclic.
    pub(crate) fn all_interfaces(&self, class: usize) -> Vec<String> {
        let mut closure = Vec::new();
        let mut seen_names = BTreeSet::new();
        let mut seen_classes = BTreeSet::new();
        let mut current = Some(class);
        while let Some(index) = current {
            if !seen_classes.insert(index) {
                break;
            }
            for interface in &self.classes[index].interfaces {
                if seen_names.insert(interface.clone()) {
                    closure.push(interface.clone());
                }
            }
            current = self.classes[index]
                .super_name
                .as_deref()
                .and_then(|parent| self.resolve_index(parent));
        }
        closure
    }

    /// Whether the named interface is `marker` or transitively extends
    /// an interface that is.
    pub(crate) fn interface_reaches(&self, name: &str, marker: &str) -> bool {
        let mut seen = BTreeSet::new();
        let mut worklist = VecDeque::from([name.to_string()]);
        while let Some(current) = worklist.pop_front() {
            if current == marker {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(class) = self.resolve(&current) {
                worklist.extend(class.interfaces.iter().cloned());
            }
        }
        false
    }

    /// Whether the class is `root` or transitively extends it.
    pub(crate) fn extends_class(&self, class: usize, root: &str) -> bool {
        let mut seen = BTreeSet::new();
        let mut current = Some(class);
        while let Some(index) = current {
            if !seen.insert(index) {
                break;
            }
            if self.classes[index].name == root {
                return true;
            }
            current = self.classes[index]
                .super_name
                .as_deref()
                .and_then(|parent| self.resolve_index(parent));
        }
        false
    }

    /// Every loaded transitive subtype of the named class or interface.
    pub(crate) fn transitive_subtypes(&self, name: &str) -> Vec<usize> {
        let mut found = Vec::new();
        let mut seen = BTreeSet::new();
        let mut worklist = VecDeque::from([name.to_string()]);
        while let Some(current) = worklist.pop_front() {
            let Some(children) = self.subtypes.get(&current) else {
                continue;
            };
            for &child in children {
                if seen.insert(child) {
                    found.push(child);
                    worklist.push_back(self.classes[child].name.clone());
                }
            }
        }
        found
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::ir::{CallKind, CallSite, Class, Instruction, InstructionKind, Method};
    use crate::opcodes;

    pub(crate) fn class(name: &str, super_name: Option<&str>, interfaces: &[&str]) -> Class {
        Class {
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            is_interface: false,
            is_application: true,
            is_phantom: false,
            methods: Vec::new(),
        }
    }

    pub(crate) fn interface(name: &str, extends: &[&str]) -> Class {
        Class {
            is_interface: true,
            ..class(name, None, extends)
        }
    }

    pub(crate) fn method(name: &str, descriptor: &str, instructions: Vec<Instruction>) -> Method {
        Method {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static: false,
            instructions,
            exception_handlers: Vec::new(),
        }
    }

    /// Abstract method: no body.
    pub(crate) fn abstract_method(name: &str, descriptor: &str) -> Method {
        method(name, descriptor, Vec::new())
    }

    pub(crate) fn invoke(
        offset: u32,
        kind: CallKind,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Instruction {
        let opcode = match kind {
            CallKind::Virtual => opcodes::INVOKEVIRTUAL,
            CallKind::Interface => opcodes::INVOKEINTERFACE,
            CallKind::Special => opcodes::INVOKESPECIAL,
            CallKind::Static => opcodes::INVOKESTATIC,
        };
        Instruction {
            offset,
            opcode,
            kind: InstructionKind::Invoke(CallSite {
                owner: owner.to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                kind,
            }),
        }
    }

    pub(crate) fn simple(offset: u32, opcode: u8, kind: InstructionKind) -> Instruction {
        Instruction {
            offset,
            opcode,
            kind,
        }
    }

    pub(crate) fn ret(offset: u32) -> Instruction {
        simple(offset, opcodes::RETURN, InstructionKind::Return { value: false })
    }
}
