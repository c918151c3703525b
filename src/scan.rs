//! Input scanning: walk the analyzed artifact and the platform stubs,
//! parse every class file, and lower each one into the IR.
//!
//! The analyzed artifact is strict (unsupported or corrupt input is an
//! error); classpath stubs and files discovered inside directories are
//! lenient and simply skipped when they do not parse.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::attributes::Attribute;
use jclassfile::class_file::{self, ClassFile};
use jclassfile::constant_pool::ConstantPool;
use zip::ZipArchive;

use crate::ir::{
    CallKind, CallSite, Class, ExceptionHandler, FieldRef, Instruction, InstructionKind, Method,
};
use crate::opcodes;

const ACC_INTERFACE: u16 = 0x0200;
const ACC_STATIC: u16 = 0x0008;

/// Classes lowered from a scan, in deterministic order.
pub(crate) struct ScanOutput {
    pub(crate) classes: Vec<Class>,
    pub(crate) class_count: usize,
}

pub(crate) fn scan_inputs(input: &Path, classpath: &[PathBuf]) -> Result<ScanOutput> {
    let mut classes = Vec::new();
    let mut class_count = 0;

    scan_path(input, true, true, &mut classes, &mut class_count)?;

    // Keep deterministic ordering by sorting classpath entries and
    // directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in classpath_entries {
        scan_path(&entry, false, true, &mut classes, &mut class_count)?;
    }

    Ok(ScanOutput {
        classes,
        class_count,
    })
}

fn scan_path(
    path: &Path,
    application: bool,
    strict: bool,
    classes: &mut Vec<Class>,
    class_count: &mut usize,
) -> Result<()> {
    if path.is_dir() {
        scan_dir(path, application, classes, class_count)?;
        return Ok(());
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "class" => scan_class_file(path, application, strict, classes, class_count),
        "jar" => scan_jar_file(path, application, strict, classes, class_count),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn scan_dir(
    path: &Path,
    application: bool,
    classes: &mut Vec<Class>,
    class_count: &mut usize,
) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, application, classes, class_count)?;
        } else {
            scan_path(&entry, application, false, classes, class_count)?;
        }
    }

    Ok(())
}

fn scan_class_file(
    path: &Path,
    application: bool,
    strict: bool,
    classes: &mut Vec<Class>,
    class_count: &mut usize,
) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = match class_file::parse(&data) {
        Ok(parsed) => parsed,
        Err(_) if !strict => return Ok(()),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to parse {}", path.display()))
        }
    };
    let lowered =
        lower_class(&parsed, application).with_context(|| format!("failed to lower {}", path.display()))?;
    classes.push(lowered);
    *class_count += 1;
    Ok(())
}

fn scan_jar_file(
    path: &Path,
    application: bool,
    strict: bool,
    classes: &mut Vec<Class>,
    class_count: &mut usize,
) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class") && !name.ends_with("module-info.class") {
            entry_names.push(name);
        }
    }

    entry_names.sort();

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let parsed = match class_file::parse(&data) {
            Ok(parsed) => parsed,
            Err(_) if !strict => continue,
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to parse {}:{}", path.display(), name))
            }
        };
        let lowered = lower_class(&parsed, application)
            .with_context(|| format!("failed to lower {}:{}", path.display(), name))?;
        classes.push(lowered);
        *class_count += 1;
    }

    Ok(())
}

fn lower_class(class_file: &ClassFile, application: bool) -> Result<Class> {
    let pool = class_file.constant_pool();
    let name = class_name(pool, class_file.this_class())
        .context("malformed this_class reference")?
        .to_string();
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        class_name(pool, class_file.super_class()).map(str::to_string)
    };
    let interfaces = class_file
        .interfaces()
        .iter()
        .filter_map(|&index| class_name(pool, index))
        .map(str::to_string)
        .collect();

    let mut methods = Vec::new();
    for info in class_file.methods() {
        let method_name = utf8(pool, info.name_index())
            .context("malformed method name reference")?
            .to_string();
        let descriptor = utf8(pool, info.descriptor_index())
            .context("malformed method descriptor reference")?
            .to_string();
        let mut instructions = Vec::new();
        let mut exception_handlers = Vec::new();
        for attribute in info.attributes() {
            if let Attribute::Code {
                code,
                exception_table,
                ..
            } = attribute
            {
                instructions = decode_instructions(pool, code).with_context(|| {
                    format!("failed to decode bytecode of {name}.{method_name}")
                })?;
                exception_handlers = exception_table
                    .iter()
                    .map(|entry| ExceptionHandler {
                        start_pc: entry.start_pc() as u32,
                        end_pc: entry.end_pc() as u32,
                        handler_pc: entry.handler_pc() as u32,
                        catch_type: if entry.catch_type() == 0 {
                            None
                        } else {
                            class_name(pool, entry.catch_type()).map(str::to_string)
                        },
                    })
                    .collect();
            }
        }
        methods.push(Method {
            name: method_name,
            descriptor,
            is_static: info.access_flags().bits() & ACC_STATIC != 0,
            instructions,
            exception_handlers,
        });
    }

    Ok(Class {
        name,
        super_name,
        interfaces,
        is_interface: class_file.access_flags().bits() & ACC_INTERFACE != 0,
        is_application: application,
        is_phantom: false,
        methods,
    })
}

fn decode_instructions(pool: &[ConstantPool], code: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let length = opcodes::instruction_length(code, offset)
            .with_context(|| format!("truncated instruction at offset {offset}"))?;
        if offset + length > code.len() {
            anyhow::bail!("instruction at offset {offset} runs past end of bytecode");
        }
        instructions.push(decode_instruction(pool, code, offset, opcode));
        offset += length;
    }
    Ok(instructions)
}

fn decode_instruction(pool: &[ConstantPool], code: &[u8], offset: usize, opcode: u8) -> Instruction {
    let kind = match opcode {
        opcodes::ACONST_NULL => InstructionKind::ConstNull,
        opcodes::LDC => code
            .get(offset + 1)
            .and_then(|&index| string_constant(pool, index as u16))
            .map(|value| InstructionKind::ConstString(value.to_string()))
            .unwrap_or(InstructionKind::Other),
        opcodes::LDC_W => operand_u16(code, offset)
            .and_then(|index| string_constant(pool, index))
            .map(|value| InstructionKind::ConstString(value.to_string()))
            .unwrap_or(InstructionKind::Other),
        opcodes::ALOAD => code
            .get(offset + 1)
            .map(|&index| InstructionKind::LoadLocal(index as u16))
            .unwrap_or(InstructionKind::Other),
        opcodes::ALOAD_0..=opcodes::ALOAD_3 => {
            InstructionKind::LoadLocal((opcode - opcodes::ALOAD_0) as u16)
        }
        opcodes::ASTORE => code
            .get(offset + 1)
            .map(|&index| InstructionKind::StoreLocal(index as u16))
            .unwrap_or(InstructionKind::Other),
        opcodes::ASTORE_0..=opcodes::ASTORE_3 => {
            InstructionKind::StoreLocal((opcode - opcodes::ASTORE_0) as u16)
        }
        opcodes::GETSTATIC..=opcodes::PUTFIELD => operand_u16(code, offset)
            .and_then(|index| field_reference(pool, index))
            .map(InstructionKind::Field)
            .unwrap_or(InstructionKind::Other),
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => operand_u16(code, offset)
            .and_then(|index| method_reference(pool, index))
            .map(|(owner, name, descriptor)| {
                InstructionKind::Invoke(CallSite {
                    owner,
                    name,
                    descriptor,
                    kind: match opcode {
                        opcodes::INVOKESPECIAL => CallKind::Special,
                        opcodes::INVOKESTATIC => CallKind::Static,
                        opcodes::INVOKEINTERFACE => CallKind::Interface,
                        _ => CallKind::Virtual,
                    },
                })
            })
            .unwrap_or(InstructionKind::Other),
        opcodes::NEW => operand_u16(code, offset)
            .and_then(|index| class_name(pool, index))
            .map(|name| InstructionKind::New(name.to_string()))
            .unwrap_or(InstructionKind::Other),
        opcodes::CHECKCAST => operand_u16(code, offset)
            .and_then(|index| class_name(pool, index))
            .map(|name| InstructionKind::CheckCast(name.to_string()))
            .unwrap_or(InstructionKind::Other),
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            branch_target(code, offset, false)
                .map(|target| InstructionKind::Branch(vec![target]))
                .unwrap_or(InstructionKind::Other)
        }
        opcodes::GOTO_W | opcodes::JSR_W => branch_target(code, offset, true)
            .map(|target| InstructionKind::Branch(vec![target]))
            .unwrap_or(InstructionKind::Other),
        opcodes::TABLESWITCH => tableswitch_targets(code, offset)
            .map(InstructionKind::Branch)
            .unwrap_or(InstructionKind::Other),
        opcodes::LOOKUPSWITCH => lookupswitch_targets(code, offset)
            .map(InstructionKind::Branch)
            .unwrap_or(InstructionKind::Other),
        opcodes::IRETURN..=opcodes::ARETURN => InstructionKind::Return { value: true },
        opcodes::RETURN => InstructionKind::Return { value: false },
        opcodes::WIDE => match code.get(offset + 1) {
            Some(&opcodes::ALOAD) => opcodes::read_u16(code, offset + 2)
                .ok()
                .map(InstructionKind::LoadLocal)
                .unwrap_or(InstructionKind::Other),
            Some(&opcodes::ASTORE) => opcodes::read_u16(code, offset + 2)
                .ok()
                .map(InstructionKind::StoreLocal)
                .unwrap_or(InstructionKind::Other),
            _ => InstructionKind::Other,
        },
        _ => InstructionKind::Other,
    };
    // Keep the wrapped opcode for wide loads and stores so rendering
    // names the operation, not the prefix.
    let opcode = match (opcode, &kind) {
        (opcodes::WIDE, InstructionKind::LoadLocal(_)) => opcodes::ALOAD,
        (opcodes::WIDE, InstructionKind::StoreLocal(_)) => opcodes::ASTORE,
        _ => opcode,
    };
    Instruction {
        offset: offset as u32,
        opcode,
        kind,
    }
}

fn operand_u16(code: &[u8], offset: usize) -> Option<u16> {
    opcodes::read_u16(code, offset + 1).ok()
}

fn branch_target(code: &[u8], offset: usize, wide: bool) -> Option<u32> {
    let delta = if wide {
        opcodes::read_i32(code, offset + 1).ok()? as i64
    } else {
        opcodes::read_i16(code, offset + 1).ok()? as i64
    };
    u32::try_from(offset as i64 + delta).ok()
}

fn tableswitch_targets(code: &[u8], offset: usize) -> Option<Vec<u32>> {
    let base = offset + 1 + opcodes::switch_padding(offset);
    let default = opcodes::read_i32(code, base).ok()?;
    let low = opcodes::read_i32(code, base + 4).ok()?;
    let high = opcodes::read_i32(code, base + 8).ok()?;
    let count = high.checked_sub(low)?.checked_add(1)?;
    let mut targets = Vec::with_capacity(count as usize + 1);
    targets.push(u32::try_from(offset as i64 + default as i64).ok()?);
    let mut cursor = base + 12;
    for _ in 0..count {
        let delta = opcodes::read_i32(code, cursor).ok()?;
        targets.push(u32::try_from(offset as i64 + delta as i64).ok()?);
        cursor += 4;
    }
    Some(targets)
}

fn lookupswitch_targets(code: &[u8], offset: usize) -> Option<Vec<u32>> {
    let base = offset + 1 + opcodes::switch_padding(offset);
    let default = opcodes::read_i32(code, base).ok()?;
    let npairs = opcodes::read_i32(code, base + 4).ok()?;
    let mut targets = Vec::with_capacity(npairs as usize + 1);
    targets.push(u32::try_from(offset as i64 + default as i64).ok()?);
    let mut cursor = base + 8;
    for _ in 0..npairs {
        let delta = opcodes::read_i32(code, cursor + 4).ok()?;
        targets.push(u32::try_from(offset as i64 + delta as i64).ok()?);
        cursor += 8;
    }
    Some(targets)
}

fn utf8(pool: &[ConstantPool], index: u16) -> Option<&str> {
    match pool.get(index as usize)? {
        ConstantPool::Utf8 { value } => Some(value.as_str()),
        _ => None,
    }
}

fn class_name(pool: &[ConstantPool], index: u16) -> Option<&str> {
    match pool.get(index as usize)? {
        ConstantPool::Class { name_index } => utf8(pool, *name_index),
        _ => None,
    }
}

fn string_constant(pool: &[ConstantPool], index: u16) -> Option<&str> {
    match pool.get(index as usize)? {
        ConstantPool::String { string_index } => utf8(pool, *string_index),
        _ => None,
    }
}

fn name_and_type(pool: &[ConstantPool], index: u16) -> Option<(&str, &str)> {
    match pool.get(index as usize)? {
        ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        } => Some((utf8(pool, *name_index)?, utf8(pool, *descriptor_index)?)),
        _ => None,
    }
}

fn field_reference(pool: &[ConstantPool], index: u16) -> Option<FieldRef> {
    match pool.get(index as usize)? {
        ConstantPool::Fieldref {
            class_index,
            name_and_type_index,
        } => {
            let owner = class_name(pool, *class_index)?;
            let (name, descriptor) = name_and_type(pool, *name_and_type_index)?;
            Some(FieldRef {
                owner: owner.to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            })
        }
        _ => None,
    }
}

fn method_reference(pool: &[ConstantPool], index: u16) -> Option<(String, String, String)> {
    let (class_index, name_and_type_index) = match pool.get(index as usize)? {
        ConstantPool::Methodref {
            class_index,
            name_and_type_index,
        }
        | ConstantPool::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index),
        _ => return None,
    };
    let owner = class_name(pool, class_index)?;
    let (name, descriptor) = name_and_type(pool, name_and_type_index)?;
    Some((owner.to_string(), name.to_string(), descriptor.to_string()))
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_inputs_rejects_invalid_class_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let class_path = dir.path().join("bad.class");
        fs::write(&class_path, b"nope").expect("write test class");

        let result = scan_inputs(&class_path, &[]);

        assert!(result.is_err());
    }

    #[test]
    fn scan_inputs_rejects_unsupported_extension() {
        let dir = tempfile::tempdir().expect("temp dir");
        let stray = dir.path().join("notes.txt");
        fs::write(&stray, b"hello").expect("write stray file");

        let result = scan_inputs(&stray, &[]);

        assert!(result.is_err());
    }

    #[test]
    fn directory_scan_skips_non_class_files_and_corrupt_stubs() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("readme.md"), b"docs").expect("write stray file");
        fs::write(dir.path().join("broken.class"), b"nope").expect("write corrupt class");

        let scan = scan_inputs(dir.path(), &[]).expect("scan directory");

        assert_eq!(0, scan.class_count);
        assert!(scan.classes.is_empty());
    }

    #[test]
    fn missing_classpath_entries_are_an_error_before_scanning() {
        // Path validation happens in the CLI layer; a directory that
        // vanishes mid-scan still surfaces as an IO error here.
        let dir = tempfile::tempdir().expect("temp dir");
        let gone = dir.path().join("gone.jar");

        let result = scan_inputs(&gone, &[]);

        assert!(result.is_err());
    }
}
