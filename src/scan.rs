use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use jclassfile::methods::MethodFlags;
use opentelemetry::KeyValue;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use zip::ZipArchive;

use crate::descriptor::{ValueKind, field_kind, method_param_count, parameter_kinds, return_kind};
use crate::ir::{
    CallKind, CallSite, Class, ExceptionHandler, FieldRef, Instruction, InstructionKind,
    LineNumber, Method, MethodAccess,
};
use crate::opcodes;
use crate::telemetry::{Telemetry, with_span};

/// Snapshot of parsed artifacts, classes, and counts for a scan.
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) class_count: usize,
    pub(crate) classes: Vec<Class>,
}

/// Mutable accumulator threaded through the directory and archive walkers.
struct ScanState<'a> {
    telemetry: Option<&'a Telemetry>,
    artifacts: Vec<Artifact>,
    classes: Vec<Class>,
}

pub(crate) fn scan_inputs(
    input: &Path,
    classpath: &[PathBuf],
    telemetry: Option<&Telemetry>,
) -> Result<ScanOutput> {
    let mut state = ScanState {
        telemetry,
        artifacts: Vec::new(),
        classes: Vec::new(),
    };

    scan_path(input, true, true, &mut state)?;

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by_key(|entry| path_key(entry));

    if is_jar_path(input) {
        classpath_entries.extend(manifest_classpath(input)?);
    }

    for entry in expand_classpath(classpath_entries)? {
        if entry == input {
            continue;
        }
        scan_path(&entry, false, true, &mut state)?;
    }

    Ok(ScanOutput {
        artifacts: state.artifacts,
        class_count: state.classes.len(),
        classes: state.classes,
    })
}

fn scan_path(path: &Path, is_input: bool, strict: bool, state: &mut ScanState<'_>) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, is_input, state);
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "class" => scan_class_file(path, is_input, state),
        "jar" => scan_jar_file(path, is_input, state),
        _ if strict => anyhow::bail!("unsupported input file: {}", path.display()),
        _ => Ok(()),
    }
}

fn scan_dir(path: &Path, is_input: bool, state: &mut ScanState<'_>) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }
    entries.sort_by_key(|entry| path_key(entry));

    for entry in entries {
        scan_path(&entry, is_input, false, state)?;
    }
    Ok(())
}

fn scan_class_file(path: &Path, is_input: bool, state: &mut ScanState<'_>) -> Result<()> {
    let span_attributes = [KeyValue::new(
        "nullinfer.class_path",
        path.display().to_string(),
    )];
    let (len, parsed) = with_span(
        state.telemetry,
        "class.scan",
        &span_attributes,
        || -> Result<(u64, ParsedClass)> {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let parsed = parse_class_bytes(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((data.len() as u64, parsed))
        },
    )?;

    let artifact_index = if is_input {
        push_path_artifact(path, Some(analysis_target_roles()?), len, &mut state.artifacts)
    } else {
        -1
    };
    state.classes.push(parsed.into_class(artifact_index));
    Ok(())
}

fn scan_jar_file(path: &Path, is_input: bool, state: &mut ScanState<'_>) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let jar_len = fs::metadata(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .len();
    let roles = if is_input {
        Some(analysis_target_roles()?)
    } else {
        None
    };
    let jar_index = push_path_artifact(path, roles, jar_len, &mut state.artifacts);

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class")
            && !name.ends_with("module-info.class")
            && !name.starts_with("META-INF/versions/")
        {
            entry_names.push(name);
        }
    }
    entry_names.sort();

    for name in entry_names {
        let span_attributes = [
            KeyValue::new("nullinfer.jar_path", path.display().to_string()),
            KeyValue::new("nullinfer.jar_entry", name.clone()),
        ];
        let parsed = with_span(
            state.telemetry,
            "class.scan",
            &span_attributes,
            || -> Result<ParsedClass> {
                let mut entry = archive
                    .by_name(&name)
                    .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
                parse_class_bytes(&data)
                    .with_context(|| format!("failed to parse {}:{}", path.display(), name))
            },
        )?;
        state.classes.push(parsed.into_class(jar_index));
    }

    Ok(())
}

fn analysis_target_roles() -> Result<Vec<Value>> {
    let role = serde_json::to_value(ArtifactRoles::AnalysisTarget)
        .context("serialize artifact role")?;
    Ok(vec![role])
}

/// Push a path-based artifact and return its index.
fn push_path_artifact(
    path: &Path,
    roles: Option<Vec<Value>>,
    len: u64,
    artifacts: &mut Vec<Artifact>,
) -> i64 {
    let location = ArtifactLocation::builder().uri(path_to_uri(path)).build();
    let artifact = match roles {
        Some(roles) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        None => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    let index = artifacts.len() as i64;
    artifacts.push(artifact);
    index
}

fn path_to_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("file://{}", absolute.to_string_lossy())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn expand_classpath(initial: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut initial = initial;
    initial.sort_by_key(|entry| path_key(entry));
    let mut queue: VecDeque<PathBuf> = initial.into_iter().collect();

    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    while let Some(entry) = queue.pop_front() {
        if !seen.insert(path_key(&entry)) {
            continue;
        }
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
        if is_jar_path(&entry) {
            let mut referenced = manifest_classpath(&entry)?;
            referenced.sort_by_key(|item| path_key(item));
            queue.extend(referenced);
        }
        result.push(entry);
    }

    Ok(result)
}

fn manifest_classpath(path: &Path) -> Result<Vec<PathBuf>> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
    let Ok(mut entry) = archive.by_name("META-INF/MANIFEST.MF") else {
        return Ok(Vec::new());
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .with_context(|| format!("failed to read manifest of {}", path.display()))?;
    Ok(parse_manifest_classpath(path, &content))
}

fn parse_manifest_classpath(jar_path: &Path, content: &str) -> Vec<PathBuf> {
    // Manifest lines wrap with a single leading space.
    let mut attributes: Vec<(String, String)> = Vec::new();
    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r');
        if let Some(continuation) = line.strip_prefix(' ') {
            if let Some((_, value)) = attributes.last_mut() {
                value.push_str(continuation);
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            attributes.push((key.trim().to_string(), value.trim_start().to_string()));
        }
    }

    let Some((_, class_path)) = attributes.iter().rev().find(|(key, _)| key == "Class-Path")
    else {
        return Vec::new();
    };

    let base_dir = jar_path.parent().unwrap_or_else(|| Path::new(""));
    class_path
        .split_whitespace()
        .map(|entry| {
            let entry_path = PathBuf::from(entry);
            if entry_path.is_absolute() {
                entry_path
            } else {
                base_dir.join(entry_path)
            }
        })
        .collect()
}

fn is_jar_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jar"))
        .unwrap_or(false)
}

/// Parsed class data extracted from class file bytes.
struct ParsedClass {
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    referenced_classes: Vec<String>,
    methods: Vec<Method>,
}

impl ParsedClass {
    fn into_class(self, artifact_index: i64) -> Class {
        Class {
            name: self.name,
            super_name: self.super_name,
            interfaces: self.interfaces,
            referenced_classes: self.referenced_classes,
            methods: self.methods,
            artifact_index,
        }
    }
}

fn parse_class_bytes(data: &[u8]) -> Result<ParsedClass> {
    let class_file = class_file::parse(data).context("failed to parse class file bytes")?;
    let constant_pool = class_file.constant_pool();
    let class_name =
        resolve_class_name(constant_pool, class_file.this_class()).context("resolve class name")?;
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(
            resolve_class_name(constant_pool, class_file.super_class())
                .context("resolve super class name")?,
        )
    };
    let mut interfaces = Vec::new();
    for interface in class_file.interfaces() {
        interfaces
            .push(resolve_class_name(constant_pool, *interface).context("resolve interface name")?);
    }

    let mut referenced = BTreeSet::new();
    for entry in constant_pool {
        if let ConstantPool::Class { name_index } = entry {
            let name = resolve_utf8(constant_pool, *name_index)
                .context("resolve referenced class name")?;
            if let Some(normalized) = element_class_name(&name) {
                referenced.insert(normalized);
            }
        }
    }
    referenced.remove(&class_name);

    let methods = parse_methods(constant_pool, class_file.methods())
        .with_context(|| format!("parse methods of {class_name}"))?;

    Ok(ParsedClass {
        name: class_name,
        super_name,
        interfaces,
        referenced_classes: referenced.into_iter().collect(),
        methods,
    })
}

fn resolve_class_name(constant_pool: &[ConstantPool], class_index: u16) -> Result<String> {
    let entry = constant_pool
        .get(class_index as usize)
        .context("missing class entry")?;
    match entry {
        ConstantPool::Class { name_index } => resolve_utf8(constant_pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing utf8 entry")?;
    match entry {
        ConstantPool::Utf8 { value } => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

/// Strip array dimensions from a class constant, dropping primitive arrays.
fn element_class_name(raw: &str) -> Option<String> {
    if !raw.starts_with('[') {
        return Some(raw.to_string());
    }
    let element = raw.trim_start_matches('[');
    element
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
        .map(str::to_string)
}

fn parse_methods(
    constant_pool: &[ConstantPool],
    methods: &[jclassfile::methods::MethodInfo],
) -> Result<Vec<Method>> {
    let mut parsed = Vec::new();
    for method in methods {
        let name =
            resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
        let descriptor = resolve_utf8(constant_pool, method.descriptor_index())
            .context("resolve method descriptor")?;
        let access_flags = method.access_flags();
        let access = MethodAccess {
            is_public: access_flags.contains(MethodFlags::ACC_PUBLIC),
            is_private: access_flags.contains(MethodFlags::ACC_PRIVATE),
            is_static: access_flags.contains(MethodFlags::ACC_STATIC),
            is_final: access_flags.contains(MethodFlags::ACC_FINAL),
            is_abstract: access_flags.contains(MethodFlags::ACC_ABSTRACT),
            is_native: access_flags.contains(MethodFlags::ACC_NATIVE),
            is_varargs: access_flags.contains(MethodFlags::ACC_VARARGS),
        };
        let code = method
            .attributes()
            .iter()
            .find_map(|attribute| match attribute {
                jclassfile::attributes::Attribute::Code {
                    code,
                    exception_table,
                    attributes,
                    ..
                } => Some((code, exception_table, attributes)),
                _ => None,
            });

        let (instructions, exception_handlers, line_numbers) = match code {
            Some((code, exception_table, code_attributes)) => {
                let (instructions, positions) = decode_bytecode(code, constant_pool)
                    .with_context(|| format!("decode bytecode of {name}{descriptor}"))?;
                let handlers = parse_exception_handlers(
                    exception_table,
                    constant_pool,
                    &positions,
                    code.len(),
                    instructions.len(),
                )
                .context("parse exception handlers")?;
                (instructions, handlers, parse_line_numbers(code_attributes))
            }
            None => (Vec::new(), Vec::new(), Vec::new()),
        };
        let max_locals = compute_max_locals(&descriptor, access.is_static, &instructions)?;

        parsed.push(Method {
            name,
            descriptor,
            access,
            instructions,
            exception_handlers,
            line_numbers,
            max_locals,
        });
    }
    Ok(parsed)
}

fn parse_line_numbers(attributes: &[jclassfile::attributes::Attribute]) -> Vec<LineNumber> {
    let mut entries = Vec::new();
    for attribute in attributes {
        let jclassfile::attributes::Attribute::LineNumberTable { line_number_table } = attribute
        else {
            continue;
        };
        for record in line_number_table {
            entries.push(LineNumber {
                start_pc: record.start_pc() as u32,
                line: record.line_number() as u32,
            });
        }
    }
    entries.sort_by_key(|entry| entry.start_pc);
    entries
}

/// Local slots needed by the parameters and every local touched by the body.
fn compute_max_locals(
    descriptor: &str,
    is_static: bool,
    instructions: &[Instruction],
) -> Result<usize> {
    let receiver = usize::from(!is_static);
    let parameters: usize = parameter_kinds(descriptor)?
        .iter()
        .map(|kind| kind.slots())
        .sum();
    let mut max = receiver + parameters;
    for instruction in instructions {
        let slot = match instruction.kind {
            InstructionKind::Local(slot) | InstructionKind::Increment(slot) => slot as usize,
            _ => continue,
        };
        let width = if opcodes::is_wide_local(instruction.opcode) {
            2
        } else {
            1
        };
        max = max.max(slot + width);
    }
    Ok(max)
}

/// Decode raw bytecode into instructions whose branch operands are instruction indices.
fn decode_bytecode(
    code: &[u8],
    constant_pool: &[ConstantPool],
) -> Result<(Vec<Instruction>, BTreeMap<u32, usize>)> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {}", offset);
        }
        let (opcode, kind) = decode_operands(code, offset, constant_pool)
            .with_context(|| format!("decode instruction at offset {offset}"))?;
        instructions.push(Instruction {
            offset: offset as u32,
            opcode,
            kind,
        });
        offset += length;
    }

    let positions: BTreeMap<u32, usize> = instructions
        .iter()
        .enumerate()
        .map(|(index, instruction)| (instruction.offset, index))
        .collect();
    let index_of = |target: usize| -> Result<usize> {
        positions
            .get(&(target as u32))
            .copied()
            .with_context(|| format!("branch target {target} is not an instruction boundary"))
    };
    for instruction in &mut instructions {
        match &mut instruction.kind {
            InstructionKind::Jump(target) => *target = index_of(*target)?,
            InstructionKind::Switch { default, targets } => {
                *default = index_of(*default)?;
                for target in targets.iter_mut() {
                    *target = index_of(*target)?;
                }
            }
            _ => {}
        }
    }
    Ok((instructions, positions))
}

/// Decode one instruction. Jump operands still hold byte offsets at this point.
fn decode_operands(
    code: &[u8],
    offset: usize,
    constant_pool: &[ConstantPool],
) -> Result<(u8, InstructionKind)> {
    let opcode = code[offset];
    let kind = match opcode {
        opcodes::LDC => {
            let index = code.get(offset + 1).copied().context("ldc index")? as u16;
            InstructionKind::Constant(constant_kind(constant_pool, index)?)
        }
        opcodes::LDC_W | opcodes::LDC2_W => {
            let index = read_u16(code, offset + 1)?;
            InstructionKind::Constant(constant_kind(constant_pool, index)?)
        }
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            let slot = code.get(offset + 1).copied().context("local index")?;
            InstructionKind::Local(slot as u16)
        }
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            InstructionKind::Local(((opcode - opcodes::ILOAD_0) % 4) as u16)
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            InstructionKind::Local(((opcode - opcodes::ISTORE_0) % 4) as u16)
        }
        opcodes::IINC => {
            let slot = code.get(offset + 1).copied().context("iinc index")?;
            InstructionKind::Increment(slot as u16)
        }
        opcodes::WIDE => {
            let inner = code.get(offset + 1).copied().context("missing wide opcode")?;
            let slot = read_u16(code, offset + 2)?;
            let kind = if inner == opcodes::IINC {
                InstructionKind::Increment(slot)
            } else {
                InstructionKind::Local(slot)
            };
            return Ok((inner, kind));
        }
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            let delta = read_u16(code, offset + 1)? as i16;
            InstructionKind::Jump(branch_target(offset, delta as i32)?)
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let delta = read_i32(code, offset + 1)?;
            InstructionKind::Jump(branch_target(offset, delta)?)
        }
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let default = branch_target(offset, read_i32(code, base)?)?;
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let count = (high as i64 - low as i64 + 1).max(0) as usize;
            let mut targets = Vec::with_capacity(count);
            for index in 0..count {
                targets.push(branch_target(offset, read_i32(code, base + 12 + index * 4)?)?);
            }
            InstructionKind::Switch { default, targets }
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let default = branch_target(offset, read_i32(code, base)?)?;
            let pairs = read_i32(code, base + 4)?.max(0) as usize;
            let mut targets = Vec::with_capacity(pairs);
            for index in 0..pairs {
                targets.push(branch_target(offset, read_i32(code, base + 12 + index * 8)?)?);
            }
            InstructionKind::Switch { default, targets }
        }
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let index = read_u16(code, offset + 1)?;
            InstructionKind::Field(resolve_field_ref(constant_pool, index)?)
        }
        opcodes::INVOKEVIRTUAL
        | opcodes::INVOKESPECIAL
        | opcodes::INVOKESTATIC
        | opcodes::INVOKEINTERFACE => {
            let method_index = read_u16(code, offset + 1)?;
            let method_ref =
                resolve_method_ref(constant_pool, method_index).context("resolve method ref")?;
            let call_kind = match opcode {
                opcodes::INVOKESPECIAL => CallKind::Special,
                opcodes::INVOKESTATIC => CallKind::Static,
                opcodes::INVOKEINTERFACE => CallKind::Interface,
                _ => CallKind::Virtual,
            };
            let arguments = method_param_count(&method_ref.descriptor)?;
            let returns = return_kind(&method_ref.descriptor)?;
            InstructionKind::Invoke(CallSite {
                owner: method_ref.owner,
                name: method_ref.name,
                descriptor: method_ref.descriptor,
                kind: call_kind,
                offset: offset as u32,
                arguments,
                returns,
            })
        }
        opcodes::INVOKEDYNAMIC => {
            let index = read_u16(code, offset + 1)?;
            let descriptor = resolve_invoke_dynamic_descriptor(constant_pool, index)?;
            InstructionKind::InvokeDynamic {
                arguments: method_param_count(&descriptor)?,
                returns: return_kind(&descriptor)?,
                descriptor,
            }
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
            let index = read_u16(code, offset + 1)?;
            InstructionKind::Type(resolve_class_name(constant_pool, index)?)
        }
        opcodes::MULTIANEWARRAY => {
            let index = read_u16(code, offset + 1)?;
            let dimensions = code.get(offset + 3).copied().context("array dimensions")?;
            InstructionKind::MultiArray {
                type_name: resolve_class_name(constant_pool, index)?,
                dimensions,
            }
        }
        _ => InstructionKind::Simple,
    };
    Ok((opcode, kind))
}

fn branch_target(offset: usize, delta: i32) -> Result<usize> {
    let target = offset as i64 + delta as i64;
    usize::try_from(target).with_context(|| format!("negative branch target {target}"))
}

fn constant_kind(constant_pool: &[ConstantPool], index: u16) -> Result<ValueKind> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing constant pool entry")?;
    let kind = match entry {
        ConstantPool::Integer { .. } => ValueKind::Int,
        ConstantPool::Float { .. } => ValueKind::Float,
        ConstantPool::Long { .. } => ValueKind::Long,
        ConstantPool::Double { .. } => ValueKind::Double,
        _ => ValueKind::Reference,
    };
    Ok(kind)
}

/// Resolved constant pool member reference.
struct MemberRef {
    owner: String,
    name: String,
    descriptor: String,
}

fn resolve_method_ref(constant_pool: &[ConstantPool], index: u16) -> Result<MemberRef> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing method ref entry")?;
    let (class_index, name_and_type_index) = match entry {
        ConstantPool::Methodref {
            class_index,
            name_and_type_index,
        }
        | ConstantPool::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index),
        _ => anyhow::bail!("unexpected method ref entry"),
    };
    resolve_member(constant_pool, class_index, name_and_type_index)
}

fn resolve_field_ref(constant_pool: &[ConstantPool], index: u16) -> Result<FieldRef> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing field ref entry")?;
    let ConstantPool::Fieldref {
        class_index,
        name_and_type_index,
    } = entry
    else {
        anyhow::bail!("unexpected field ref entry");
    };
    let member = resolve_member(constant_pool, *class_index, *name_and_type_index)?;
    let kind = field_kind(&member.descriptor)?;
    Ok(FieldRef {
        owner: member.owner,
        name: member.name,
        descriptor: member.descriptor,
        kind,
    })
}

fn resolve_member(
    constant_pool: &[ConstantPool],
    class_index: u16,
    name_and_type_index: u16,
) -> Result<MemberRef> {
    let owner = resolve_class_name(constant_pool, class_index).context("resolve owner")?;
    let (name_index, descriptor_index) = resolve_name_and_type(constant_pool, name_and_type_index)?;
    let name = resolve_utf8(constant_pool, name_index).context("resolve member name")?;
    let descriptor =
        resolve_utf8(constant_pool, descriptor_index).context("resolve member descriptor")?;
    Ok(MemberRef {
        owner,
        name,
        descriptor,
    })
}

fn resolve_invoke_dynamic_descriptor(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing invokedynamic entry")?;
    let ConstantPool::InvokeDynamic {
        name_and_type_index,
        ..
    } = entry
    else {
        anyhow::bail!("unexpected invokedynamic entry");
    };
    let (_, descriptor_index) = resolve_name_and_type(constant_pool, *name_and_type_index)?;
    resolve_utf8(constant_pool, descriptor_index).context("resolve invokedynamic descriptor")
}

fn resolve_name_and_type(constant_pool: &[ConstantPool], index: u16) -> Result<(u16, u16)> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing name and type entry")?;
    match entry {
        ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        } => Ok((*name_index, *descriptor_index)),
        _ => anyhow::bail!("unexpected name and type entry"),
    }
}

fn parse_exception_handlers(
    table: &[jclassfile::attributes::ExceptionRecord],
    constant_pool: &[ConstantPool],
    positions: &BTreeMap<u32, usize>,
    code_len: usize,
    instruction_count: usize,
) -> Result<Vec<ExceptionHandler>> {
    let index_of = |pc: u32| -> Result<usize> {
        if pc as usize == code_len {
            return Ok(instruction_count);
        }
        positions
            .get(&pc)
            .copied()
            .with_context(|| format!("handler offset {pc} is not an instruction boundary"))
    };
    let mut handlers = Vec::new();
    for entry in table {
        let catch_type = if entry.catch_type() == 0 {
            None
        } else {
            Some(
                resolve_class_name(constant_pool, entry.catch_type())
                    .context("resolve catch type")?,
            )
        };
        handlers.push(ExceptionHandler {
            start: index_of(entry.start_pc() as u32)?,
            end: index_of(entry.end_pc() as u32)?,
            handler: index_of(entry.handler_pc() as u32)?,
            catch_type,
        });
    }
    Ok(handlers)
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        opcodes::BIPUSH => 2,
        opcodes::SIPUSH => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        opcodes::IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        opcodes::RET => 2,
        opcodes::TABLESWITCH => tableswitch_length(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        opcodes::NEW => 3,
        opcodes::NEWARRAY => 2,
        opcodes::ANEWARRAY => 3,
        opcodes::ARRAYLENGTH | opcodes::ATHROW => 1,
        opcodes::CHECKCAST | opcodes::INSTANCEOF => 3,
        opcodes::MONITORENTER | opcodes::MONITOREXIT => 1,
        opcodes::WIDE => wide_length(code, offset)?,
        opcodes::MULTIANEWARRAY => 4,
        opcodes::IFNULL | opcodes::IFNONNULL => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        0xca | 0xfe | 0xff => 1,
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .context("missing wide opcode")?;
    if opcode == opcodes::IINC { Ok(6) } else { Ok(4) }
}

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode i32 out of bounds")?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}
