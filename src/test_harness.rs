use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::classpath::resolve_classpath;
use crate::engine::{Engine, EngineOutput, build_context};
use crate::inference::AnalysisConfig;
use crate::scan::scan_inputs;

/// Source file definition for compilation.
pub(crate) struct SourceFile {
    pub(crate) path: String,
    pub(crate) contents: String,
}

/// Compiled output directory owned by a temp dir.
pub(crate) struct CompileOutput {
    _temp_dir: TempDir,
    classes_dir: PathBuf,
}

impl CompileOutput {
    pub(crate) fn classes_dir(&self) -> &Path {
        &self.classes_dir
    }
}

/// Test harness that compiles Java sources and runs the inference passes.
pub(crate) struct JvmTestHarness {
    javac: PathBuf,
}

impl JvmTestHarness {
    pub(crate) fn new() -> Result<Self> {
        let javac = javac_path()?;
        Ok(Self { javac })
    }

    pub(crate) fn compile(&self, sources: &[SourceFile]) -> Result<CompileOutput> {
        let temp_dir = tempfile::tempdir().context("create temp dir")?;
        let src_dir = temp_dir.path().join("src");
        let classes_dir = temp_dir.path().join("classes");
        fs::create_dir_all(&src_dir).context("create src dir")?;
        fs::create_dir_all(&classes_dir).context("create classes dir")?;

        let mut source_paths = Vec::new();
        for source in sources {
            let path = src_dir.join(&source.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("create source parent dir")?;
            }
            fs::write(&path, source.contents.as_bytes()).context("write source file")?;
            source_paths.push(path);
        }

        let mut command = Command::new(&self.javac);
        command.arg("-g").arg("-d").arg(&classes_dir);
        command.args(&source_paths);
        run_command(command, "javac")?;

        Ok(CompileOutput {
            _temp_dir: temp_dir,
            classes_dir,
        })
    }

    pub(crate) fn analyze(&self, classes_dir: &Path) -> Result<EngineOutput> {
        let scan = scan_inputs(classes_dir, &[], None).context("scan classes")?;
        let classpath_index = resolve_classpath(&scan.classes).context("resolve classpath")?;
        let context = build_context(
            scan.classes,
            classpath_index,
            &scan.artifacts,
            AnalysisConfig::default(),
        );
        Engine::new().analyze(context).context("run analysis")
    }

    pub(crate) fn compile_and_analyze(&self, sources: &[SourceFile]) -> Result<EngineOutput> {
        let output = self.compile(sources)?;
        self.analyze(output.classes_dir())
    }
}

fn javac_path() -> Result<PathBuf> {
    let java_home = std::env::var("JAVA_HOME").context("JAVA_HOME not set")?;
    let mut path = PathBuf::from(java_home);
    path.push("bin");
    path.push("javac");
    if cfg!(windows) {
        path.set_extension("exe");
    }
    if !path.exists() {
        anyhow::bail!("javac not found at {}", path.display());
    }
    Ok(path)
}

fn run_command(mut command: Command, label: &str) -> Result<()> {
    let output = command.output().with_context(|| format!("run {label}"))?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{label} failed: stdout={stdout} stderr={stderr}");
    }
    Ok(())
}

/// Minimal class file writer for tests that need exact bytecode.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    this_class: u16,
    super_class: u16,
    methods: Vec<MethodSpec>,
    code_index: u16,
}

/// Exception table row in byte offsets.
pub(crate) struct HandlerSpec {
    pub(crate) start_pc: u16,
    pub(crate) end_pc: u16,
    pub(crate) handler_pc: u16,
    pub(crate) catch_type: u16,
}

struct MethodSpec {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    body: Option<CodeSpec>,
}

struct CodeSpec {
    code: Vec<u8>,
    max_stack: u16,
    max_locals: u16,
    handlers: Vec<HandlerSpec>,
}

enum CpEntry {
    Utf8(String),
    Class(u16),
    NameAndType(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    FieldRef(u16, u16),
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            this_class: 0,
            super_class: 0,
            methods: Vec::new(),
            code_index: 0,
        };
        builder.code_index = builder.add_utf8("Code");
        builder.this_class = builder.add_class(class_name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    fn add_utf8(&mut self, value: &str) -> u16 {
        self.cp.push(CpEntry::Utf8(value.to_string()));
        self.cp.len() as u16
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.cp.push(CpEntry::Class(name_index));
        self.cp.len() as u16
    }

    fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.cp
            .push(CpEntry::NameAndType(name_index, descriptor_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp.push(CpEntry::MethodRef(class_index, name_and_type));
        self.cp.len() as u16
    }

    pub(crate) fn add_interface_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp
            .push(CpEntry::InterfaceMethodRef(class_index, name_and_type));
        self.cp.len() as u16
    }

    pub(crate) fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp.push(CpEntry::FieldRef(class_index, name_and_type));
        self.cp.len() as u16
    }

    pub(crate) fn add_method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
        max_stack: u16,
        max_locals: u16,
    ) {
        self.add_method_with_handlers(
            access,
            name,
            descriptor,
            code,
            max_stack,
            max_locals,
            Vec::new(),
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_method_with_handlers(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
        max_stack: u16,
        max_locals: u16,
        handlers: Vec<HandlerSpec>,
    ) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.methods.push(MethodSpec {
            access,
            name_index,
            descriptor_index,
            body: Some(CodeSpec {
                code,
                max_stack,
                max_locals,
                handlers,
            }),
        });
    }

    /// Adds a method without a Code attribute (abstract or native).
    pub(crate) fn add_abstract_method(&mut self, access: u16, name: &str, descriptor: &str) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.methods.push(MethodSpec {
            access,
            name_index,
            descriptor_index,
            body: None,
        });
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 52);
        write_u16(&mut bytes, (self.cp.len() + 1) as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, 0x0021);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            write_u16(&mut bytes, method.access);
            write_u16(&mut bytes, method.name_index);
            write_u16(&mut bytes, method.descriptor_index);
            let Some(body) = &method.body else {
                write_u16(&mut bytes, 0);
                continue;
            };
            write_u16(&mut bytes, 1);
            write_u16(&mut bytes, self.code_index);
            let attr_len = 12 + body.code.len() as u32 + 8 * body.handlers.len() as u32;
            write_u32(&mut bytes, attr_len);
            write_u16(&mut bytes, body.max_stack);
            write_u16(&mut bytes, body.max_locals);
            write_u32(&mut bytes, body.code.len() as u32);
            bytes.extend_from_slice(&body.code);
            write_u16(&mut bytes, body.handlers.len() as u16);
            for handler in &body.handlers {
                write_u16(&mut bytes, handler.start_pc);
                write_u16(&mut bytes, handler.end_pc);
                write_u16(&mut bytes, handler.handler_pc);
                write_u16(&mut bytes, handler.catch_type);
            }
            write_u16(&mut bytes, 0);
        }
        write_u16(&mut bytes, 0);
        bytes
    }
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::FieldRef(class_index, name_and_type) => {
                bytes.push(9);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::InterfaceMethodRef(class_index, name_and_type) => {
                bytes.push(11);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
        }
    }
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn high(value: u16) -> u8 {
    (value >> 8) as u8
}

pub(crate) fn low(value: u16) -> u8 {
    (value & 0xff) as u8
}
