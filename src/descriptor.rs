use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// Computational category of a JVM value as seen by the operand stack.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum ValueKind {
    Void,
    Int,
    Float,
    Long,
    Double,
    Reference,
}

impl ValueKind {
    /// Number of local slots occupied by a value of this kind.
    pub(crate) fn slots(self) -> usize {
        match self {
            ValueKind::Void => 0,
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }
}

/// Count parameters in a JVM method descriptor.
pub(crate) fn method_param_count(descriptor: &str) -> Result<usize> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    Ok(descriptor.parameter_types().len())
}

/// Value kinds of the declared parameters, in order.
pub(crate) fn parameter_kinds(descriptor: &str) -> Result<Vec<ValueKind>> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    Ok(descriptor.parameter_types().iter().map(value_kind).collect())
}

/// Value kind returned by a JVM method descriptor.
pub(crate) fn return_kind(descriptor: &str) -> Result<ValueKind> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    Ok(value_kind(descriptor.return_type()))
}

/// Whether the descriptor declares a `boolean` return.
pub(crate) fn returns_boolean(descriptor: &str) -> bool {
    descriptor.ends_with(")Z")
}

/// Value kind of a field descriptor such as `I` or `Ljava/lang/String;`.
pub(crate) fn field_kind(descriptor: &str) -> Result<ValueKind> {
    let kind = match descriptor.chars().next().context("empty field descriptor")? {
        'B' | 'C' | 'I' | 'S' | 'Z' => ValueKind::Int,
        'F' => ValueKind::Float,
        'J' => ValueKind::Long,
        'D' => ValueKind::Double,
        'L' | '[' => ValueKind::Reference,
        other => anyhow::bail!("invalid field descriptor start '{other}' in {descriptor}"),
    };
    Ok(kind)
}

/// Canonical Java names of the declared parameters.
pub(crate) fn parameter_type_names(descriptor: &str) -> Result<Vec<String>> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    Ok(descriptor
        .parameter_types()
        .iter()
        .map(java_type_name)
        .collect())
}

/// Canonical Java name of the return type.
pub(crate) fn return_type_name(descriptor: &str) -> Result<String> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    Ok(java_type_name(descriptor.return_type()))
}

/// Render a descriptor type the way Java source spells it.
pub(crate) fn java_type_name(ty: &TypeDescriptor) -> String {
    match ty {
        TypeDescriptor::Byte => "byte".to_string(),
        TypeDescriptor::Char => "char".to_string(),
        TypeDescriptor::Double => "double".to_string(),
        TypeDescriptor::Float => "float".to_string(),
        TypeDescriptor::Integer => "int".to_string(),
        TypeDescriptor::Long => "long".to_string(),
        TypeDescriptor::Short => "short".to_string(),
        TypeDescriptor::Boolean => "boolean".to_string(),
        TypeDescriptor::Void => "void".to_string(),
        TypeDescriptor::Object(class) => canonical_class_name(class),
        TypeDescriptor::Array(inner, dims) => {
            let mut name = java_type_name(inner.as_ref());
            for _ in 0..(*dims as usize) {
                name.push_str("[]");
            }
            name
        }
    }
}

/// Convert an internal class name to its canonical form, keeping a trailing `$`.
pub(crate) fn canonical_class_name(internal: &str) -> String {
    let dotted = internal.replace('/', ".");
    match dotted.strip_suffix('$') {
        Some(head) => format!("{}$", head.replace('$', ".")),
        None => dotted.replace('$', "."),
    }
}

fn value_kind(ty: &TypeDescriptor) -> ValueKind {
    match ty {
        TypeDescriptor::Void => ValueKind::Void,
        TypeDescriptor::Long => ValueKind::Long,
        TypeDescriptor::Double => ValueKind::Double,
        TypeDescriptor::Float => ValueKind::Float,
        TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _) => ValueKind::Reference,
        _ => ValueKind::Int,
    }
}
