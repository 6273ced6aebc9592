use anyhow::{Context, Result};

use crate::descriptor::{
    canonical_class_name, method_param_count, parameter_type_names, return_type_name,
    returns_boolean,
};
use crate::facts::ParamPath;
use crate::ir::{Class, Method};

const CONSTRUCTOR: &str = "<init>";

/// External-annotation key of a method: `canonical.Class returnType name(paramTypes)`.
pub(crate) fn annotation_key_prefix(class: &Class, method: &Method) -> Result<String> {
    let class_name = canonical_class_name(&class.name);
    let mut parameters = parameter_type_names(&method.descriptor)
        .with_context(|| format!("render parameters of {}{}", method.name, method.descriptor))?;
    if method.access.is_varargs {
        if let Some(last) = parameters.last_mut() {
            if let Some(element) = last.strip_suffix("[]") {
                *last = format!("{element}...");
            }
        }
    }
    let parameters = parameters.join(", ");

    if method.name == CONSTRUCTOR {
        let simple_name = class_name.rsplit('.').next().unwrap_or(&class_name);
        return Ok(format!("{class_name} {simple_name}({parameters})"));
    }
    let return_type = return_type_name(&method.descriptor)
        .with_context(|| format!("render return type of {}{}", method.name, method.descriptor))?;
    Ok(format!("{class_name} {return_type} {}({parameters})", method.name))
}

/// Key of one declared parameter (`this` excluded).
pub(crate) fn parameter_annotation_key(
    class: &Class,
    method: &Method,
    parameter_index: usize,
) -> Result<String> {
    Ok(format!(
        "{} {parameter_index}",
        annotation_key_prefix(class, method)?
    ))
}

/// Render `@Contract("null, _ -> true")` style text for a single-parameter contract.
pub(crate) fn render_contract(
    descriptor: &str,
    parameter_index: usize,
    path: ParamPath,
    result: bool,
) -> Result<String> {
    let count = method_param_count(descriptor)?;
    anyhow::ensure!(
        parameter_index < count,
        "parameter {parameter_index} out of range for {descriptor}"
    );
    let clauses: Vec<&str> = (0..count)
        .map(|index| match (index == parameter_index, path) {
            (false, _) => "_",
            (true, ParamPath::Null) => "null",
            (true, ParamPath::NotNull) => "!null",
        })
        .collect();
    let value = match (returns_boolean(descriptor), result) {
        (true, true) => "true",
        (true, false) => "false",
        (false, true) => "1",
        (false, false) => "0",
    };
    Ok(format!("@Contract(\"{} -> {value}\")", clauses.join(", ")))
}
