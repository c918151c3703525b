//! JVM method and field descriptor parsing.

/// Raw parameter type descriptors of a method descriptor, in order.
///
/// Malformed descriptors yield the parameters parsed up to the defect;
/// callers treat the result as best-effort (resolution failures degrade
/// precision, they never abort a scan).
pub(crate) fn parameter_types(descriptor: &str) -> Vec<String> {
    let mut parameters = Vec::new();
    let Some(rest) = descriptor.strip_prefix('(') else {
        return parameters;
    };
    let bytes = rest.as_bytes();
    let mut index = 0;
    while index < bytes.len() && bytes[index] != b')' {
        let Some(end) = type_end(bytes, index) else {
            break;
        };
        parameters.push(rest[index..end].to_string());
        index = end;
    }
    parameters
}

pub(crate) fn parameter_count(descriptor: &str) -> usize {
    parameter_types(descriptor).len()
}

/// Descriptor of the return type, the text after `)`.
pub(crate) fn return_type(descriptor: &str) -> Option<&str> {
    let (_, rest) = descriptor.split_once(')')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Internal class name of an object type descriptor (`Lfoo/Bar;`).
///
/// Arrays and primitives return `None`: they are not resolvable
/// reference types for the registration heuristics.
pub(crate) fn object_class(type_descriptor: &str) -> Option<&str> {
    type_descriptor
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
}

/// Whether a type descriptor occupies two local-variable slots.
pub(crate) fn is_wide(type_descriptor: &str) -> bool {
    matches!(type_descriptor, "J" | "D")
}

fn type_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut index = start;
    while bytes.get(index) == Some(&b'[') {
        index += 1;
    }
    match bytes.get(index)? {
        b'L' => {
            while *bytes.get(index)? != b';' {
                index += 1;
            }
            Some(index + 1)
        }
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(index + 1),
        _ => None,
    }
}
