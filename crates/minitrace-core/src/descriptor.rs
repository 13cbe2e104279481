//! Human-readable type descriptors.

/// Turn a type descriptor into its source-level name.
///
/// `Ljava/lang/String;` becomes `java.lang.String`, `[[I` becomes `int[][]`.
/// Anything that is not a well-formed descriptor is returned unchanged.
pub fn pretty_descriptor(descriptor: &str) -> String {
    let dims = descriptor.bytes().take_while(|&b| b == b'[').count();
    let element = &descriptor[dims..];

    let base = match element.as_bytes() {
        [b'L', .., b';'] => element[1..element.len() - 1].replace('/', "."),
        [c] => match primitive_name(*c) {
            Some(name) => name.to_string(),
            None => return descriptor.to_string(),
        },
        _ => return descriptor.to_string(),
    };

    let mut pretty = base;
    for _ in 0..dims {
        pretty.push_str("[]");
    }
    pretty
}

fn primitive_name(c: u8) -> Option<&'static str> {
    Some(match c {
        b'B' => "byte",
        b'C' => "char",
        b'D' => "double",
        b'F' => "float",
        b'I' => "int",
        b'J' => "long",
        b'S' => "short",
        b'Z' => "boolean",
        b'V' => "void",
        _ => return None,
    })
}
