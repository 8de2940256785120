//! Renders the verbose runtime symbol triplet (namespace, name, signature)
//! into a source-like form. Purely syntactic; never fails.

const TYPE_PREFIXES: &[&str] = &[
    "required_modifier ",
    "System.Runtime.InteropServices.InAttribute ",
    "value ",
    "class ",
];

const ERASED_GENERIC: &str = "System.__Canon";

/// Cleans a single type token: qualifier prefixes are stripped, generic
/// arity markers are rendered with their arguments (or `T` placeholders),
/// erased-generic tokens become `T`. Array dimensions, the nested-type `+`
/// separator and trailing `&`/`*` suffixes pass through verbatim.
pub fn clean_type_name(raw: &str) -> String {
    let mut s = raw.trim();
    loop {
        let mut stripped = false;
        for prefix in TYPE_PREFIXES {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest;
                stripped = true;
            }
        }
        if !stripped {
            break;
        }
    }
    render_type(s)
}

/// Renders `(namespace, name, signature)` as `Namespace.Name(args)`, or as
/// `new Namespace(args)` for constructors.
pub fn clean_method_symbol(namespace: &str, name: &str, signature: &str) -> String {
    let args = render_signature_args(signature);
    let namespace = clean_type_name(namespace);
    if name == ".ctor" {
        return format!("new {namespace}({args})");
    }
    let name = clean_type_name(name);
    if namespace.is_empty() {
        format!("{name}({args})")
    } else {
        format!("{namespace}.{name}({args})")
    }
}

fn render_signature_args(signature: &str) -> String {
    let Some(open) = signature.find('(') else {
        return String::new();
    };
    let Some(close) = signature.rfind(')') else {
        return String::new();
    };
    if close <= open {
        return String::new();
    }
    let inner = signature[open + 1..close].trim();
    if inner.is_empty() {
        return String::new();
    }
    split_top_level(inner)
        .into_iter()
        .map(clean_type_name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_type(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        match bytes[i] {
            b'`' => {
                let mut j = i + 1;
                while j < s.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j == i + 1 {
                    // A lone backtick is not an arity marker.
                    out.push('`');
                    i += 1;
                    continue;
                }
                let arity: usize = s[i + 1..j].parse().unwrap_or(1);
                if j < s.len() && (bytes[j] == b'[' || bytes[j] == b'<') {
                    let Some(close) = matching_bracket(bytes, j) else {
                        // Unbalanced input; keep the rest as-is.
                        out.push_str(&s[i..]);
                        return out;
                    };
                    let cleaned: Vec<String> = split_top_level(&s[j + 1..close])
                        .into_iter()
                        .map(clean_type_name)
                        .collect();
                    out.push('<');
                    out.push_str(&cleaned.join(", "));
                    out.push('>');
                    i = close + 1;
                } else {
                    out.push('<');
                    out.push_str(&vec!["T"; arity.max(1)].join(", "));
                    out.push('>');
                    i = j;
                }
            }
            b'!' => {
                // `!0` is a type parameter, `!!0` a method type parameter.
                let mut j = i + 1;
                if j < s.len() && bytes[j] == b'!' {
                    j += 1;
                }
                let digits_start = j;
                while j < s.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j > digits_start {
                    out.push('T');
                    i = j;
                } else {
                    out.push('!');
                    i += 1;
                }
            }
            b'S' if s[i..].starts_with(ERASED_GENERIC)
                && !continues_identifier(bytes, i + ERASED_GENERIC.len()) =>
            {
                out.push('T');
                i += ERASED_GENERIC.len();
            }
            _ => {
                let ch = s[i..].chars().next().expect("index is a char boundary");
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    out
}

fn continues_identifier(bytes: &[u8], index: usize) -> bool {
    bytes
        .get(index)
        .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
}

fn matching_bracket(bytes: &[u8], open: usize) -> Option<usize> {
    let open_char = bytes[open];
    let close_char = match open_char {
        b'[' => b']',
        b'<' => b'>',
        _ => return None,
    };
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if b == open_char {
            depth += 1;
        } else if b == close_char {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'[' | b'<' | b'(' => depth += 1,
            b']' | b'>' | b')' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if !s.is_empty() {
        parts.push(&s[start..]);
    }
    parts
}
