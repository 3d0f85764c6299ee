//! Name, type, and route normalization used by the pairing layers.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// Normalize an element name: lower-cased with underscores and hyphens
/// collapsed, so `userName` ≡ `user_name` ≡ `username`.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn type_synonyms() -> &'static HashMap<&'static str, &'static str> {
    static SYNONYMS: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    SYNONYMS.get_or_init(|| {
        HashMap::from([
            ("integer", "int"),
            ("int32", "int"),
            ("i32", "int"),
            ("smallint", "int"),
            ("int64", "long"),
            ("i64", "long"),
            ("bigint", "long"),
            ("real", "float"),
            ("f32", "float"),
            ("float64", "double"),
            ("f64", "double"),
            ("varchar", "string"),
            ("text", "string"),
            ("str", "string"),
            ("char", "string"),
            ("boolean", "bool"),
            ("numeric", "decimal"),
            ("timestamp", "datetime"),
            ("guid", "uuid"),
            ("dict", "map"),
            ("object", "map"),
            ("array", "list"),
            ("vec", "list"),
        ])
    })
}

/// Normalize a type name into its equivalence-class representative
/// (`int` ≡ `int32`, `string` ≡ `varchar`).
pub fn normalize_type(type_name: &str) -> String {
    let lowered: String = type_name
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect();
    match type_synonyms().get(lowered.as_str()) {
        Some(canonical) => (*canonical).to_string(),
        None => lowered,
    }
}

/// Whether two normalized types are equivalent.
pub fn types_equivalent(a: &str, b: &str) -> bool {
    normalize_type(a) == normalize_type(b)
}

/// Whether `source -> target` is a recognized numeric widening
/// (a warning rather than a critical mismatch).
pub fn is_numeric_widening(source: &str, target: &str) -> bool {
    const WIDENINGS: &[(&str, &str)] = &[
        ("int", "long"),
        ("int", "float"),
        ("int", "double"),
        ("int", "decimal"),
        ("long", "decimal"),
        ("long", "double"),
        ("float", "double"),
        ("float", "decimal"),
    ];
    let source = normalize_type(source);
    let target = normalize_type(target);
    WIDENINGS
        .iter()
        .any(|(from, to)| *from == source && *to == target)
}

fn route_variable() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // :id, {id}, <id>, $id
        Regex::new(r"^(:.+|\{.+\}|<.+>|\$.+)$").unwrap()
    })
}

/// Normalize a route pattern: lower-cased, trailing slash trimmed, path
/// variables folded to `{}` so `/users/:id` ≡ `/users/{user_id}`.
pub fn normalize_route(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    let segments: Vec<String> = trimmed
        .split('/')
        .map(|segment| {
            if route_variable().is_match(segment) {
                "{}".to_string()
            } else {
                segment.to_lowercase()
            }
        })
        .collect();
    let joined = segments.join("/");
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}
