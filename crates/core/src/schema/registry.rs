//! Process-wide type registry
//!
//! Declarations are stored by type name. The first `register_or_get` for a
//! type validates its declaration and caches the resolved [`TypeInfo`];
//! later calls return the cached entry. Both tables are `DashMap`s so
//! concurrent first use from several threads is safe (the first resolved
//! entry wins).

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use serde_json::{json, Map, Number, Value as Json};
use tracing::{debug, error, trace, warn};

use super::descriptor::{Descriptor, SemanticType, TypeDeclaration};
use super::hash::hash_str;
use super::DataClass;
use crate::error::{DataError, DataResult};
use crate::value::Value;

/// Declarations by type name
static DECLARATIONS: LazyLock<DashMap<String, Arc<TypeDeclaration>>> = LazyLock::new(DashMap::new);

/// Resolved type info by type name
static RESOLVED: LazyLock<DashMap<String, Arc<TypeInfo>>> = LazyLock::new(DashMap::new);

/// Resolved, immutable descriptor table of one type
#[derive(Debug)]
pub struct TypeInfo {
    name: String,
    hash: u32,
    descriptors: Vec<Descriptor>,
    by_name: HashMap<String, usize>,
    by_key: HashMap<String, usize>,
    linked: Vec<usize>,
}

impl TypeInfo {
    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// FNV-1a hash of the type name
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Descriptors in declaration order
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, index: usize) -> Option<&Descriptor> {
        self.descriptors.get(index)
    }

    /// Look up a descriptor by property name
    pub fn find(&self, name: &str) -> Option<&Descriptor> {
        self.by_name.get(name).map(|&i| &self.descriptors[i])
    }

    /// Look up a descriptor by serialization key
    pub fn find_by_key(&self, key: &str) -> Option<&Descriptor> {
        self.by_key.get(key).map(|&i| &self.descriptors[i])
    }

    /// Indices of linked properties
    pub fn linked(&self) -> &[usize] {
        &self.linked
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Declare a type
///
/// The first declaration of a name wins; later ones are ignored.
///
/// # Returns
/// `true` if the declaration was new
pub fn declare(declaration: TypeDeclaration) -> bool {
    use dashmap::mapref::entry::Entry;

    match DECLARATIONS.entry(declaration.name.clone()) {
        Entry::Occupied(_) => {
            trace!("Type {} already declared", declaration.name);
            false
        }
        Entry::Vacant(slot) => {
            debug!(
                "Declared type {} ({} properties)",
                declaration.name,
                declaration.properties.len()
            );
            slot.insert(Arc::new(declaration));
            true
        }
    }
}

/// Declare a data class and every data class its properties mention
pub fn declare_class<T: DataClass>() -> bool {
    let declaration = T::declaration();
    let nested: Vec<fn()> = declaration
        .properties
        .iter()
        .filter_map(|p| p.nested)
        .collect();

    let is_new = declare(declaration);
    if is_new {
        for declare_nested in nested {
            declare_nested();
        }
    }
    is_new
}

/// Whether a type name has been declared
pub fn is_declared(type_name: &str) -> bool {
    DECLARATIONS.contains_key(type_name)
}

/// Get the resolved descriptor table for a type, resolving it on first use
///
/// # Arguments
/// * `type_name` - A declared type name
///
/// # Returns
/// The shared `TypeInfo`, or `UnknownType` / `CyclicDependency` /
/// `InvalidDeclaration` if the type cannot be resolved.
pub fn register_or_get(type_name: &str) -> DataResult<Arc<TypeInfo>> {
    if let Some(info) = RESOLVED.get(type_name) {
        trace!("Cache hit for type {}", type_name);
        return Ok(Arc::clone(info.value()));
    }

    let declaration = DECLARATIONS
        .get(type_name)
        .map(|d| Arc::clone(d.value()))
        .ok_or_else(|| DataError::UnknownType(type_name.to_string()))?;

    let info = resolve(&declaration).inspect_err(|e| {
        error!("Failed to resolve type {}: {}", type_name, e);
    })?;

    debug!(
        "Resolved type {} ({} properties, {} linked, hash={:#010x})",
        info.name,
        info.descriptors.len(),
        info.linked.len(),
        info.hash
    );

    let entry = RESOLVED
        .entry(type_name.to_string())
        .or_insert_with(|| Arc::new(info));
    Ok(Arc::clone(entry.value()))
}

/// Drop every resolved entry
///
/// Declarations stay; types are re-resolved on next use. Objects already
/// created keep the `TypeInfo` they were built with.
pub fn clear_cache() {
    RESOLVED.clear();
    debug!("Type cache cleared");
}

/// Drop every declaration and resolved entry
pub fn reset() {
    RESOLVED.clear();
    DECLARATIONS.clear();
    debug!("Type registry reset");
}

/// Number of resolved types
pub fn cache_size() -> usize {
    RESOLVED.len()
}

/// Names of every declared type, sorted
pub fn declared_types() -> Vec<String> {
    let mut names: Vec<String> = DECLARATIONS.iter().map(|e| e.key().clone()).collect();
    names.sort();
    names
}

/// JSON description of every declared type, for external tooling
///
/// ```text
/// { "types": [ { "name", "hash", "properties": [
///     { "name", "key", "type", "container", "object_type", "flags",
///       "default", "linked", "depends_on" } ] } ] }
/// ```
///
/// Types are sorted by name; properties keep declaration order. Linked
/// properties carry no `default`. Types that fail to resolve are logged
/// and left out.
pub fn schema_json() -> Json {
    let mut types = Vec::new();
    for name in declared_types() {
        match register_or_get(&name) {
            Ok(info) => types.push(type_json(&info)),
            Err(e) => warn!("Leaving {} out of the schema: {}", name, e),
        }
    }
    json!({ "types": types })
}

fn type_json(info: &TypeInfo) -> Json {
    let properties: Vec<Json> = info.descriptors().iter().map(descriptor_json).collect();
    json!({
        "name": info.name(),
        "hash": info.hash(),
        "properties": properties,
    })
}

fn descriptor_json(descriptor: &Descriptor) -> Json {
    let ty = descriptor.semantic_type();
    let flags: Vec<String> = descriptor
        .flags()
        .iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect();

    let mut out = Map::new();
    out.insert("name".into(), json!(descriptor.name()));
    out.insert("key".into(), json!(descriptor.key()));
    out.insert("type".into(), json!(ty.to_string()));
    out.insert("container".into(), json!(ty.is_collection()));
    out.insert("object_type".into(), json!(ty.object_type()));
    out.insert("flags".into(), json!(flags));
    if !descriptor.is_linked() {
        out.insert("default".into(), plain_json(descriptor.default_value()));
    }
    out.insert("linked".into(), json!(descriptor.is_linked()));
    out.insert("depends_on".into(), json!(descriptor.depends_on()));
    Json::Object(out)
}

/// JSON form of a declared default, which never holds objects
fn plain_json(value: &Value) -> Json {
    match value {
        Value::Null | Value::Object(_) => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::String(s) => json!(s),
        Value::Array(items) | Value::Set(items) => {
            Json::Array(items.iter().map(plain_json).collect())
        }
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), plain_json(v)))
                .collect(),
        ),
    }
}

fn resolve(declaration: &TypeDeclaration) -> DataResult<TypeInfo> {
    let type_name = declaration.name.as_str();
    let invalid = |reason: String| DataError::InvalidDeclaration {
        type_name: type_name.to_string(),
        reason,
    };

    if type_name.is_empty() {
        return Err(invalid("type name is empty".to_string()));
    }

    let mut descriptors = Vec::with_capacity(declaration.properties.len());
    let mut by_name = HashMap::new();
    let mut by_key = HashMap::new();

    for (index, property) in declaration.properties.iter().enumerate() {
        if property.name.is_empty() || property.name.contains('.') {
            return Err(invalid(format!(
                "property name '{}' must be non-empty and contain no '.'",
                property.name
            )));
        }

        check_semantic_type(&property.semantic_type).map_err(&invalid)?;

        let default = match &property.default {
            Some(value) => property
                .semantic_type
                .coerce_plain(value.clone())
                .ok_or_else(|| {
                    invalid(format!(
                        "default of '{}' is not a {}",
                        property.name, property.semantic_type
                    ))
                })?,
            None => property.semantic_type.default_value(),
        };

        let descriptor = property.build(index, default);

        if by_name.insert(descriptor.name().to_string(), index).is_some() {
            return Err(invalid(format!("duplicate property '{}'", descriptor.name())));
        }
        if by_key.insert(descriptor.key().to_string(), index).is_some() {
            return Err(invalid(format!(
                "duplicate serialization key '{}'",
                descriptor.key()
            )));
        }

        descriptors.push(descriptor);
    }

    for descriptor in descriptors.iter().filter(|d| d.is_linked()) {
        for path in &descriptor.dependency_paths {
            check_dependency(&descriptors, &by_name, path).map_err(|reason| {
                invalid(format!(
                    "dependency '{}' of '{}': {}",
                    path.join("."),
                    descriptor.name(),
                    reason
                ))
            })?;
        }
    }

    if let Some(cycle) = find_cycle(&descriptors, &by_name) {
        return Err(DataError::CyclicDependency {
            type_name: type_name.to_string(),
            cycle,
        });
    }

    let linked = descriptors
        .iter()
        .filter(|d| d.is_linked())
        .map(Descriptor::index)
        .collect();

    Ok(TypeInfo {
        name: type_name.to_string(),
        hash: hash_str(type_name),
        descriptors,
        by_name,
        by_key,
        linked,
    })
}

fn check_semantic_type(ty: &SemanticType) -> Result<(), String> {
    match ty {
        SemanticType::Object(name) => {
            if is_declared(name) {
                Ok(())
            } else {
                Err(format!("nested type '{}' is not declared", name))
            }
        }
        SemanticType::Array(element) | SemanticType::Map(element) => {
            if element.is_collection() {
                return Err(format!("collection of collections ({}) is not supported", ty));
            }
            check_semantic_type(element)
        }
        SemanticType::Set(element) => match **element {
            SemanticType::Bool | SemanticType::Int | SemanticType::String => Ok(()),
            _ => Err(format!("set elements must be bool, int or string, not {}", element)),
        },
        _ => Ok(()),
    }
}

/// Check that a dotted dependency path names real properties
fn check_dependency(
    descriptors: &[Descriptor],
    by_name: &HashMap<String, usize>,
    path: &[String],
) -> Result<(), String> {
    let Some((first, rest)) = path.split_first() else {
        return Err("empty path".to_string());
    };

    let index = by_name
        .get(first)
        .ok_or_else(|| format!("'{}' is not a property", first))?;
    let mut current = descriptors[*index].semantic_type().clone();

    for segment in rest {
        let nested = current
            .object_type()
            .ok_or_else(|| format!("'{}' continues past a non-object property", segment))?
            .to_string();

        let declaration = DECLARATIONS
            .get(&nested)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| format!("nested type '{}' is not declared", nested))?;

        current = declaration
            .properties
            .iter()
            .find(|p| &p.name == segment)
            .map(|p| p.semantic_type.clone())
            .ok_or_else(|| format!("'{}' is not a property of {}", segment, nested))?;
    }

    Ok(())
}

/// Find a cycle among the linked properties of one type
///
/// Only the first segment of a dependency path can point back into the
/// same type, so edges go from a linked property to the linked properties
/// it names directly.
fn find_cycle(descriptors: &[Descriptor], by_name: &HashMap<String, usize>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    struct Search<'a> {
        descriptors: &'a [Descriptor],
        by_name: &'a HashMap<String, usize>,
        marks: Vec<Mark>,
        stack: Vec<usize>,
    }

    impl Search<'_> {
        fn edges(&self, index: usize) -> Vec<usize> {
            self.descriptors[index]
                .dependency_paths
                .iter()
                .filter_map(|path| path.first())
                .filter_map(|name| self.by_name.get(name).copied())
                .filter(|&i| self.descriptors[i].is_linked())
                .collect()
        }

        fn visit(&mut self, index: usize) -> Option<Vec<String>> {
            self.marks[index] = Mark::Active;
            self.stack.push(index);

            for next in self.edges(index) {
                match self.marks[next] {
                    Mark::Active => {
                        let start = self.stack.iter().position(|&s| s == next).unwrap_or(0);
                        let mut cycle: Vec<String> = self.stack[start..]
                            .iter()
                            .map(|&i| self.descriptors[i].name().to_string())
                            .collect();
                        cycle.push(self.descriptors[next].name().to_string());
                        return Some(cycle);
                    }
                    Mark::New => {
                        if let Some(cycle) = self.visit(next) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }

            self.stack.pop();
            self.marks[index] = Mark::Done;
            None
        }
    }

    let mut search = Search {
        descriptors,
        by_name,
        marks: vec![Mark::New; descriptors.len()],
        stack: Vec::new(),
    };

    for descriptor in descriptors.iter().filter(|d| d.is_linked()) {
        if search.marks[descriptor.index()] == Mark::New {
            if let Some(cycle) = search.visit(descriptor.index()) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyDeclaration;

    fn linked(name: &str, deps: &[&str]) -> PropertyDeclaration {
        PropertyDeclaration::new(name, SemanticType::Int).linked(deps, |_| Ok(Value::Int(0)))
    }

    #[test]
    fn test_unknown_type() {
        let err = register_or_get("registry.Missing").unwrap_err();
        assert_eq!(err, DataError::UnknownType("registry.Missing".to_string()));
    }

    #[test]
    fn test_first_declaration_wins() {
        let first = TypeDeclaration::new("registry.Twice")
            .property(PropertyDeclaration::new("a", SemanticType::Int));
        let second = TypeDeclaration::new("registry.Twice")
            .property(PropertyDeclaration::new("b", SemanticType::Int));

        assert!(declare(first));
        assert!(!declare(second));

        let info = register_or_get("registry.Twice").unwrap();
        assert!(info.find("a").is_some());
        assert!(info.find("b").is_none());
    }

    #[test]
    fn test_resolution_is_cached() {
        declare(
            TypeDeclaration::new("registry.Cached")
                .property(PropertyDeclaration::new("x", SemanticType::Float)),
        );

        let a = register_or_get("registry.Cached").unwrap();
        let b = register_or_get("registry.Cached").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache_size() >= 1);
        assert!(declared_types().contains(&"registry.Cached".to_string()));
    }

    #[test]
    fn test_clear_cache_re_resolves() {
        declare(
            TypeDeclaration::new("registry.Cleared")
                .property(PropertyDeclaration::new("x", SemanticType::Bool)),
        );

        let before = register_or_get("registry.Cleared").unwrap();
        clear_cache();
        let after = register_or_get("registry.Cleared").unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.descriptors().len(), after.descriptors().len());
    }

    #[test]
    fn test_declaration_order_and_keys() {
        declare(
            TypeDeclaration::new("registry.Ordered")
                .property(PropertyDeclaration::new("z", SemanticType::Int))
                .property(PropertyDeclaration::new("a", SemanticType::String).key("alpha"))
                .property(PropertyDeclaration::new("m", SemanticType::Bool)),
        );

        let info = register_or_get("registry.Ordered").unwrap();
        let names: Vec<&str> = info.descriptors().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
        assert_eq!(info.find_by_key("alpha").map(|d| d.name()), Some("a"));
        assert_eq!(info.hash(), hash_str("registry.Ordered"));
    }

    #[test]
    fn test_mutual_dependency_is_a_cycle() {
        declare(
            TypeDeclaration::new("registry.Loop")
                .property(linked("a", &["b"]))
                .property(linked("b", &["a"])),
        );

        match register_or_get("registry.Loop") {
            Err(DataError::CyclicDependency { type_name, cycle }) => {
                assert_eq!(type_name, "registry.Loop");
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
        assert!(!RESOLVED.contains_key("registry.Loop"));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        declare(TypeDeclaration::new("registry.SelfLoop").property(linked("a", &["a"])));
        assert!(matches!(
            register_or_get("registry.SelfLoop"),
            Err(DataError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_chained_linked_is_not_a_cycle() {
        declare(
            TypeDeclaration::new("registry.Chain")
                .property(PropertyDeclaration::new("base", SemanticType::Int))
                .property(linked("double", &["base"]))
                .property(linked("quad", &["double"])),
        );

        let info = register_or_get("registry.Chain").unwrap();
        assert_eq!(info.linked(), &[1, 2]);
    }

    #[test]
    fn test_invalid_declarations() {
        declare(
            TypeDeclaration::new("registry.Nested2D").property(PropertyDeclaration::new(
                "grid",
                SemanticType::array(SemanticType::array(SemanticType::Int)),
            )),
        );
        declare(
            TypeDeclaration::new("registry.FloatSet").property(PropertyDeclaration::new(
                "weights",
                SemanticType::set(SemanticType::Float),
            )),
        );
        declare(
            TypeDeclaration::new("registry.BadDefault").property(
                PropertyDeclaration::new("hp", SemanticType::Int).default("lots"),
            ),
        );
        declare(
            TypeDeclaration::new("registry.Dup")
                .property(PropertyDeclaration::new("x", SemanticType::Int))
                .property(PropertyDeclaration::new("x", SemanticType::Float)),
        );
        declare(
            TypeDeclaration::new("registry.BadDep")
                .property(linked("total", &["missing"])),
        );
        declare(TypeDeclaration::new("registry.Orphan").property(PropertyDeclaration::new(
            "child",
            SemanticType::object("registry.NeverDeclared"),
        )));

        for name in [
            "registry.Nested2D",
            "registry.FloatSet",
            "registry.BadDefault",
            "registry.Dup",
            "registry.BadDep",
            "registry.Orphan",
        ] {
            assert!(
                matches!(
                    register_or_get(name),
                    Err(DataError::InvalidDeclaration { .. })
                ),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_dependency_paths_through_nested_types() {
        declare(
            TypeDeclaration::new("registry.Item")
                .property(PropertyDeclaration::new("weight", SemanticType::Float)),
        );
        declare(
            TypeDeclaration::new("registry.Bag")
                .property(PropertyDeclaration::new(
                    "items",
                    SemanticType::array(SemanticType::object("registry.Item")),
                ))
                .property(linked("total", &["items.weight"])),
        );
        declare(
            TypeDeclaration::new("registry.BadBag")
                .property(PropertyDeclaration::new(
                    "items",
                    SemanticType::array(SemanticType::object("registry.Item")),
                ))
                .property(linked("total", &["items.volume"])),
        );

        assert!(register_or_get("registry.Bag").is_ok());
        assert!(matches!(
            register_or_get("registry.BadBag"),
            Err(DataError::InvalidDeclaration { .. })
        ));
    }

    #[test]
    fn test_default_is_coerced() {
        declare(
            TypeDeclaration::new("registry.Coerced")
                .property(PropertyDeclaration::new("speed", SemanticType::Float).default(3)),
        );

        let info = register_or_get("registry.Coerced").unwrap();
        assert_eq!(info.find("speed").unwrap().default_value(), &Value::Float(3.0));
    }

    #[test]
    fn test_schema_json_describes_declared_types() {
        declare(
            TypeDeclaration::new("registry.Described")
                .property(PropertyDeclaration::new("health", SemanticType::Int).default(100))
                .property(
                    PropertyDeclaration::new("tag", SemanticType::String)
                        .key("displayTag")
                        .read_only()
                        .strict(),
                )
                .property(PropertyDeclaration::new(
                    "scores",
                    SemanticType::map(SemanticType::Float),
                ))
                .property(linked("doubled", &["health"])),
        );
        declare(
            TypeDeclaration::new("registry.Unresolvable")
                .property(PropertyDeclaration::new("twice", SemanticType::Int))
                .property(PropertyDeclaration::new("twice", SemanticType::Bool)),
        );

        let schema = schema_json();
        let types = schema["types"].as_array().unwrap();
        let described = types
            .iter()
            .find(|t| t["name"] == "registry.Described")
            .unwrap();
        assert!(types.iter().all(|t| t["name"] != "registry.Unresolvable"));
        assert_eq!(described["hash"], json!(hash_str("registry.Described")));

        let properties = described["properties"].as_array().unwrap();
        assert_eq!(
            properties[0],
            json!({
                "name": "health",
                "key": "health",
                "type": "int",
                "container": false,
                "object_type": null,
                "flags": [],
                "default": 100,
                "linked": false,
                "depends_on": [],
            })
        );
        assert_eq!(properties[1]["key"], "displayTag");
        assert_eq!(properties[1]["flags"], json!(["read_only", "strict"]));
        assert_eq!(properties[2]["type"], "map<float>");
        assert_eq!(properties[2]["container"], true);
        assert_eq!(properties[2]["default"], json!({}));
        assert_eq!(properties[3]["linked"], true);
        assert_eq!(properties[3]["depends_on"], json!(["health"]));
        assert!(properties[3].get("default").is_none());
    }
}
