use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};
use serde::Serialize;

use crate::errors::EngineError;

/// Scalar property kinds storable on nodes and edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PropertyKind {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Email,
}

/// Bound on a relation's target count, enforced on the declaring side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cardinality {
    ExactlyOne,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

impl Cardinality {
    pub fn floor(&self) -> usize {
        match self {
            Cardinality::ExactlyOne | Cardinality::OneOrMore => 1,
            Cardinality::ZeroOrOne | Cardinality::ZeroOrMore => 0,
        }
    }

    pub fn at_most_one(&self) -> bool {
        matches!(self, Cardinality::ExactlyOne | Cardinality::ZeroOrOne)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub kind: PropertyKind,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationDef {
    pub name: String,
    pub target_type: String,
    pub reverse_name: String,
    pub cardinality: Cardinality,
    pub props: BTreeMap<String, PropertyKind>,
    pub inline: bool,
}

/// A case-insensitive text-filter source declared on a type: one of its
/// own scalar properties, or one hop to any directly related node's label.
#[derive(Debug, Clone, PartialEq)]
pub enum TextFilter {
    Property(String),
    RelatedLabel,
}

/// Incoming edge bookkeeping: which relation of which source type lands
/// on this type under the given reverse name.
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseRelation {
    pub reverse_name: String,
    pub relation_name: String,
    pub source_type: String,
    pub inline: bool,
}

/// Declaration of one entity type, supplied to the registry builder.
/// Attributes of a parent type are inherited and overridable by name.
#[derive(Debug, Clone)]
pub struct TypeSpec {
    name: String,
    parent: Option<String>,
    is_abstract: bool,
    inline_only: bool,
    properties: BTreeMap<String, PropertyDef>,
    relations: Vec<RelationDef>,
    text_filters: Vec<TextFilter>,
}

impl TypeSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            is_abstract: false,
            inline_only: false,
            properties: BTreeMap::new(),
            relations: Vec::new(),
            text_filters: Vec::new(),
        }
    }

    pub fn parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    /// Abstract types have no storable instances of their own.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// The type exists only as an inline target and is garbage-collected
    /// when its last inline edge goes away.
    pub fn inline_only(mut self) -> Self {
        self.inline_only = true;
        self
    }

    pub fn property(mut self, name: &str, kind: PropertyKind) -> Self {
        self.properties.insert(
            name.to_string(),
            PropertyDef {
                kind,
                required: false,
            },
        );
        self
    }

    pub fn required_property(mut self, name: &str, kind: PropertyKind) -> Self {
        self.properties.insert(
            name.to_string(),
            PropertyDef {
                kind,
                required: true,
            },
        );
        self
    }

    pub fn relation(
        mut self,
        name: &str,
        target_type: &str,
        reverse_name: &str,
        cardinality: Cardinality,
    ) -> Self {
        self.relations.push(RelationDef {
            name: name.to_string(),
            target_type: target_type.to_string(),
            reverse_name: reverse_name.to_string(),
            cardinality,
            props: BTreeMap::new(),
            inline: false,
        });
        self
    }

    pub fn relation_with_props(
        mut self,
        name: &str,
        target_type: &str,
        reverse_name: &str,
        cardinality: Cardinality,
        props: &[(&str, PropertyKind)],
    ) -> Self {
        self.relations.push(RelationDef {
            name: name.to_string(),
            target_type: target_type.to_string(),
            reverse_name: reverse_name.to_string(),
            cardinality,
            props: props
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            inline: false,
        });
        self
    }

    /// Inline relations own their target; effectively zero-or-one.
    pub fn inline_relation(mut self, name: &str, target_type: &str, reverse_name: &str) -> Self {
        self.relations.push(RelationDef {
            name: name.to_string(),
            target_type: target_type.to_string(),
            reverse_name: reverse_name.to_string(),
            cardinality: Cardinality::ZeroOrOne,
            props: BTreeMap::new(),
            inline: true,
        });
        self
    }

    pub fn text_filter_property(mut self, field: &str) -> Self {
        self.text_filters.push(TextFilter::Property(field.to_string()));
        self
    }

    pub fn text_filter_related_label(mut self) -> Self {
        self.text_filters.push(TextFilter::RelatedLabel);
        self
    }
}

/// Flattened, immutable descriptor for one type: inheritance is resolved
/// once at build time into plain field tables.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub name: String,
    pub parent: Option<String>,
    pub is_abstract: bool,
    pub inline_only: bool,
    pub properties: BTreeMap<String, PropertyDef>,
    pub relations: BTreeMap<String, RelationDef>,
    pub inline_relations: BTreeMap<String, RelationDef>,
    pub reverse_relations: BTreeMap<String, ReverseRelation>,
    /// Depth-first subtype list, the type itself first.
    pub subtypes: Vec<String>,
    pub text_filters: Vec<TextFilter>,
}

impl TypeDescriptor {
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }

    pub fn inline_relation(&self, name: &str) -> Option<&RelationDef> {
        self.inline_relations.get(name)
    }

    pub fn declares_property(&self, name: &str) -> bool {
        name == "label" || self.properties.contains_key(name)
    }
}

#[derive(Default)]
pub struct TypeRegistryBuilder {
    specs: Vec<TypeSpec>,
}

/// Fields stamped by the engine itself; never declarable as properties.
const RESERVED_FIELDS: [&str; 7] = [
    "uid",
    "real_type",
    "is_deleted",
    "created_by",
    "created_when",
    "modified_by",
    "modified_when",
];

impl TypeRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, spec: TypeSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn build(self) -> Result<TypeRegistry, EngineError> {
        let mut by_name: AHashMap<String, TypeSpec> = AHashMap::new();
        let mut order: Vec<String> = Vec::new();
        for spec in self.specs {
            for field in RESERVED_FIELDS {
                if spec.properties.contains_key(field) {
                    return Err(EngineError::validation(format!(
                        "type {} declares reserved property {field}",
                        spec.name
                    )));
                }
            }
            if by_name.insert(spec.name.clone(), spec.clone()).is_some() {
                return Err(EngineError::validation(format!(
                    "duplicate type registration: {}",
                    spec.name
                )));
            }
            order.push(spec.name.clone());
        }

        // Children in registration order, for deterministic subtype lists.
        let mut children: AHashMap<String, Vec<String>> = AHashMap::new();
        for name in &order {
            let spec = &by_name[name];
            if let Some(parent) = &spec.parent {
                if !by_name.contains_key(parent) {
                    return Err(EngineError::validation(format!(
                        "type {name} has unknown parent {parent}"
                    )));
                }
                children.entry(parent.clone()).or_default().push(name.clone());
            }
        }

        let mut types: AHashMap<String, TypeDescriptor> = AHashMap::new();
        for name in &order {
            let chain = ancestor_chain(&by_name, name)?;
            let mut properties = BTreeMap::new();
            let mut relations = BTreeMap::new();
            let mut inline_relations = BTreeMap::new();
            let mut text_filters = Vec::new();
            // Root ancestor first so nearer declarations override.
            for spec_name in chain.iter().rev() {
                let spec = &by_name[spec_name.as_str()];
                for (prop_name, def) in &spec.properties {
                    properties.insert(prop_name.clone(), def.clone());
                }
                for rel in &spec.relations {
                    if rel.inline {
                        inline_relations.insert(rel.name.clone(), rel.clone());
                    } else {
                        relations.insert(rel.name.clone(), rel.clone());
                    }
                }
                for filter in &spec.text_filters {
                    if !text_filters.contains(filter) {
                        text_filters.push(filter.clone());
                    }
                }
            }
            let spec = &by_name[name];
            types.insert(
                name.clone(),
                TypeDescriptor {
                    name: name.clone(),
                    parent: spec.parent.clone(),
                    is_abstract: spec.is_abstract,
                    inline_only: spec.inline_only,
                    properties,
                    relations,
                    inline_relations,
                    reverse_relations: BTreeMap::new(),
                    subtypes: collect_subtypes(name, &children),
                    text_filters,
                },
            );
        }

        // Relation targets must resolve; then index reverse names onto the
        // target type and all of its subtypes.
        let mut reverse_entries: Vec<(String, ReverseRelation)> = Vec::new();
        for name in &order {
            let descriptor = &types[name];
            for rel in descriptor
                .relations
                .values()
                .chain(descriptor.inline_relations.values())
            {
                let target = types.get(&rel.target_type).ok_or_else(|| {
                    EngineError::validation(format!(
                        "relation {}.{} targets unknown type {}",
                        name, rel.name, rel.target_type
                    ))
                })?;
                for subtype in &target.subtypes {
                    reverse_entries.push((
                        subtype.clone(),
                        ReverseRelation {
                            reverse_name: rel.reverse_name.clone(),
                            relation_name: rel.name.clone(),
                            source_type: name.clone(),
                            inline: rel.inline,
                        },
                    ));
                }
            }
        }
        for (target, entry) in reverse_entries {
            if let Some(descriptor) = types.get_mut(&target) {
                descriptor
                    .reverse_relations
                    .insert(entry.reverse_name.clone(), entry);
            }
        }

        Ok(TypeRegistry { types })
    }
}

/// Static, process-lifetime map from type name to flattened descriptor.
#[derive(Debug)]
pub struct TypeRegistry {
    types: AHashMap<String, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::new()
    }

    pub fn resolve(&self, type_name: &str) -> Result<&TypeDescriptor, EngineError> {
        self.types
            .get(type_name)
            .ok_or_else(|| EngineError::unknown_type(type_name))
    }

    /// Depth-first subtype list, the named type itself first.
    pub fn subtypes_of(&self, type_name: &str) -> Result<Vec<String>, EngineError> {
        Ok(self.resolve(type_name)?.subtypes.clone())
    }

    /// Subtypes with storable instances (abstract members filtered out).
    pub fn concrete_subtypes_of(&self, type_name: &str) -> Result<Vec<String>, EngineError> {
        let subtypes = self.resolve(type_name)?.subtypes.clone();
        let mut concrete = Vec::new();
        for name in subtypes {
            if !self.resolve(&name)?.is_abstract {
                concrete.push(name);
            }
        }
        Ok(concrete)
    }

    pub fn is_abstract(&self, type_name: &str) -> Result<bool, EngineError> {
        Ok(self.resolve(type_name)?.is_abstract)
    }
}

fn ancestor_chain(
    by_name: &AHashMap<String, TypeSpec>,
    name: &str,
) -> Result<Vec<String>, EngineError> {
    let mut chain = vec![name.to_string()];
    let mut seen: AHashSet<String> = AHashSet::new();
    seen.insert(name.to_string());
    let mut current = name.to_string();
    while let Some(parent) = by_name[current.as_str()].parent.clone() {
        if !seen.insert(parent.clone()) {
            return Err(EngineError::validation(format!(
                "inheritance cycle through type {parent}"
            )));
        }
        chain.push(parent.clone());
        current = parent;
    }
    Ok(chain)
}

fn collect_subtypes(name: &str, children: &AHashMap<String, Vec<String>>) -> Vec<String> {
    let mut out = vec![name.to_string()];
    if let Some(kids) = children.get(name) {
        for kid in kids {
            out.extend(collect_subtypes(kid, children));
        }
    }
    out
}
