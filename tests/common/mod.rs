#![allow(dead_code)]

use docgraph::{
    Cardinality, GraphStore, PropertyKind, Reconciler, RelationRef, TypeRegistry, TypeSpec,
    WritePayload, store::MERGE_EDGE_NAME,
};

pub const ACTOR: &str = "tester";

/// Research-domain fixture: people and sources connected through
/// factoids, with inline dating sub-entities.
pub fn fixture_registry() -> TypeRegistry {
    TypeRegistry::builder()
        .register(TypeSpec::new("Entity").abstract_type())
        .register(TypeSpec::new("Person").parent("Entity"))
        .register(
            TypeSpec::new("Organisation")
                .parent("Entity")
                .relation("has_member", "Person", "MEMBER_OF", Cardinality::ZeroOrMore),
        )
        .register(TypeSpec::new("Source").property("citation", PropertyKind::String))
        .register(
            TypeSpec::new("Factoid")
                .abstract_type()
                .property("text", PropertyKind::String)
                .relation("has_source", "Source", "IS_SOURCE_OF", Cardinality::ExactlyOne)
                .relation_with_props(
                    "is_about_person",
                    "Person",
                    "HAS_FACTOID_ABOUT",
                    Cardinality::OneOrMore,
                    &[("certainty", PropertyKind::String)],
                ),
        )
        .register(
            TypeSpec::new("Naming")
                .parent("Factoid")
                .property("title", PropertyKind::String)
                .property("first_name", PropertyKind::String)
                .property("last_name", PropertyKind::String)
                .text_filter_property("first_name")
                .text_filter_property("last_name")
                .text_filter_related_label(),
        )
        .register(
            TypeSpec::new("Activity")
                .parent("Factoid")
                .inline_relation("date", "DateBase", "DATE_OF")
                .inline_relation("venue", "Entity", "VENUE_OF"),
        )
        .register(TypeSpec::new("DateBase").abstract_type())
        .register(
            TypeSpec::new("SingleDate")
                .parent("DateBase")
                .inline_only()
                .property("earliest", PropertyKind::Date),
        )
        .register(
            TypeSpec::new("DateRange")
                .parent("DateBase")
                .inline_only()
                .property("start", PropertyKind::Date)
                .property("end", PropertyKind::Date),
        )
        .build()
        .expect("fixture registry")
}

pub fn store() -> GraphStore {
    GraphStore::open_in_memory().expect("in-memory store")
}

pub fn create_person(registry: &TypeRegistry, store: &GraphStore, label: &str) -> String {
    Reconciler::new(registry, store)
        .create("Person", &WritePayload::new().with_label(label), ACTOR)
        .expect("create person")
        .uid
}

pub fn create_source(registry: &TypeRegistry, store: &GraphStore, label: &str) -> String {
    Reconciler::new(registry, store)
        .create("Source", &WritePayload::new().with_label(label), ACTOR)
        .expect("create source")
        .uid
}

/// A Naming factoid payload satisfying both inherited relation floors.
pub fn naming_payload(label: &str, source_uid: &str, person_uid: &str) -> WritePayload {
    WritePayload::new()
        .with_label(label)
        .with_relation("has_source", vec![RelationRef::to(source_uid)])
        .with_relation("is_about_person", vec![RelationRef::to(person_uid)])
}

pub fn link_merge(store: &GraphStore, a: &str, b: &str) {
    store
        .insert_edge(
            a,
            b,
            MERGE_EDGE_NAME,
            MERGE_EDGE_NAME,
            false,
            &serde_json::Value::Object(serde_json::Map::new()),
        )
        .expect("merge edge");
}
