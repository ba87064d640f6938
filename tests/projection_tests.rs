mod common;

use chrono::{Duration, Utc};
use common::{ACTOR, create_person, create_source, fixture_registry, naming_payload, store};
use docgraph::{
    DeleteOutcome, EngineError, InlinePayload, LifecycleManager, ListResult, ProjectionBuilder,
    Reconciler, RelationRef, WritePayload,
};
use serde_json::json;

#[test]
fn test_project_one_round_trips_created_properties_and_relations() {
    let registry = fixture_registry();
    let store = store();
    let reconciler = Reconciler::new(&registry, &store);
    let projector = ProjectionBuilder::new(&registry, &store);

    let source = create_source(&registry, &store, "Parish register");
    let person = create_person(&registry, &store, "Ada");
    let created = reconciler
        .create(
            "Naming",
            &naming_payload("Ada of Lovelace", &source, &person)
                .with_property("first_name", json!("Ada"))
                .with_property("last_name", json!("Lovelace")),
            ACTOR,
        )
        .expect("create naming");

    let doc = projector
        .project_one("Naming", &created.uid)
        .expect("project");
    assert_eq!(doc.real_type, "Naming");
    assert_eq!(doc.label, "Ada of Lovelace");
    assert_eq!(doc.properties["first_name"], json!("Ada"));
    assert_eq!(doc.created_by, ACTOR);

    let sources = &doc.relations["has_source"];
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].uid, source);
    assert_eq!(sources[0].label, "Parish register");

    let about = &doc.relations["is_about_person"];
    assert_eq!(about.len(), 1);
    assert_eq!(about[0].uid, person);
    assert!(doc.merged_items.is_none());
}

#[test]
fn test_incoming_edges_group_under_reverse_name() {
    let registry = fixture_registry();
    let store = store();
    let reconciler = Reconciler::new(&registry, &store);
    let projector = ProjectionBuilder::new(&registry, &store);

    let source = create_source(&registry, &store, "Charter");
    let person = create_person(&registry, &store, "Bede");
    let naming = reconciler
        .create("Naming", &naming_payload("Bede naming", &source, &person), ACTOR)
        .expect("create");

    let person_doc = projector.project_one("Person", &person).expect("project");
    let factoids = &person_doc.relations["HAS_FACTOID_ABOUT"];
    assert_eq!(factoids.len(), 1);
    assert_eq!(factoids[0].uid, naming.uid);

    let source_doc = projector.project_one("Source", &source).expect("project");
    assert_eq!(source_doc.relations["IS_SOURCE_OF"][0].uid, naming.uid);
}

#[test]
fn test_relation_properties_surface_on_targets() {
    let registry = fixture_registry();
    let store = store();
    let reconciler = Reconciler::new(&registry, &store);
    let projector = ProjectionBuilder::new(&registry, &store);

    let source = create_source(&registry, &store, "Annals");
    let person = create_person(&registry, &store, "Cuthbert");
    let created = reconciler
        .create(
            "Naming",
            &WritePayload::new()
                .with_label("Cuthbert naming")
                .with_relation("has_source", vec![RelationRef::to(&source)])
                .with_relation(
                    "is_about_person",
                    vec![RelationRef::to(&person).with_prop("certainty", json!("2"))],
                ),
            ACTOR,
        )
        .expect("create");

    let doc = projector.project_one("Naming", &created.uid).expect("project");
    assert_eq!(doc.relations["is_about_person"][0].rel_props["certainty"], json!("2"));
}

#[test]
fn test_inline_field_projects_as_nested_document_not_relation_array() {
    let registry = fixture_registry();
    let store = store();
    let reconciler = Reconciler::new(&registry, &store);
    let projector = ProjectionBuilder::new(&registry, &store);

    let source = create_source(&registry, &store, "Diary");
    let person = create_person(&registry, &store, "Hilda");
    let created = reconciler
        .create(
            "Activity",
            &naming_payload("Hilda's journey", &source, &person).with_inline(
                "date",
                InlinePayload::of("SingleDate").with_property("earliest", json!("0680-03-01")),
            ),
            ACTOR,
        )
        .expect("create activity");

    let doc = projector.project_one("Activity", &created.uid).expect("project");
    let date = doc.inline.get("date").expect("inline date");
    assert_eq!(date.real_type, "SingleDate");
    assert_eq!(date.properties["earliest"], json!("0680-03-01"));
    assert!(!doc.relations.contains_key("date"));
}

#[test]
fn test_project_one_not_found_for_missing_or_foreign_uid() {
    let registry = fixture_registry();
    let store = store();
    let projector = ProjectionBuilder::new(&registry, &store);

    let err = projector.project_one("Person", "ghost").expect_err("missing");
    assert!(matches!(err, EngineError::NotFound(_)));

    // A Source uid is not retrievable through the Person type.
    let source = create_source(&registry, &store, "Ledger");
    let err = projector.project_one("Person", &source).expect_err("foreign");
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[test]
fn test_merge_siblings_surface_as_merged_items_not_relations() {
    let registry = fixture_registry();
    let store = store();
    let projector = ProjectionBuilder::new(&registry, &store);
    let lifecycle = LifecycleManager::new(&registry, &store);

    let a = create_person(&registry, &store, "Alcuin");
    let b = create_person(&registry, &store, "Alchvine");
    lifecycle.merge("Person", &a, &b).expect("merge");

    let doc_a = projector.project_one("Person", &a).expect("project");
    let merged = doc_a.merged_items.expect("merged items");
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].uid, b);
    assert!(doc_a.relations.is_empty());

    let doc_b = projector.project_one("Person", &b).expect("project");
    assert_eq!(doc_b.merged_items.expect("merged")[0].uid, a);
}

#[test]
fn test_merge_group_closure_spans_chains() {
    let registry = fixture_registry();
    let store = store();
    let projector = ProjectionBuilder::new(&registry, &store);
    let lifecycle = LifecycleManager::new(&registry, &store);

    let a = create_person(&registry, &store, "A");
    let b = create_person(&registry, &store, "B");
    let c = create_person(&registry, &store, "C");
    lifecycle.merge("Person", &a, &b).expect("merge");
    lifecycle.merge("Person", &b, &c).expect("merge");

    let doc = projector.project_one("Person", &a).expect("project");
    let merged = doc.merged_items.expect("merged");
    assert_eq!(merged.len(), 2);
}

#[test]
fn test_project_list_folds_merge_groups_into_one_entry() {
    let registry = fixture_registry();
    let store = store();
    let projector = ProjectionBuilder::new(&registry, &store);
    let lifecycle = LifecycleManager::new(&registry, &store);

    let a = create_person(&registry, &store, "Aldred");
    let b = create_person(&registry, &store, "Aldret");
    let lone = create_person(&registry, &store, "Oswald");
    lifecycle.merge("Person", &a, &b).expect("merge");

    let ListResult::Entries(entries) = projector
        .project_list("Person", None, None)
        .expect("list")
    else {
        panic!("expected plain entries");
    };
    assert_eq!(entries.len(), 2);
    let group_entry = entries.iter().find(|e| e.uid == a).expect("group entry");
    assert_eq!(group_entry.merged_items.len(), 1);
    assert_eq!(group_entry.merged_items[0].uid, b);
    assert!(entries.iter().any(|e| e.uid == lone));
    assert!(!entries.iter().any(|e| e.uid == b));
}

#[test]
fn test_project_list_includes_subtype_instances_for_abstract_type() {
    let registry = fixture_registry();
    let store = store();
    let reconciler = Reconciler::new(&registry, &store);
    let projector = ProjectionBuilder::new(&registry, &store);

    let source = create_source(&registry, &store, "Roll");
    let person = create_person(&registry, &store, "Edith");
    reconciler
        .create("Naming", &naming_payload("Edith naming", &source, &person), ACTOR)
        .expect("create");

    let ListResult::Entries(entries) = projector
        .project_list("Factoid", None, None)
        .expect("list")
    else {
        panic!("expected plain entries");
    };
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].real_type, "Naming");
}

#[test]
fn test_text_filter_matches_label_and_declared_fields() {
    let registry = fixture_registry();
    let store = store();
    let reconciler = Reconciler::new(&registry, &store);
    let projector = ProjectionBuilder::new(&registry, &store);

    let source = create_source(&registry, &store, "Register");
    let person = create_person(&registry, &store, "Godwin");
    reconciler
        .create(
            "Naming",
            &naming_payload("naming one", &source, &person)
                .with_property("first_name", json!("Aelfric")),
            ACTOR,
        )
        .expect("create");
    reconciler
        .create("Naming", &naming_payload("naming two", &source, &person), ACTOR)
        .expect("create");

    // Case-insensitive match against a declared text-filter property.
    let ListResult::Entries(entries) = projector
        .project_list("Naming", Some("AELF"), None)
        .expect("filter")
    else {
        panic!("expected entries");
    };
    assert_eq!(entries.len(), 1);

    // One hop: both namings relate to Godwin, so both match his label.
    let ListResult::Entries(entries) = projector
        .project_list("Naming", Some("godwin"), None)
        .expect("filter")
    else {
        panic!("expected entries");
    };
    assert_eq!(entries.len(), 2);

    let ListResult::Entries(entries) = projector
        .project_list("Naming", Some("zzz"), None)
        .expect("filter")
    else {
        panic!("expected entries");
    };
    assert!(entries.is_empty());
}

#[test]
fn test_changed_since_returns_touched_entities_and_tombstones() {
    let registry = fixture_registry();
    let store = store();
    let projector = ProjectionBuilder::new(&registry, &store);
    let lifecycle = LifecycleManager::new(&registry, &store);

    let early = create_person(&registry, &store, "Earlier");
    let cutoff = Utc::now() + Duration::milliseconds(5);
    std::thread::sleep(std::time::Duration::from_millis(10));

    let later = create_person(&registry, &store, "Later");
    let doomed = create_person(&registry, &store, "Doomed");
    assert_eq!(
        lifecycle.delete("Person", &doomed).expect("delete"),
        DeleteOutcome::Deleted
    );

    let ListResult::Sync(delta) = projector
        .project_list("Person", None, Some(cutoff))
        .expect("sync")
    else {
        panic!("expected sync delta");
    };
    let touched: Vec<_> = delta.created_modified.iter().map(|e| e.uid.as_str()).collect();
    assert!(touched.contains(&later.as_str()));
    assert!(!touched.contains(&early.as_str()));
    assert_eq!(delta.deleted.len(), 1);
    assert_eq!(delta.deleted[0].uid, doomed);
}

#[test]
fn test_deleted_target_with_other_dependents_is_flagged() {
    let registry = fixture_registry();
    let store = store();
    let reconciler = Reconciler::new(&registry, &store);
    let projector = ProjectionBuilder::new(&registry, &store);
    let lifecycle = LifecycleManager::new(&registry, &store);

    let source = create_source(&registry, &store, "Record");
    let person = create_person(&registry, &store, "Wulfstan");
    let first = reconciler
        .create("Naming", &naming_payload("first", &source, &person), ACTOR)
        .expect("create");
    reconciler
        .create("Naming", &naming_payload("second", &source, &person), ACTOR)
        .expect("create");

    // Two factoids depend on the person, so deletion is only pending.
    assert_eq!(
        lifecycle.delete("Person", &person).expect("delete"),
        DeleteOutcome::Pending
    );

    let doc = projector.project_one("Naming", &first.uid).expect("project");
    let target = &doc.relations["is_about_person"][0];
    assert!(target.is_deleted);
    assert!(target.deleted_and_has_dependent_nodes);
}

#[test]
fn test_reference_list_is_flat() {
    let registry = fixture_registry();
    let store = store();
    let projector = ProjectionBuilder::new(&registry, &store);
    let lifecycle = LifecycleManager::new(&registry, &store);

    let a = create_person(&registry, &store, "A");
    let b = create_person(&registry, &store, "B");
    lifecycle.merge("Person", &a, &b).expect("merge");

    let summaries = projector.project_reference_list("Person").expect("refs");
    assert_eq!(summaries.len(), 2);
}
