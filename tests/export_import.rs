//! Export/import round trips across renderings and modes.

use engram::config::ServerConfig;
use engram::context::ContextRegistry;
use engram::io::{
    ExportFormat, ExportOptions, ImportMode, ImportOptions, build_export, import_document,
    parse_document, render_export,
};
use engram::models::{EntityInput, Observation, RelationInput};
use engram::storage::WriteOp;
use test_case::test_case;

fn registry() -> ContextRegistry {
    ContextRegistry::in_memory(ServerConfig::default()).unwrap()
}

/// Three entities and one relation in `personal`.
fn seed(registry: &ContextRegistry) {
    let ctx = registry.get("personal").unwrap();
    ctx.submit_blocking(WriteOp::CreateEntities(vec![
        EntityInput::new("Alice", "person").with_text("knows Bob from work"),
        EntityInput::new("Bob", "person"),
        EntityInput::new("Alpha", "project").with_text("kickoff next week"),
    ]))
    .unwrap();
    ctx.submit_blocking(WriteOp::CreateRelations(vec![RelationInput::new(
        "Alice", "Bob", "knows",
    )]))
    .unwrap();
}

#[test_case(ExportFormat::Json; "json")]
#[test_case(ExportFormat::JsonLines; "jsonl")]
#[test_case(ExportFormat::Compressed { level: 6 }; "compressed")]
fn export_clear_import_rematerializes(format: ExportFormat) {
    // Export, clear, then a merge+skip import re-materializes the graph
    let registry = registry();
    seed(&registry);

    let export = build_export(
        &registry,
        &ExportOptions::default().with_context("personal"),
    )
    .unwrap();
    let document = render_export(&export, format).unwrap();

    let ctx = registry.get("personal").unwrap();
    ctx.clear_all().unwrap();
    assert_eq!(ctx.store().entity_count().unwrap(), 0);

    let parsed = parse_document(&document).unwrap();
    let outcome = import_document(&registry, &parsed, &ImportOptions::default()).unwrap();
    assert_eq!(outcome.summary.entities_imported, 3);
    assert_eq!(outcome.summary.relations_imported, 1);
    assert_eq!(outcome.summary.entities_skipped, 0);

    assert_eq!(ctx.store().entity_count().unwrap(), 3);
    assert_eq!(ctx.store().relation_count().unwrap(), 1);
    let alice = ctx.peek_entity("Alice").unwrap().unwrap();
    assert_eq!(
        alice.observations[0],
        Observation::text("knows Bob from work")
    );

    // Idempotence: the same import again only skips
    let again = import_document(&registry, &parsed, &ImportOptions::default()).unwrap();
    assert_eq!(again.summary.entities_imported, 0);
    assert_eq!(again.summary.entities_skipped, 3);
    assert_eq!(ctx.store().entity_count().unwrap(), 3);
    assert_eq!(ctx.store().relation_count().unwrap(), 1);
}

#[test]
fn checksum_guards_the_document() {
    let registry = registry();
    seed(&registry);
    let export = build_export(
        &registry,
        &ExportOptions::default().with_context("personal"),
    )
    .unwrap();

    // Unmodified documents verify
    export.verify_checksum().unwrap();

    // Flipping a byte in the body breaks verification
    let mut tampered = export.clone();
    tampered
        .contexts
        .get_mut("personal")
        .unwrap()
        .entities
        .pop();
    assert_eq!(
        tampered.verify_checksum().unwrap_err().kind(),
        "backup_corrupted"
    );
}

#[test]
fn date_range_filter_limits_entities() {
    let registry = registry();
    seed(&registry);
    let all = build_export(
        &registry,
        &ExportOptions::default().with_context("personal"),
    )
    .unwrap();
    let cutoff = all.contexts["personal"].entities[0].updated_at;

    let none = build_export(
        &registry,
        &ExportOptions::default()
            .with_context("personal")
            .with_date_range(Some(cutoff + 1000), None),
    )
    .unwrap();
    assert_eq!(none.metadata.total_entities, 0);

    let everything = build_export(
        &registry,
        &ExportOptions::default()
            .with_context("personal")
            .with_date_range(None, Some(cutoff + 1000)),
    )
    .unwrap();
    assert_eq!(everything.metadata.total_entities, 3);
}

#[test]
fn replace_mode_drops_prior_contents() {
    let registry = registry();
    seed(&registry);
    let document = render_export(
        &build_export(
            &registry,
            &ExportOptions::default().with_context("personal"),
        )
        .unwrap(),
        ExportFormat::Json,
    )
    .unwrap();

    let dest = self::registry();
    let ctx = dest.get("personal").unwrap();
    ctx.submit_blocking(WriteOp::CreateEntities(vec![EntityInput::new(
        "Stray", "junk",
    )]))
    .unwrap();

    let parsed = parse_document(&document).unwrap();
    let options = ImportOptions {
        mode: ImportMode::Replace,
        ..ImportOptions::default()
    };
    import_document(&dest, &parsed, &options).unwrap();

    assert!(!ctx.entity_exists("Stray").unwrap());
    assert_eq!(ctx.store().entity_count().unwrap(), 3);
}

#[test]
fn import_creates_missing_contexts() {
    let source = registry();
    source
        .create_context("archive", None, Vec::new(), Vec::new(), None)
        .unwrap();
    source
        .get("archive")
        .unwrap()
        .submit_blocking(WriteOp::CreateEntities(vec![EntityInput::new(
            "Old", "record",
        )]))
        .unwrap();
    let document = render_export(
        &build_export(&source, &ExportOptions::default().with_context("archive")).unwrap(),
        ExportFormat::Json,
    )
    .unwrap();

    let dest = registry();
    assert!(dest.get("archive").is_none());
    let parsed = parse_document(&document).unwrap();
    import_document(&dest, &parsed, &ImportOptions::default()).unwrap();
    assert!(dest.get("archive").is_some());
    assert!(dest.get("archive").unwrap().entity_exists("Old").unwrap());
}

#[test]
fn merge_appends_only_new_observations() {
    let source = registry();
    seed(&source);
    // Add an extra observation in the source, export, import over a copy
    let src_ctx = source.get("personal").unwrap();
    let document_v1 = render_export(
        &build_export(&source, &ExportOptions::default().with_context("personal")).unwrap(),
        ExportFormat::Json,
    )
    .unwrap();

    src_ctx
        .submit_blocking(WriteOp::AddObservations(vec![
            engram::models::ObservationAdd {
                entity_name: "Alice".to_string(),
                contents: vec![Observation::text("new fact")],
            },
        ]))
        .unwrap();
    let document_v2 = render_export(
        &build_export(&source, &ExportOptions::default().with_context("personal")).unwrap(),
        ExportFormat::Json,
    )
    .unwrap();

    let dest = registry();
    let parsed_v1 = parse_document(&document_v1).unwrap();
    import_document(&dest, &parsed_v1, &ImportOptions::default()).unwrap();

    let parsed_v2 = parse_document(&document_v2).unwrap();
    let outcome = import_document(&dest, &parsed_v2, &ImportOptions::default()).unwrap();
    assert_eq!(outcome.summary.entities_updated, 1);
    assert_eq!(outcome.summary.observations_imported, 1);

    let alice = dest
        .get("personal")
        .unwrap()
        .peek_entity("Alice")
        .unwrap()
        .unwrap();
    let texts: Vec<_> = alice
        .observations
        .iter()
        .filter_map(Observation::as_text)
        .collect();
    assert_eq!(texts, vec!["knows Bob from work", "new fact"]);
}
