//! End-to-end tests for batching, cancellation, id allocation and export.

use std::{
    cmp::Ordering as CmpOrdering,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use rstest::rstest;
use strata_core::{
    CacheKind, Feature, ImplicitGeometry, Property, PropertyValue, Reference, SurfaceDataProperty,
    test_support,
};
use strata_data::{
    ExportOptions, FeatureReader, HandleError, ImportError, ImportHandle, ImportStatistics,
    Importer, JsonLinesReader, SessionState, Table, TransactionMode, export_features,
};

mod support;

use support::{
    CountingImporter, FailingImporter, StagingCounter, TestDatabase, import_all, options,
};

fn buildings(count: usize) -> impl Iterator<Item = Feature> {
    (0..count).map(|index| test_support::building(&format!("BLDG_{index}")))
}

#[rstest]
#[case(4, 4, 1)]
#[case(4, 5, 2)]
#[case(4, 8, 2)]
fn batches_flush_at_the_batch_size(
    #[case] batch_size: usize,
    #[case] features: usize,
    #[case] expected_batches: usize,
) {
    let database = TestDatabase::new();
    let batches = Arc::new(AtomicUsize::new(0));
    let mut importer = Importer::default()
        .with_table_importer(Table::Feature, CountingImporter::factory(&batches));
    importer
        .start_session(&database.adapter, options(1).with_batch_size(batch_size))
        .expect("start session");
    for feature in buildings(features) {
        importer.import_feature(feature).expect("queue feature");
    }

    let summary = importer.commit_session().expect("commit");

    assert_eq!(summary.imported, features as u64);
    assert_eq!(CountingImporter::count(&batches), expected_batches);
    assert_eq!(database.count("feature"), features as i64);
}

#[rstest]
fn explicit_mode_writes_once_at_commit() {
    let database = TestDatabase::new();
    let statistics = Arc::new(ImportStatistics::new());
    let summary = {
        let mut importer = Importer::new(statistics.clone());
        importer
            .start_session(
                &database.adapter,
                options(1)
                    .with_batch_size(2)
                    .with_mode(TransactionMode::Explicit),
            )
            .expect("start session");
        for feature in buildings(5) {
            importer.import_feature(feature).expect("queue feature");
        }
        importer.commit_session().expect("commit")
    };

    let report = statistics.report();
    assert_eq!(summary.imported, 5);
    assert_eq!(report.batches_committed, 1);
    assert_eq!(report.committed(), 5);
}

/// Resolved handles as `(imported, failed, cancelled)`.
fn tally(handles: Vec<ImportHandle>) -> (usize, usize, usize) {
    let (mut imported, mut failed, mut cancelled) = (0, 0, 0);
    for handle in handles {
        match handle.wait() {
            Ok(_) => imported += 1,
            Err(HandleError::Failed(_)) => failed += 1,
            Err(HandleError::Cancelled) => cancelled += 1,
            Err(HandleError::Disconnected) => panic!("worker vanished"),
        }
    }
    (imported, failed, cancelled)
}

#[rstest]
fn failures_cancel_queued_work() {
    let database = TestDatabase::new();
    let staged = Arc::new(AtomicUsize::new(0));
    let mut importer = Importer::default()
        .with_table_importer(Table::Feature, StagingCounter::factory(&staged));
    importer
        .start_session(&database.adapter, options(8).with_fail_fast(true))
        .expect("start session");

    let handles: Vec<_> = (0..10_000)
        .map(|index| {
            let feature = if index % 100 == 99 {
                Feature::new("")
            } else {
                test_support::building(&format!("BLDG_{index}"))
            };
            importer.import_feature(feature).expect("queue feature")
        })
        .collect();
    let result = importer.commit_session();

    assert!(matches!(result, Err(ImportError::Aborted { .. })));
    assert_eq!(importer.state(), SessionState::Aborted);
    let (imported, failed, cancelled) = tally(handles);
    assert_eq!(imported + failed + cancelled, 10_000);
    assert!(failed >= 1);
    assert!(cancelled > 0, "queued features should have been cancelled");
    assert_eq!(
        staged.load(Ordering::SeqCst),
        imported,
        "cancelled features must not stage rows"
    );
}

#[rstest]
fn nothing_is_processed_after_the_first_failure() {
    let database = TestDatabase::new();
    let staged = Arc::new(AtomicUsize::new(0));
    let mut importer = Importer::default()
        .with_table_importer(Table::Feature, StagingCounter::factory(&staged));
    importer
        .start_session(&database.adapter, options(1).with_fail_fast(true))
        .expect("start session");

    let handles: Vec<_> = (0..2_000)
        .map(|index| {
            let feature = if index == 500 {
                Feature::new("")
            } else {
                test_support::building(&format!("BLDG_{index}"))
            };
            importer.import_feature(feature).expect("queue feature")
        })
        .collect();
    let result = importer.commit_session();

    assert!(matches!(result, Err(ImportError::Aborted { .. })));
    for (index, handle) in handles.into_iter().enumerate() {
        match (index.cmp(&500), handle.wait()) {
            (CmpOrdering::Less, Ok(_))
            | (CmpOrdering::Equal, Err(HandleError::Failed(_)))
            | (CmpOrdering::Greater, Err(HandleError::Cancelled)) => {}
            (_, outcome) => panic!("unexpected outcome for feature {index}: {outcome:?}"),
        }
    }
    assert_eq!(staged.load(Ordering::SeqCst), 500);
}

#[rstest]
fn batch_failures_abort_the_session() {
    let database = TestDatabase::new();
    let statistics = Arc::new(ImportStatistics::new());
    let mut importer = Importer::new(statistics.clone())
        .with_table_importer(Table::Feature, FailingImporter::factory(2));
    importer
        .start_session(&database.adapter, options(1).with_batch_size(2))
        .expect("start session");
    let handles: Vec<_> = buildings(20)
        .map(|feature| importer.import_feature(feature).expect("queue feature"))
        .collect();

    let result = importer.commit_session();

    match result {
        Err(ImportError::Aborted { source }) => assert!(
            matches!(&*source, ImportError::Table { table: Table::Feature, .. }),
            "unexpected cause {source:?}"
        ),
        other => panic!("expected an aborted session, got {other:?}"),
    }
    assert_eq!(importer.state(), SessionState::Aborted);
    assert_eq!(tally(handles), (3, 1, 16));
    assert_eq!(database.count("feature"), 2, "the first batch stays committed");

    let report = statistics.report();
    assert_eq!((report.batches_committed, report.batches_failed), (1, 1));
    let counts = report.by_type.get("Building").copied().unwrap_or_default();
    assert_eq!((counts.committed, counts.failed), (2, 2));
}

#[rstest]
fn aborted_sessions_never_reuse_ids() {
    let database = TestDatabase::new();
    let mut first = Importer::default();
    first
        .start_session(
            &database.adapter,
            options(1)
                .with_sequence_block_size(10)
                .with_mode(TransactionMode::DryRun),
        )
        .expect("start first session");
    let discarded = first
        .import_feature(test_support::building("BLDG_1"))
        .expect("queue feature")
        .wait()
        .expect("staged");
    first.abort_session().expect("abort");

    let mut second = Importer::default();
    second
        .start_session(&database.adapter, options(1).with_sequence_block_size(10))
        .expect("start second session");
    let kept = second
        .import_feature(test_support::building("BLDG_1"))
        .expect("queue feature")
        .wait()
        .expect("imported");
    second.commit_session().expect("commit");

    assert_eq!(discarded.id, 1);
    assert_eq!(kept.id, 11);
}

#[rstest]
fn texture_images_are_shared_by_uri() {
    let database = TestDatabase::new();
    let features = (0..6).map(|index| {
        test_support::building(&format!("BLDG_{index}")).with_appearance(
            test_support::textured_appearance(&format!("TEX_{index}"), "textures/facade.png"),
        )
    });

    let summary = import_all(&database, options(3).with_batch_size(1), features).expect("commit");

    assert!(summary.dangling_references.is_empty());
    assert_eq!(database.count("tex_image"), 1);
    let unlinked: i64 = database
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM surface_data s LEFT JOIN tex_image t ON t.id = s.tex_image_id \
             WHERE t.image_uri IS NOT s.image_uri",
            [],
            |row| row.get(0),
        )
        .expect("count unlinked textures");
    assert_eq!(unlinked, 0);
}

#[rstest]
fn referenced_surface_data_is_linked() {
    let database = TestDatabase::new();
    let owner = test_support::building("BLDG_1")
        .with_appearance(test_support::textured_appearance("TEX_1", "a.png"));
    let mut borrower = test_support::building("BLDG_2");
    borrower.appearances.push(strata_core::Appearance {
        surface_data: vec![SurfaceDataProperty::Reference("TEX_1".to_owned())],
        ..strata_core::Appearance::default()
    });

    import_all(&database, options(2), [borrower, owner]).expect("commit");

    let unresolved: i64 = database
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM appear_to_surface_data WHERE surface_data_id IS NULL",
            [],
            |row| row.get(0),
        )
        .expect("count links");
    assert_eq!(unresolved, 0);
}

fn city() -> Vec<Feature> {
    let mut town_hall = test_support::building_with_part("BLDG_1", "PART_1")
        .with_property(Property::new(
            "address",
            PropertyValue::Address(test_support::address("ADDR_1")),
        ))
        .with_property(Property::new(
            "lod1ImplicitRepresentation",
            PropertyValue::ImplicitGeometry(ImplicitGeometry {
                object_id: Some("TREE_PROTO".to_owned()),
                mime_type: Some("model/gltf".to_owned()),
                geometry: None,
            }),
        ))
        .with_appearance(test_support::textured_appearance("TEX_1", "hall.png"));
    town_hall
        .attributes
        .insert("name".to_owned(), "Rotes Rathaus".to_owned());
    let neighbour = test_support::building_referencing("BLDG_2", "BLDG_1").with_property(
        Property::new(
            "sharedTree",
            PropertyValue::Reference(Reference::new(CacheKind::ImplicitGeometry, "TREE_PROTO")),
        ),
    );
    vec![town_hall, neighbour, Feature::new("Road").with_object_id("ROAD_1")]
}

fn export_sorted(database: &TestDatabase) -> Vec<Feature> {
    let mut output = Vec::new();
    export_features(&database.connection(), &mut output, &ExportOptions::default())
        .expect("export");
    let mut features: Vec<Feature> = JsonLinesReader::new(output.as_slice())
        .map(|feature| feature.expect("exported feature parses"))
        .collect();
    features.sort_by(|a, b| a.object_id.cmp(&b.object_id));
    features
}

#[rstest]
fn export_round_trips_through_a_second_import() {
    let source = TestDatabase::new();
    import_all(&source, options(2), city()).expect("import city");

    let exported = export_sorted(&source);
    assert_eq!(exported, city());

    let copy = TestDatabase::new();
    import_all(&copy, options(2), exported.clone()).expect("re-import city");
    assert_eq!(export_sorted(&copy), exported);
}

#[rstest]
fn reader_feeds_an_import_and_stops_on_cancel() {
    let database = TestDatabase::new();
    let input: String = buildings(20)
        .map(|feature| serde_json::to_string(&feature).expect("encode feature") + "\n")
        .collect();
    let mut reader = JsonLinesReader::new(input.as_bytes());
    let token = reader.cancel_token();
    let mut importer = Importer::default();
    importer
        .start_session(&database.adapter, options(2))
        .expect("start session");

    let mut read = 0;
    while let Some(feature) = reader.next_feature().expect("read feature") {
        importer.import_feature(feature).expect("queue feature");
        read += 1;
        if read == 5 {
            let token = token.clone();
            thread::spawn(move || token.cancel())
                .join()
                .expect("cancelling thread finishes");
        }
    }
    let summary = importer.commit_session().expect("commit");

    assert_eq!(read, 5);
    assert_eq!(summary.imported, 5);
}
