use insights_state::Lane;
use insights_state::StateRuntime;
use insights_state::WeaknessWeights;
use insights_test_support::RawAttempt;
use insights_test_support::insert_attempts;
use insights_test_support::insert_lookup;
use insights_test_support::provision_source;
use insights_test_support::ts;
use insights_test_support::unique_temp_dir;
use pretty_assertions::assert_eq;

const T0: i64 = 1_700_000_000_000;

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[tokio::test]
async fn two_attempts_on_one_word_aggregate_to_one_row() {
    let runtime = StateRuntime::open_in_memory().await.expect("open db");
    let spec = Lane::Spelling.spec();
    provision_source(&runtime, spec).await.expect("provision");
    insert_attempts(
        &runtime,
        spec,
        &[
            RawAttempt::new(1, 10, "cat", true, 200, ts(T0)),
            RawAttempt::new(1, 10, "cat", false, 400, ts(T0 + 1_000)),
        ],
    )
    .await
    .expect("insert attempts");

    let rows = runtime
        .aggregate_entities(spec, None, 500, &WeaknessWeights::DEFAULT)
        .await
        .expect("aggregate");

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(
        (row.user_id, row.lesson_id, row.entity_key.as_str()),
        (1, 10, "cat")
    );
    assert_eq!(row.attempts_total, 2);
    assert_eq!(row.attempts_incorrect, 1);
    assert_close(row.accuracy_rate, 0.5);
    assert_close(row.avg_response_ms, 300.0);
    assert_eq!(row.last_attempt_at, ts(T0 + 1_000));
    assert_eq!(row.last_incorrect_at, Some(ts(T0 + 1_000)));
    assert_close(row.weakness_score, 0.5 * 0.7 + 0.5 * 0.3);
}

#[tokio::test]
async fn empty_window_yields_no_rows() {
    let runtime = StateRuntime::open_in_memory().await.expect("open db");
    let spec = Lane::Arithmetic.spec();
    provision_source(&runtime, spec).await.expect("provision");
    insert_attempts(
        &runtime,
        spec,
        &[RawAttempt::new(3, 30, "17", true, 900, ts(T0))],
    )
    .await
    .expect("insert attempts");

    let rows = runtime
        .aggregate_entities(spec, Some(ts(T0)), 500, &WeaknessWeights::DEFAULT)
        .await
        .expect("aggregate");

    assert!(rows.is_empty(), "unexpected rows: {rows:?}");
}

#[tokio::test]
async fn touched_keys_are_recomputed_from_full_history() {
    let runtime = StateRuntime::open_in_memory().await.expect("open db");
    let spec = Lane::Spelling.spec();
    provision_source(&runtime, spec).await.expect("provision");
    insert_attempts(
        &runtime,
        spec,
        &[
            RawAttempt::new(1, 10, "cat", false, 100, ts(T0)),
            RawAttempt::new(1, 10, "dog", false, 100, ts(T0 + 10)),
            RawAttempt::new(1, 10, "cat", true, 300, ts(T0 + 5_000)),
        ],
    )
    .await
    .expect("insert attempts");

    let rows = runtime
        .aggregate_entities(spec, Some(ts(T0 + 1_000)), 500, &WeaknessWeights::DEFAULT)
        .await
        .expect("aggregate");

    assert_eq!(rows.len(), 1, "only cat was touched after the checkpoint");
    let cat = &rows[0];
    assert_eq!(cat.entity_key, "cat");
    assert_eq!(cat.attempts_total, 2);
    assert_eq!(cat.attempts_incorrect, 1);
    assert_close(cat.avg_response_ms, 200.0);
    assert_eq!(cat.last_incorrect_at, Some(ts(T0)));
}

#[tokio::test]
async fn results_are_capped_and_most_recent_first() {
    let runtime = StateRuntime::open_in_memory().await.expect("open db");
    let spec = Lane::Arithmetic.spec();
    provision_source(&runtime, spec).await.expect("provision");
    let attempts: Vec<RawAttempt> = (0..5)
        .map(|idx| RawAttempt::new(2, 20, &format!("{}", 100 + idx), true, 500, ts(T0 + idx)))
        .collect();
    insert_attempts(&runtime, spec, &attempts)
        .await
        .expect("insert attempts");

    let rows = runtime
        .aggregate_entities(spec, None, 3, &WeaknessWeights::DEFAULT)
        .await
        .expect("aggregate");

    let keys: Vec<&str> = rows.iter().map(|row| row.entity_key.as_str()).collect();
    assert_eq!(keys, vec!["104", "103", "102"]);
    assert_eq!(rows[0].last_incorrect_at, None);
}

#[tokio::test]
async fn vocabulary_scope_excludes_other_courses_archived_rows_and_unknown_words() {
    let home = unique_temp_dir();
    let runtime = StateRuntime::init(home.join("insights.sqlite"))
        .await
        .expect("initialize runtime");
    let spec = Lane::Vocabulary.spec();
    provision_source(&runtime, spec).await.expect("provision");
    insert_lookup(&runtime, spec, &[("happy", 501), ("Brave", 502)])
        .await
        .expect("insert lookup");
    insert_attempts(
        &runtime,
        spec,
        &[
            RawAttempt::new(1, 10, "Happy ", true, 200, ts(T0)),
            RawAttempt::new(1, 10, "brave", false, 800, ts(T0 + 1)),
            RawAttempt::new(1, 10, "happy", false, 200, ts(T0 + 2)).subject(1),
            RawAttempt::new(1, 10, "happy", false, 200, ts(T0 + 3)).archived(),
            RawAttempt::new(1, 10, "glad", false, 200, ts(T0 + 4)),
            RawAttempt::new(1, 10, "cheerful", true, 200, ts(T0 + 5)).subject(9),
        ],
    )
    .await
    .expect("insert attempts");

    let rows = runtime
        .aggregate_entities(spec, None, 500, &WeaknessWeights::DEFAULT)
        .await
        .expect("aggregate");
    let keys: Vec<(&str, i64, i64)> = rows
        .iter()
        .map(|row| {
            (
                row.entity_key.as_str(),
                row.attempts_total,
                row.attempts_incorrect,
            )
        })
        .collect();
    assert_eq!(keys, vec![("502", 1, 1), ("501", 1, 0)]);

    let unresolved = runtime
        .count_unresolved_labels(spec, None)
        .await
        .expect("count unresolved");
    assert_eq!(unresolved, 2);

    let _ = tokio::fs::remove_dir_all(home).await;
}

#[tokio::test]
async fn lanes_without_lookup_report_no_unresolved_labels() {
    let runtime = StateRuntime::open_in_memory().await.expect("open db");

    let unresolved = runtime
        .count_unresolved_labels(Lane::Spelling.spec(), None)
        .await
        .expect("count unresolved");

    assert_eq!(unresolved, 0);
}

#[tokio::test]
async fn lookup_labels_equal_after_normalizing_count_each_attempt_once() {
    let runtime = StateRuntime::open_in_memory().await.expect("open db");
    let spec = Lane::Vocabulary.spec();
    provision_source(&runtime, spec).await.expect("provision");
    insert_lookup(
        &runtime,
        spec,
        &[("happy", 501), ("Happy", 501), (" HAPPY ", 507), ("brave", 502)],
    )
    .await
    .expect("insert lookup");
    insert_attempts(
        &runtime,
        spec,
        &[
            RawAttempt::new(1, 10, "happy", true, 200, ts(T0)),
            RawAttempt::new(1, 10, "Happy", false, 400, ts(T0 + 1)),
        ],
    )
    .await
    .expect("insert attempts");

    let rows = runtime
        .aggregate_entities(spec, None, 500, &WeaknessWeights::DEFAULT)
        .await
        .expect("aggregate");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].entity_key, "501");
    assert_eq!(rows[0].attempts_total, 2);
    assert_eq!(rows[0].attempts_incorrect, 1);
    assert_eq!(
        runtime
            .count_unresolved_labels(spec, None)
            .await
            .expect("count unresolved"),
        0
    );
}

#[tokio::test]
async fn entity_labels_map_looked_up_keys_back_to_words() {
    let runtime = StateRuntime::open_in_memory().await.expect("open db");
    let vocabulary = Lane::Vocabulary.spec();
    provision_source(&runtime, vocabulary)
        .await
        .expect("provision");
    insert_lookup(&runtime, vocabulary, &[(" brave", 502), ("happy", 501)])
        .await
        .expect("insert lookup");

    let labels = runtime
        .entity_labels(
            vocabulary,
            &["501".to_string(), "502".to_string(), "999".to_string()],
        )
        .await
        .expect("resolve labels");
    let mut labels: Vec<(String, String)> = labels.into_iter().collect();
    labels.sort();
    assert_eq!(
        labels,
        vec![
            ("501".to_string(), "happy".to_string()),
            ("502".to_string(), "brave".to_string()),
        ]
    );

    let spelling = runtime
        .entity_labels(Lane::Spelling.spec(), &["cat".to_string()])
        .await
        .expect("lane without lookup");
    assert!(spelling.is_empty());
}
