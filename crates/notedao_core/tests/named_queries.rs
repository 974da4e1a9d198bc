use notedao_core::model::note::{
    NOTE_COUNT, NOTE_COUNT_BY_TYPE, NOTE_DELETE_BY_TYPE, NOTE_FIND_ALL, NOTE_FIND_BY_TYPE,
};
use notedao_core::{
    BindingFault, FlushMode, FlushPolicy, Note, PageWindow, ParameterSet, RepoError, Repository,
    Session, SortSpec, NOTE_SCHEMA,
};

fn seeded(session: &Session) -> Repository<'_, Note> {
    let notes = Repository::<Note>::try_new(session).unwrap();
    notes
        .save_list(vec![
            Note::new("general", "bravo"),
            Note::new("todo", "alpha"),
            Note::new("general", "charlie"),
        ])
        .unwrap();
    notes
}

fn by_type(kind: &str) -> ParameterSet {
    ParameterSet::new().with("type", kind.to_string())
}

fn contents(notes: &[Note]) -> Vec<&str> {
    notes
        .iter()
        .map(|note| note.content.as_deref().unwrap())
        .collect()
}

#[test]
fn find_all_and_count_agree() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    assert_eq!(notes.find_with_named_query(NOTE_FIND_ALL).unwrap().len(), 3);
    assert_eq!(notes.count_total_record(NOTE_COUNT).unwrap(), 3);
}

#[test]
fn parameters_bind_by_name() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    let general = notes
        .find_with_named_query_params(NOTE_FIND_BY_TYPE, &by_type("general"))
        .unwrap();
    assert_eq!(general.len(), 2);
    assert!(general
        .iter()
        .all(|note| note.kind.as_deref() == Some("general")));
    assert_eq!(
        notes
            .count_total_record_params(NOTE_COUNT_BY_TYPE, &by_type("todo"))
            .unwrap(),
        1
    );
}

#[test]
fn flat_limit_caps_results_and_zero_means_all() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    assert_eq!(
        notes
            .find_with_named_query_limit(NOTE_FIND_ALL, 2)
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        notes
            .find_with_named_query_limit(NOTE_FIND_ALL, 0)
            .unwrap()
            .len(),
        3
    );
    assert_eq!(
        notes
            .find_with_named_query_params_limit(NOTE_FIND_BY_TYPE, &by_type("general"), 1)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn window_applies_only_when_end_exceeds_start() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    let window = |start, end| {
        notes
            .find_with_named_query_window(NOTE_FIND_ALL, PageWindow::new(start, end))
            .unwrap()
            .len()
    };
    assert_eq!(window(1, 3), 2);
    assert_eq!(window(2, 10), 1);
    assert_eq!(window(2, 2), 3);
    assert_eq!(window(3, 1), 3);

    let page = notes
        .find_with_named_query_params_window(
            NOTE_FIND_BY_TYPE,
            &by_type("general"),
            PageWindow::new(1, 5),
        )
        .unwrap();
    assert_eq!(page.len(), 1);
}

#[test]
fn sorted_window_orders_before_paging() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    let page = notes
        .find_with_named_query_sorted(
            NOTE_FIND_ALL,
            &ParameterSet::new(),
            PageWindow::new(0, 2),
            Some(&SortSpec::descending("content")),
        )
        .unwrap();
    assert_eq!(contents(&page), ["charlie", "bravo"]);

    let ascending = SortSpec::parse("content", "ASC").unwrap();
    let all = notes
        .find_with_named_query_sorted(
            NOTE_FIND_ALL,
            &ParameterSet::new(),
            PageWindow::UNBOUNDED,
            ascending.as_ref(),
        )
        .unwrap();
    assert_eq!(contents(&all), ["alpha", "bravo", "charlie"]);
}

#[test]
fn blank_sort_inputs_leave_query_unsorted() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    let spec = SortSpec::parse("  ", "desc").unwrap();
    assert!(spec.is_none());
    let all = notes
        .find_with_named_query_sorted(
            NOTE_FIND_ALL,
            &ParameterSet::new(),
            PageWindow::UNBOUNDED,
            spec.as_ref(),
        )
        .unwrap();
    assert_eq!(all.len(), 3);
}

#[test]
fn sort_on_unmapped_field_is_rejected_before_execution() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    let err = notes
        .find_with_named_query_sorted(
            NOTE_FIND_ALL,
            &ParameterSet::new(),
            PageWindow::UNBOUNDED,
            Some(&SortSpec::ascending("content; DROP TABLE note")),
        )
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownField { entity: "Note", .. }));
    assert_eq!(notes.count_total_record(NOTE_COUNT).unwrap(), 3);
}

#[test]
fn unregistered_name_is_query_not_found() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    let err = notes.find_with_named_query("Note.missing").unwrap_err();
    assert!(matches!(err, RepoError::QueryNotFound(name) if name == "Note.missing"));
    assert!(matches!(
        notes.count_total_record("Note.missing"),
        Err(RepoError::QueryNotFound(_))
    ));
}

#[test]
fn extra_parameter_is_a_binding_error() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    let params = by_type("general").with("author", "ann".to_string());
    let err = notes
        .find_with_named_query_params(NOTE_FIND_BY_TYPE, &params)
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::ParameterBinding {
            ref parameter,
            fault: BindingFault::Unknown,
            ..
        } if parameter == "author"
    ));
}

#[test]
fn missing_parameter_is_a_binding_error() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    let err = notes
        .find_with_named_query_params(NOTE_FIND_BY_TYPE, &ParameterSet::new())
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::ParameterBinding {
            fault: BindingFault::Unbound,
            ..
        }
    ));
}

#[test]
fn count_requires_exactly_one_numeric_value() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    assert!(matches!(
        notes.count_total_record(NOTE_FIND_ALL),
        Err(RepoError::ScalarResult { .. })
    ));
    assert!(matches!(
        notes.count_total_record_with_typed_query(
            "SELECT uidpk FROM note WHERE type = :type",
            &by_type("missing"),
        ),
        Err(RepoError::ScalarResult { .. })
    ));
    assert!(matches!(
        notes.count_total_record_with_typed_query(
            "SELECT content FROM note WHERE type = :type",
            &by_type("todo"),
        ),
        Err(RepoError::ScalarResult { .. })
    ));
}

#[test]
fn execute_named_query_reports_affected_rows() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    let deleted = notes
        .execute_named_query(NOTE_DELETE_BY_TYPE, &by_type("general"))
        .unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(notes.count_total_record(NOTE_COUNT).unwrap(), 1);
}

#[test]
fn execute_named_query_leaves_pending_writes_queued() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);
    notes
        .save_or_update(&mut Note::new("general", "queued"), FlushPolicy::Deferred)
        .unwrap();

    let deleted = notes
        .execute_named_query(NOTE_DELETE_BY_TYPE, &by_type("general"))
        .unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(session.pending_writes(), 1);
}

#[test]
fn typed_query_decodes_scalar_rows_with_window() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    let first_two: Vec<String> = notes
        .find_with_typed_query(
            "SELECT content FROM note ORDER BY content",
            &ParameterSet::new(),
            PageWindow::new(0, 2),
        )
        .unwrap();
    assert_eq!(first_two, ["alpha", "bravo"]);

    let ids: Vec<i64> = notes
        .find_with_typed_query(
            "SELECT uidpk FROM note WHERE type = :type",
            &by_type("todo"),
            PageWindow::UNBOUNDED,
        )
        .unwrap();
    assert_eq!(ids.len(), 1);
}

#[test]
fn native_query_maps_rows_and_rejects_placeholders() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    let todo = notes
        .find_by_native_query("SELECT * FROM note WHERE type = 'todo'")
        .unwrap();
    assert_eq!(contents(&todo), ["alpha"]);

    let err = notes
        .find_by_native_query("SELECT * FROM note WHERE type = :type")
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::ParameterBinding {
            fault: BindingFault::Unbound,
            ..
        }
    ));
}

#[test]
fn session_registered_queries_are_usable_by_name() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    session
        .register_named_query(
            "Note.containing",
            "SELECT * FROM note WHERE content LIKE :text",
        )
        .unwrap();
    let matches = notes
        .find_with_named_query_params(
            "Note.containing",
            &ParameterSet::new().with("text", notedao_core::add_sql_percent_wildcards("har")),
        )
        .unwrap();
    assert_eq!(contents(&matches), ["charlie"]);
}

#[test]
fn windowed_query_may_end_in_a_line_comment() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);

    session
        .register_named_query(
            "Note.commented",
            "SELECT * FROM note WHERE type = :type -- general notes only",
        )
        .unwrap();
    let page = notes
        .find_with_named_query_sorted(
            "Note.commented",
            &by_type("general"),
            PageWindow::new(0, 1),
            Some(&SortSpec::ascending("content")),
        )
        .unwrap();
    assert_eq!(contents(&page), ["bravo"]);
}

#[test]
fn unbind_drops_declared_queries() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);
    assert!(session.is_bound("Note"));

    session.unbind(&NOTE_SCHEMA);

    assert!(!session.is_bound("Note"));
    assert!(matches!(
        notes.count_total_record(NOTE_COUNT),
        Err(RepoError::QueryNotFound(_))
    ));
}

#[test]
fn re_registering_a_name_requires_identical_text() {
    let session = Session::in_memory().unwrap();
    let _notes = seeded(&session);

    session
        .register_named_query(NOTE_FIND_ALL, "SELECT * FROM note")
        .unwrap();
    let err = session
        .register_named_query(NOTE_FIND_ALL, "SELECT 1")
        .unwrap_err();
    assert!(matches!(err, RepoError::DuplicateNamedQuery(_)));
}

#[test]
fn auto_flush_mode_makes_queued_writes_visible_to_queries() {
    let session = Session::in_memory().unwrap();
    let notes = seeded(&session);
    assert_eq!(session.flush_mode(), FlushMode::Commit);

    session.set_flush_mode(FlushMode::Auto);
    notes
        .save_or_update(&mut Note::new("todo", "delta"), FlushPolicy::Deferred)
        .unwrap();

    assert_eq!(notes.count_total_record(NOTE_COUNT).unwrap(), 4);
    assert_eq!(session.pending_writes(), 0);
}
