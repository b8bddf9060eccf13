mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, seed_class, spawn_sidecar, term_key};

#[test]
fn ca_set_moves_draft_locked_approved() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_class(&mut stdin, &mut reader);
    let key = json!({
        "classId": seeded.class_id,
        "term": "First Term",
        "session": "2024/2025",
        "resultType": "CA"
    });

    let created = request_ok(&mut stdin, &mut reader, "1", "resultSets.create", json!({ "key": key }));
    assert_eq!(created["resultSet"]["status"], "draft");
    assert_eq!(created["resultSet"]["resultType"], "CA");

    let locked = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workflow.submit",
        json!({ "key": key, "actor": "teacher-1" }),
    );
    assert_eq!(locked["resultSet"]["status"], "locked");
    assert_eq!(locked["resultSet"]["submittedBy"], "teacher-1");

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workflow.approve",
        json!({ "key": key, "actor": "principal" }),
    );
    assert_eq!(approved["resultSet"]["status"], "approved");
    assert_eq!(approved["resultSet"]["reviewedBy"], "principal");
}

#[test]
fn reject_returns_to_draft_and_reopens_entry() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_class(&mut stdin, &mut reader);
    let key = term_key(&seeded.class_id);
    let s1 = seeded.students[0].clone();

    let _ = request_ok(&mut stdin, &mut reader, "1", "resultSets.begin", json!({ "key": key }));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workflow.submit",
        json!({ "key": key, "actor": "teacher-1" }),
    );

    // Locked sets refuse score edits.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "scores.upsert",
        json!({ "key": key, "studentId": s1, "subjectName": "Maths",
                "components": { "examScore": 40 } }),
    );
    assert_eq!(e["code"], "invalid_state_transition");
    assert_eq!(e["details"]["attempted"], "edit");
    assert_eq!(e["details"]["current"], "locked");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "workflow.reject",
        json!({ "key": key, "actor": "principal", "reason": "  " }),
    );
    assert_eq!(e["code"], "validation_failed");

    let back = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workflow.reject",
        json!({ "key": key, "actor": "principal", "reason": "Maths missing" }),
    );
    assert_eq!(back["resultSet"]["status"], "draft");
    assert_eq!(back["resultSet"]["rejectionReason"], "Maths missing");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scores.upsert",
        json!({ "key": key, "studentId": s1, "subjectName": "Maths",
                "components": { "examScore": 40 } }),
    );
}

#[test]
fn approve_on_draft_is_rejected_and_status_kept() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_class(&mut stdin, &mut reader);
    let key = term_key(&seeded.class_id);
    let _ = request_ok(&mut stdin, &mut reader, "1", "resultSets.create", json!({ "key": key }));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "workflow.approve",
        json!({ "key": key, "actor": "principal" }),
    );
    assert_eq!(e["code"], "invalid_state_transition");
    assert_eq!(e["details"]["attempted"], "approve");
    assert_eq!(e["details"]["current"], "draft");

    let got = request_ok(&mut stdin, &mut reader, "3", "resultSets.get", json!({ "key": key }));
    assert_eq!(got["resultSet"]["status"], "draft");
}

#[test]
fn duplicate_create_is_integrity_error_and_begin_reuses() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_class(&mut stdin, &mut reader);
    let key = term_key(&seeded.class_id);

    let first = request_ok(&mut stdin, &mut reader, "1", "resultSets.create", json!({ "key": key }));
    let e = request_err(&mut stdin, &mut reader, "2", "resultSets.create", json!({ "key": key }));
    assert_eq!(e["code"], "data_integrity");
    let again = request_ok(&mut stdin, &mut reader, "3", "resultSets.begin", json!({ "key": key }));
    assert_eq!(again["resultSet"], first["resultSet"]);

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "workflow.submit",
        json!({ "key": { "classId": seeded.class_id, "term": "Third Term",
                         "session": "2024/2025", "resultType": "Term" },
                "actor": "t" }),
    );
    assert_eq!(e["code"], "not_found");
}

#[test]
fn changes_report_only_newer_revisions() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_class(&mut stdin, &mut reader);
    let key = term_key(&seeded.class_id);

    let created = request_ok(&mut stdin, &mut reader, "1", "resultSets.create", json!({ "key": key }));
    let rev = created["resultSet"]["revision"].as_i64().expect("revision");

    let none = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "resultSets.changes",
        json!({ "sinceRevision": rev }),
    );
    assert_eq!(none["resultSets"], json!([]));
    assert_eq!(none["revision"], rev);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workflow.submit",
        json!({ "key": key, "actor": "t" }),
    );
    let changed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "resultSets.changes",
        json!({ "sinceRevision": rev }),
    );
    let sets = changed["resultSets"].as_array().expect("array");
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0]["status"], "locked");
    assert!(changed["revision"].as_i64().expect("rev") > rev);

    let locked = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "resultSets.list",
        json!({ "status": "locked" }),
    );
    assert_eq!(locked["resultSets"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn approved_cohort_is_protected_from_roster_edits() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_class(&mut stdin, &mut reader);
    let key = term_key(&seeded.class_id);
    let (s1, s2) = (seeded.students[0].clone(), seeded.students[1].clone());

    let _ = request_ok(&mut stdin, &mut reader, "1", "resultSets.begin", json!({ "key": key }));
    for (i, (student, exam)) in [(&s1, 60), (&s2, 30)].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("score-{}", i),
            "scores.upsert",
            json!({ "key": key, "studentId": student, "subjectName": "Maths",
                    "components": { "examScore": exam } }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workflow.submit",
        json!({ "key": key, "actor": "teacher-1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workflow.approve",
        json!({ "key": key, "actor": "principal" }),
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "students.delete",
        json!({ "classId": seeded.class_id, "studentId": s1 }),
    );
    assert_eq!(e["code"], "invalid_state_transition");
    assert_eq!(e["details"]["attempted"], "edit");
    assert_eq!(e["details"]["current"], "approved");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "classes.delete",
        json!({ "classId": seeded.class_id }),
    );
    assert_eq!(e["code"], "invalid_state_transition");

    // Roster changes after approval only affect sets still in draft.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({ "classId": seeded.class_id, "studentId": s1, "patch": { "active": false } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.update",
        json!({ "classId": seeded.class_id, "studentId": s2, "patch": { "sortOrder": 0 } }),
    );
    let late = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.create",
        json!({ "classId": seeded.class_id, "lastName": "Adamu", "firstName": "Zainab" }),
    );

    let published = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "results.approved",
        json!({ "key": key }),
    );
    let results = published["results"].as_array().expect("results");
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["studentId"], s1.as_str());
    assert_eq!(results[1]["studentId"], s2.as_str());
    assert_eq!(results[1]["overallPosition"], 2);
    assert_eq!(published["failures"], json!([]));

    // A student outside every frozen set can still be removed.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.delete",
        json!({ "classId": seeded.class_id, "studentId": late["studentId"] }),
    );
}
