mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

fn labels_of(list: &serde_json::Value) -> Vec<String> {
    list.as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.get("label").and_then(|l| l.as_str()).map(String::from))
        .collect()
}

#[test]
fn tournament_open_judge_rank_and_commit() {
    let workspace = temp_dir("questd-tournament");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let scope = json!({ "year": 2025, "quarter": 3 });

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let opened = request_ok(&mut stdin, &mut reader, "2", "quests.open", scope.clone());
    let quests = opened.get("quests").and_then(|v| v.as_array()).expect("quests");
    assert_eq!(quests.len(), 10);
    assert_eq!(quests[0].get("label").and_then(|v| v.as_str()), Some("A"));
    assert!(opened.get("ranking").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(opened.get("completion").and_then(|v| v.as_f64()), Some(0.0));

    // Re-opening does not create duplicate slots.
    let reopened = request_ok(&mut stdin, &mut reader, "3", "quests.open", scope.clone());
    assert_eq!(
        reopened.get("quests").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(10)
    );

    for (i, (label, title)) in [("A", "Learn X"), ("B", "Ship Y"), ("C", "Run Z"), ("D", "Read W")]
        .iter()
        .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("title-{}", i),
            "quests.setTitle",
            json!({ "year": 2025, "quarter": 3, "label": label, "title": title }),
        );
    }

    // Empty slot E: silently ignored.
    let ignored = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "judgments.record",
        json!({ "year": 2025, "quarter": 3, "labelA": "A", "labelB": "E", "winner": "a" }),
    );
    assert_eq!(ignored.get("changed").and_then(|v| v.as_bool()), Some(false));

    // Self comparison: silently ignored.
    let ignored = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "judgments.record",
        json!({ "year": 2025, "quarter": 3, "labelA": "B", "labelB": "B", "winner": "a" }),
    );
    assert_eq!(ignored.get("changed").and_then(|v| v.as_bool()), Some(false));

    let outcomes = [
        ("C", "A", "a"), // C beats A, stored as A-C
        ("B", "C", "a"), // B beats C
        ("B", "D", "a"), // B beats D
        ("A", "D", "a"), // A beats D
        ("C", "D", "a"), // C beats D
    ];
    for (i, (a, b, winner)) in outcomes.iter().enumerate() {
        let recorded = request_ok(
            &mut stdin,
            &mut reader,
            &format!("judge-{}", i),
            "judgments.record",
            json!({ "year": 2025, "quarter": 3, "labelA": a, "labelB": b, "winner": winner }),
        );
        assert_eq!(recorded.get("changed").and_then(|v| v.as_bool()), Some(true));
    }
    let judgments = request_ok(&mut stdin, &mut reader, "6", "ranking.get", scope.clone());
    // B: 2, C: 2, A: 1, D: 0 -> ties keep label order.
    assert_eq!(
        labels_of(judgments.get("ranking").expect("ranking")),
        vec!["B", "C", "A", "D"]
    );
    assert_eq!(labels_of(judgments.get("top").expect("top")), vec!["B", "C", "A"]);
    let completion = judgments.get("completion").and_then(|v| v.as_f64()).expect("completion");
    assert!((completion - 5.0 / 45.0 * 100.0).abs() < 1e-9);

    // Overwrite instead of duplicate: reversed argument order, A now wins over C.
    let overwritten = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "judgments.record",
        json!({ "year": 2025, "quarter": 3, "labelA": "A", "labelB": "C", "winner": "a" }),
    );
    assert_eq!(overwritten.get("key").and_then(|v| v.as_str()), Some("A-C"));
    let map = overwritten.get("judgments").and_then(|v| v.as_object()).expect("map");
    assert_eq!(map.len(), 5);
    assert_eq!(map.get("A-C").and_then(|v| v.as_str()), Some("A"));

    let committed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "ranking.commit",
        scope.clone(),
    );
    // B: 2, A: 2, C: 1, D: 0
    assert_eq!(
        labels_of(committed.get("committed").expect("committed")),
        vec!["A", "B", "C"]
    );

    let state = request_ok(&mut stdin, &mut reader, "9", "quests.open", scope.clone());
    assert_eq!(state.get("isFinalized").and_then(|v| v.as_bool()), Some(true));
    let quests = state.get("quests").and_then(|v| v.as_array()).expect("quests");
    let flagged: Vec<&str> = quests
        .iter()
        .filter(|q| q.get("isCommitted").and_then(|v| v.as_bool()) == Some(true))
        .filter_map(|q| q.get("label").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(flagged, vec!["A", "B", "C"]);
    let d_score = quests
        .iter()
        .find(|q| q.get("label").and_then(|v| v.as_str()) == Some("D"))
        .and_then(|q| q.get("priorityScore"))
        .and_then(|v| v.as_f64());
    assert_eq!(d_score, Some(0.0));

    let listed = request_ok(&mut stdin, &mut reader, "10", "quests.committed", scope.clone());
    assert_eq!(
        labels_of(listed.get("quests").expect("quests")),
        vec!["A", "B", "C"]
    );

    let reset = request_ok(&mut stdin, &mut reader, "11", "judgments.reset", scope.clone());
    assert_eq!(
        reset.get("judgments").and_then(|v| v.as_object()).map(|m| m.len()),
        Some(0)
    );
    let after = request_ok(&mut stdin, &mut reader, "12", "ranking.get", scope.clone());
    assert_eq!(
        labels_of(after.get("ranking").expect("ranking")),
        vec!["A", "B", "C", "D"]
    );
    let state = request_ok(&mut stdin, &mut reader, "13", "quests.open", scope);
    assert_eq!(state.get("isFinalized").and_then(|v| v.as_bool()), Some(false));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn commit_needs_two_titled_quests_and_honours_commit_count() {
    let workspace = temp_dir("questd-commit-count");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let scope = json!({ "year": 2026, "quarter": 1 });

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "patch": { "commitCount": 1, "candidateSlots": 4 } }),
    );
    let opened = request_ok(&mut stdin, &mut reader, "3", "quests.open", scope.clone());
    assert_eq!(
        opened.get("quests").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(4)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "quests.setTitle",
        json!({ "year": 2026, "quarter": 1, "label": "A", "title": "Only goal" }),
    );
    let code = request_err(&mut stdin, &mut reader, "5", "ranking.commit", scope.clone());
    assert_eq!(code, "not_enough_quests");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "quests.setTitle",
        json!({ "year": 2026, "quarter": 1, "label": "B", "title": "Second goal" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "judgments.record",
        json!({ "year": 2026, "quarter": 1, "labelA": "A", "labelB": "B", "winner": "b" }),
    );
    let committed = request_ok(&mut stdin, &mut reader, "8", "ranking.commit", scope.clone());
    assert_eq!(
        labels_of(committed.get("committed").expect("committed")),
        vec!["B"]
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "judgments.record",
        json!({ "year": 2026, "quarter": 1, "labelA": "A", "labelB": "B", "winner": "tie" }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "quests.open",
        json!({ "year": 2026, "quarter": 5 }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "quests.setTitle",
        json!({ "year": 2026, "quarter": 1, "label": "Z", "title": "Nope" }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}
