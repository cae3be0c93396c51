mod common;

use std::fs;

use common::{TestWorkspace, arg, crunch};
use predicates::str::contains;

const PEOPLE: &str = "id,name\n1,Alice\n2,Bob\n3,Carol\n";

#[test]
fn help_and_version_exit_successfully() {
    crunch()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--combineInputs"))
        .stdout(contains("--queryPerInputSubpart"));
    crunch()
        .arg("-v")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    crunch()
        .args(["-in", &arg(&input), "-out", &arg(&ws.path().join("o.csv")), "--bogus"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn default_query_copies_single_input() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    let out = ws.path().join("out").join("result.csv");
    crunch()
        .args(["-in", &arg(&input), "-out", &arg(&out)])
        .assert()
        .success();
    assert_eq!(ws.read("out/result.csv"), PEOPLE);
}

#[test]
fn concatenated_inputs_form_one_table() {
    let ws = TestWorkspace::new();
    let a = ws.write("in/a.csv", "id,name\n1,x\n2,y\n3,z\n");
    let b = ws.write("in/b.csv", "id,name\n4,v\n5,w\n");
    let out = ws.path().join("out").join("result.csv");
    crunch()
        .args([
            "-in",
            &arg(&a),
            &arg(&b),
            "-out",
            &arg(&out),
            "--combineInputs=concat",
            "--combineDirs=all",
            "-sql",
            "SELECT * FROM concat ORDER BY id",
        ])
        .assert()
        .success();

    assert_eq!(ws.read("out_concat/concat.csv"), "id,name\n1,x\n2,y\n3,z\n4,v\n5,w\n");
    assert_eq!(ws.data_lines("out/result.csv"), vec!["1,x", "2,y", "3,z", "4,v", "5,w"]);
}

#[test]
fn differing_headers_split_into_separate_tables() {
    let ws = TestWorkspace::new();
    let a = ws.write("in/a.csv", "id,name\n1,x\n2,y\n3,z\n");
    let b = ws.write("in/b.csv", "id,name,extra\n4,v,e\n5,w,f\n");
    let out = ws.path().join("out").join("result.csv");
    crunch()
        .args([
            "-in",
            &arg(&a),
            &arg(&b),
            "-out",
            &arg(&out),
            "--combineInputs",
            "-sql",
            "SELECT (SELECT COUNT(*) FROM concat_1) AS first_rows, \
             (SELECT COUNT(*) FROM concat_2) AS second_rows",
        ])
        .assert()
        .success();

    assert!(ws.path().join("out_concat/concat_1.csv").is_file());
    assert!(ws.path().join("out_concat/concat_2.csv").is_file());
    assert_eq!(ws.read("out/result.csv"), "first_rows,second_rows\n3,2\n");
}

#[test]
fn row_numbers_start_at_given_value() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    let out = ws.path().join("numbered.csv");
    crunch()
        .args([
            "-in",
            &arg(&input),
            "-out",
            &arg(&out),
            "--rowNumbers=100",
            "-sql",
            "SELECT name FROM people ORDER BY id",
        ])
        .assert()
        .success();
    assert_eq!(
        ws.read("numbered.csv"),
        "crunchCounter,name\n100,Alice\n101,Bob\n102,Carol\n"
    );
}

#[test]
fn existing_output_is_replaced() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    let out = ws.write("result.csv", "stale\nline one\nline two\nline three\nline four\n");
    crunch()
        .args([
            "-in",
            &arg(&input),
            "-out",
            &arg(&out),
            "-sql",
            "SELECT name FROM people WHERE id = 2",
        ])
        .assert()
        .success();
    assert_eq!(ws.read("result.csv"), "name\nBob\n");
}

#[test]
fn missing_column_lists_available_columns() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    crunch()
        .args([
            "-in",
            &arg(&input),
            "-out",
            &arg(&ws.path().join("o.csv")),
            "-sql",
            "SELECT amount FROM people",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("cleanup was performed"))
        .stderr(contains("referring to a column"))
        .stderr(contains(" * people"))
        .stderr(contains("    - name"))
        .stderr(contains("object not found: amount"));
}

#[test]
fn missing_table_lists_available_tables() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    crunch()
        .args([
            "-in",
            &arg(&input),
            "-out",
            &arg(&ws.path().join("o.csv")),
            "-sql",
            "SELECT * FROM persons",
        ])
        .assert()
        .failure()
        .stderr(contains("referring to a table"))
        .stderr(contains(" * people"));
}

#[test]
fn per_subpart_query_requires_placeholder() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    crunch()
        .args([
            "-in",
            &arg(&input),
            "-out",
            &arg(&ws.path().join("out")),
            "--queryPerInputSubpart",
            "-sql",
            "SELECT * FROM people",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(contains("$table"));
}

#[test]
fn per_subpart_query_writes_one_output_per_input() {
    let ws = TestWorkspace::new();
    ws.write("in/a.csv", "id,name\n1,x\n2,y\n");
    ws.write("in/b.csv", "id,name\n3,z\n");
    crunch()
        .args([
            "-in",
            &arg(&ws.path().join("in")),
            "-out",
            &arg(&ws.path().join("out")),
            "--queryPerInputSubpart",
            "-sql",
            "SELECT name FROM $table WHERE id > 1",
        ])
        .assert()
        .success();
    assert_eq!(ws.read("out/a.csv"), "name\ny\n");
    assert_eq!(ws.read("out/b.csv"), "name\nz\n");
}

#[test]
fn unimplemented_combination_is_rejected() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    crunch()
        .args([
            "-in",
            &arg(&input),
            "-out",
            &arg(&ws.path().join("o.csv")),
            "--combineInputs=intersect",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(contains("Not implemented"));
    assert!(!ws.path().join("o.csv").exists());
}

#[test]
fn duplicate_table_names_fail_before_binding() {
    let ws = TestWorkspace::new();
    let first = ws.write("x/orders.csv", "id\n1\n");
    let second = ws.write("y/orders.csv", "id\n2\n");
    crunch()
        .args([
            "-in",
            &arg(&first),
            &arg(&second),
            "-out",
            &arg(&ws.path().join("o.csv")),
            "-sql",
            "SELECT * FROM orders",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("'orders'"));
}

#[test]
fn json_entries_replace_the_csv() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    let out = ws.path().join("people_out.csv");
    crunch()
        .args(["-in", &arg(&input), "-out", &arg(&out), "--json"])
        .assert()
        .success();
    assert!(!out.exists());
    assert_eq!(
        ws.read("people_out.json"),
        "{\"id\":1,\"name\":\"Alice\"}\n{\"id\":2,\"name\":\"Bob\"}\n{\"id\":3,\"name\":\"Carol\"}\n"
    );
}

#[test]
fn json_array_keeps_csv_with_keep_work_files() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    let out = ws.path().join("people_out.csv");
    crunch()
        .args([
            "-in",
            &arg(&input),
            "-out",
            &arg(&out),
            "--json=array",
            "--keepWorkFiles",
        ])
        .assert()
        .success();
    assert!(out.is_file());
    let parsed: serde_json::Value =
        serde_json::from_str(&ws.read("people_out.json")).expect("valid json");
    assert_eq!(parsed.as_array().map(Vec::len), Some(3));
    assert_eq!(parsed[2]["name"], "Carol");
}

#[test]
fn init_sql_tables_are_queryable() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    let script = ws.write(
        "init.sql",
        "CREATE TABLE nicknames (person_id INTEGER, nick VARCHAR(20));\n\
         INSERT INTO nicknames VALUES (2, 'Bobby');\n",
    );
    crunch()
        .args([
            "-in",
            &arg(&input),
            "-out",
            &arg(&ws.path().join("o.csv")),
            "-initSql",
            &arg(&script),
            "-sql",
            "SELECT p.name, n.nick FROM people p JOIN nicknames n ON n.person_id = p.id",
        ])
        .assert()
        .success();
    assert_eq!(ws.read("o.csv"), "name,nick\nBob,Bobby\n");
}

#[test]
fn db_directory_is_left_without_tables() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);
    let db_dir = ws.path().join("db");
    crunch()
        .args([
            "-in",
            &arg(&input),
            "-out",
            &arg(&ws.path().join("o.csv")),
            "-db",
            &arg(&db_dir),
        ])
        .assert()
        .success();

    let conn = rusqlite::Connection::open(db_dir.join("cruncher.sqlite")).expect("open db");
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )
        .expect("count tables");
    assert_eq!(tables, 0);
}

#[test]
fn filters_and_line_skipping_apply_to_directories() {
    let ws = TestWorkspace::new();
    ws.write("in/keep.csv", "id,name\n1,x\n# comment\n2,y\n");
    ws.write("in/skip.csv", "id,name\n9,q\n");
    let out = ws.path().join("out").join("result.csv");
    crunch()
        .args([
            "-in",
            &arg(&ws.path().join("in")),
            "-out",
            &arg(&out),
            "--combineInputs=concat",
            "--exclude=.*skip\\.csv",
            "--ignoreLinesMatching=#.*",
            "-sql",
            "SELECT id FROM \"in\" ORDER BY id",
        ])
        .assert()
        .success();
    assert_eq!(ws.read("out/result.csv"), "id\n1\n2\n");
    let concat = fs::read_to_string(ws.path().join("out_concat").join("in.csv")).unwrap();
    assert!(!concat.contains("# comment"));
}
