mod common;

use common::TestWorkspace;
use csv_cruncher::{
    CrunchError, CrunchOptions,
    crunch::Cruncher,
    engine::sqlite::DB_FILE_NAME,
    options::{CombineInputFiles, JsonExportFormat},
};

#[test]
fn library_run_writes_csv_and_json() {
    let ws = TestWorkspace::new();
    let input = ws.write("orders.csv", "id,amount,paid\n1,10,true\n2,25,false\n3,7,true\n");
    let mut options = CrunchOptions::new(vec![input], ws.path().join("paid.csv"))
        .with_sql("SELECT id, amount FROM orders WHERE paid ORDER BY amount DESC");
    options.json = Some(JsonExportFormat::Array);
    options.keep_work_files = true;

    Cruncher::new(options).crunch().unwrap();
    assert_eq!(ws.read("paid.csv"), "id,amount\n1,10\n3,7\n");
    let json: serde_json::Value = serde_json::from_str(&ws.read("paid.json")).unwrap();
    assert_eq!(json[0]["amount"], 10);
    assert_eq!(json[1]["id"], 3);
}

#[test]
fn sql_errors_are_wrapped_after_cleanup() {
    let ws = TestWorkspace::new();
    let input = ws.write("orders.csv", "id\n1\n");
    let options = CrunchOptions::new(vec![input], ws.path().join("o.csv"))
        .with_sql("SELEC id FROM orders");

    let err = Cruncher::new(options).crunch().unwrap_err();
    assert!(matches!(err, CrunchError::Failed { .. }));
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("SELEC id FROM orders"));
}

#[test]
fn configuration_errors_precede_any_work() {
    let ws = TestWorkspace::new();
    let input = ws.write("orders.csv", "id\n1\n");
    let mut options = CrunchOptions::new(vec![input], ws.path().join("o.csv"));
    options.combine_inputs = CombineInputFiles::Substract;

    let err = Cruncher::new(options).crunch().unwrap_err();
    assert!(matches!(err, CrunchError::NotImplemented(_)));
    assert_eq!(err.exit_code(), 2);

    let missing = CrunchOptions::new(vec![ws.path().join("nope.csv")], ws.path().join("o.csv"));
    let err = Cruncher::new(missing).crunch().unwrap_err();
    assert!(matches!(err, CrunchError::Config(_)));
}

#[test]
fn default_query_with_many_tables_is_a_config_error() {
    let ws = TestWorkspace::new();
    let a = ws.write("a.csv", "id\n1\n");
    let b = ws.write("b.csv", "id\n2\n");
    let options = CrunchOptions::new(vec![a, b], ws.path().join("o.csv"));

    let err = Cruncher::new(options).crunch().unwrap_err();
    assert!(matches!(err, CrunchError::Config(_)));
    assert!(!ws.path().join("o.csv").exists());
}

const PEOPLE: &str = "id,name\n1,Alice\n2,Bob\n3,Carol\n";

#[test]
fn row_numbers_work_with_union_and_cte_queries() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);

    let mut options = CrunchOptions::new(vec![input.clone()], ws.path().join("union.csv")).with_sql(
        "SELECT name FROM people WHERE id = 1 UNION ALL SELECT name FROM people WHERE id = 3",
    );
    options.row_numbers = Some(Some(100));
    Cruncher::new(options).crunch().unwrap();
    assert_eq!(ws.read("union.csv"), "crunchCounter,name\n100,Alice\n101,Carol\n");

    let mut options = CrunchOptions::new(vec![input], ws.path().join("cte.csv")).with_sql(
        "WITH x AS (SELECT name, id FROM people WHERE id > 1) SELECT name FROM x ORDER BY id DESC",
    );
    options.row_numbers = Some(Some(7));
    Cruncher::new(options).crunch().unwrap();
    assert_eq!(ws.read("cte.csv"), "crunchCounter,name\n7,Carol\n8,Bob\n");
}

#[test]
fn row_numbers_can_start_at_zero_or_below() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", PEOPLE);

    let mut options = CrunchOptions::new(vec![input.clone()], ws.path().join("zero.csv"))
        .with_sql("SELECT name FROM people ORDER BY id");
    options.row_numbers = Some(Some(0));
    Cruncher::new(options).crunch().unwrap();
    assert_eq!(ws.read("zero.csv"), "crunchCounter,name\n0,Alice\n1,Bob\n2,Carol\n");

    let mut options = CrunchOptions::new(vec![input], ws.path().join("negative.csv"))
        .with_sql("SELECT name FROM people ORDER BY id");
    options.row_numbers = Some(Some(-5));
    Cruncher::new(options).crunch().unwrap();
    assert_eq!(ws.read("negative.csv"), "crunchCounter,name\n-5,Alice\n-4,Bob\n-3,Carol\n");
}

#[test]
fn inputs_named_like_output_tables_do_not_clash() {
    let ws = TestWorkspace::new();
    let input = ws.write("output.csv", "id\n1\n2\n");
    let options = CrunchOptions::new(vec![input], ws.path().join("result.csv"));
    Cruncher::new(options).crunch().unwrap();
    assert_eq!(ws.read("result.csv"), "id\n1\n2\n");

    let a = ws.write("in/a.csv", "id\n1\n");
    let a_out = ws.write("in/a_out.csv", "id\n2\n");
    let mut options =
        CrunchOptions::new(vec![a, a_out], ws.path().join("per")).with_sql("SELECT * FROM $table");
    options.query_per_input_subpart = true;
    Cruncher::new(options).crunch().unwrap();
    assert_eq!(ws.read("per/a.csv"), "id\n1\n");
    assert_eq!(ws.read("per/a_out.csv"), "id\n2\n");
}

#[test]
fn failed_query_still_drops_every_table() {
    let ws = TestWorkspace::new();
    let a = ws.write("a.csv", "id\n1\n");
    let b = ws.write("b.csv", "id,name\n1,x\n");
    let db_dir = ws.path().join("db");
    let mut options = CrunchOptions::new(vec![a, b], ws.path().join("o.csv"))
        .with_sql("SELECT a.id, b.missing FROM a JOIN b ON a.id = b.id");
    options.db_dir = Some(db_dir.clone());

    let err = Cruncher::new(options).crunch().unwrap_err();
    assert!(matches!(err, CrunchError::Failed { .. }));

    let conn = rusqlite::Connection::open(db_dir.join(DB_FILE_NAME)).unwrap();
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') \
             AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(tables, 0);
}
