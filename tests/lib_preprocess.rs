use std::ffi::OsString;

use csv_cruncher::preprocess_cli_args;
use proptest::prelude::*;

fn to_strings(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|value| value.to_string_lossy().to_string())
        .collect()
}

#[test]
fn preprocess_cli_args_rewrites_legacy_flags() {
    let processed = preprocess_cli_args(vec![
        OsString::from("crunch"),
        OsString::from("-in"),
        OsString::from("a.csv"),
        OsString::from("-initSql=setup.sql"),
        OsString::from("-db"),
        OsString::from("work"),
        OsString::from("--json"),
    ]);
    assert_eq!(
        to_strings(&processed),
        vec![
            "crunch",
            "--in",
            "a.csv",
            "--initSql=setup.sql",
            "--db",
            "work",
            "--json",
        ]
    );
}

#[test]
fn preprocess_cli_args_leaves_values_alone() {
    let processed = preprocess_cli_args(vec![
        OsString::from("crunch"),
        OsString::from("--sql"),
        OsString::from("-in"),
        OsString::from("-inside"),
    ]);
    assert_eq!(to_strings(&processed)[3], "-inside");
}

proptest! {
    #[test]
    fn preprocess_cli_args_keeps_non_flag_tokens(
        tokens in proptest::collection::vec("[A-Za-z0-9_./]{1,12}", 0..8)
    ) {
        let args: Vec<OsString> = std::iter::once(OsString::from("crunch"))
            .chain(tokens.iter().map(OsString::from))
            .collect();
        let processed = preprocess_cli_args(args.clone());
        prop_assert_eq!(processed, args);
    }
}
