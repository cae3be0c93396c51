fn main() {
    if let Err(err) = csv_cruncher::run() {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}
