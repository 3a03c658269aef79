fn main() {
    if let Err(err) = bscwatch::run_entry(true) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
