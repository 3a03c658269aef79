fn main() {
    if let Err(err) = bscwatch::run_entry(false) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
