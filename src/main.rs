fn main() {
    if let Err(err) = enrollment_mapper::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
