fn main() {
    if let Err(e) = hovel::run() {
        let err = anyhow::Error::from(e);
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
