#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]

fn main() {
    if let Err(e) = gap_alerts::run() {
        eprintln!("gap-alerts: {}", e);
        std::process::exit(1);
    }
}
