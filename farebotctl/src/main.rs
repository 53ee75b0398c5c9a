use clap::Parser;

fn main() {
    let cli = farebotctl::Cli::parse();
    if let Err(err) = farebotctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
