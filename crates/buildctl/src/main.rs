use clap::error::ErrorKind;
use clap::Parser;

mod cli;

#[tokio::main]
async fn main() {
    cli::install_panic_hook();

    let parsed = match cli::Cli::try_parse() {
        Ok(parsed) => parsed,
        Err(err) if err.kind() == ErrorKind::DisplayVersion => {
            let _ = err.print();
            std::process::exit(0);
        }
        Err(err) => std::process::exit(cli::report_parse_error(&err)),
    };

    match parsed.dispatch().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    }
}
