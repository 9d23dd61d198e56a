mod cli;
mod config;
mod error;
mod logging;
mod model;
mod orchestrator;
mod pidfile;
mod process;
mod text_summary;
mod weights;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    logging::init(args.verbose);
    let is_silent = args.silent;

    if let Err(e) = cli::run(args).await {
        if is_silent {
            println!("{}", e);
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}
