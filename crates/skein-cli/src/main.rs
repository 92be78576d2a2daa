use clap::{Parser, Subcommand};
use skein_core::doctor;

/// Skein command-line interface
#[derive(Parser)]
#[command(name = "skein", author, version, about = "Operator tooling for the Skein UDP proxy gateway", long_about = None)]
struct Cli {
    /// Subcommands for the CLI
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Diagnose gateway configuration and environment
    Doctor {
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Doctor { json }) => {
            let report = doctor::run_doctor();
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("Failed to serialize doctor report: {}", e),
                }
            } else {
                println!("doctor: {}", report.overall);
                print!("{}", report.render());
            }
            // Warnings never affect the exit code; failures do.
            if report.has_failures() {
                std::process::exit(1);
            }
        }
        None => {
            println!("No subcommand provided. Try `skein doctor`.");
        }
    }
}
