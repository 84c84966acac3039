use clap::Parser as ArgParser;
use clap::Subcommand;
use nandsim::library::FileReader;
use nandsim::{run_test, truth_table, BusMap, ChipLibrary, Instance, TestOutcome};
use std::path::PathBuf;
use std::process::exit;
use std::rc::Rc;
use tracing::Level;

#[derive(ArgParser)]
#[clap(version)]
struct Cli {
    /// Raise the log level (-v info, -vv debug, -vvv trace)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs a JSON test script against its chip
    Test {
        test_file: PathBuf,
        /// Directory holding additional chip definitions
        #[clap(short, long, action)]
        library: Option<PathBuf>,
    },

    /// Builds a chip and settles it once with all inputs low, for catching
    /// errors
    Check {
        chip: String,
        #[clap(short, long, action)]
        library: Option<PathBuf>,
        /// Print the part dependency graph as JSON
        #[clap(short, long, action)]
        graph: bool,
    },

    /// Prints the truth table of a chip
    Table {
        chip: String,
        #[clap(short, long, action)]
        library: Option<PathBuf>,
        #[clap(short, long, default_value_t = 1024)]
        max_rows: usize,
    },
}

fn make_library(dir: &Option<PathBuf>) -> ChipLibrary {
    let library = ChipLibrary::standard();
    match dir {
        Some(dir) => library.with_provider(Rc::new(FileReader::new(dir))),
        None => library,
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Test { test_file, library } => {
            let library = make_library(library);
            match run_test(test_file, &library) {
                Ok(TestOutcome::Passed { .. }) => {}
                Ok(TestOutcome::Mismatch { .. }) => exit(1),
                Err(e) => {
                    println!("{}", e);
                    exit(2);
                }
            }
        }
        Commands::Check {
            chip,
            library,
            graph,
        } => {
            let library = make_library(library);
            let mut instance = match Instance::construct(&library, chip) {
                Ok(x) => x,
                Err(e) => {
                    println!("{}", e);
                    exit(2);
                }
            };

            let mut inputs = BusMap::new();
            for pin in &instance.plan().inputs {
                inputs.insert_word(&pin.name, pin.width, 0);
            }
            if let Err(e) = instance.eval_combinational(&inputs) {
                println!("{}", e);
                exit(2);
            }

            if *graph {
                match serde_json::to_string_pretty(&instance.plan().graph) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        println!("{}", e);
                        exit(2);
                    }
                }
            } else {
                println!("{}", instance.plan());
            }
        }
        Commands::Table {
            chip,
            library,
            max_rows,
        } => {
            let library = make_library(library);
            let table = match truth_table(&library, chip, *max_rows) {
                Ok(x) => x,
                Err(e) => {
                    println!("{}", e);
                    exit(2);
                }
            };

            println!("| {} |", table.columns.join(" | "));
            for row in &table.rows {
                println!("| {} |", row.join(" | "));
            }
            if !table.exhaustive {
                println!("({} sampled rows)", table.rows.len());
            }
        }
    }
}
