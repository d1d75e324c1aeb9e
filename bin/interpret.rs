//! Run a program concretely: `interpret <program.json> <state.json> [limit]`.

use std::env;

use while_plus::semantics::concrete::{Interpreter, LoopStatus};
use while_plus::semantics::state::ConcreteState;
use while_plus::syntax::Stmt;

fn main() {
    run();
}

pub fn run() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        panic!("usage: interpret <program.json> <state.json> [limit]");
    }

    let mut program: Stmt = parse_json(&read_from(&args[1]));
    let entry: ConcreteState = parse_json(&read_from(&args[2]));
    let limit: u64 = match args.get(3) {
        Some(raw) => raw.parse().expect("the loop limit must be a number"),
        None => 10_000,
    };
    program.label_loops();

    match Interpreter::new(limit).run(&program, entry) {
        Ok(run) => {
            if run.status == LoopStatus::LimitExceeded {
                println!("note: a loop was cut off at the iteration limit of {limit}");
            }
            println!("{}", run.state);
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .expect("logger already installed");
}

fn read_from(path: &str) -> String {
    String::from_utf8(
        std::fs::read(path)
            .unwrap_or_else(|_| panic!("Could not read the input file {}", path)),
    )
    .expect("The input file does not contain valid utf-8 text")
}

fn parse_json<T: serde::de::DeserializeOwned>(input: &str) -> T {
    serde_json::from_str(input).expect("malformed input json")
}
