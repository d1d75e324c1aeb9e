//! Run the interval analysis and print the exit state plus one
//! pre/invariant/post block per loop:
//! `analyze [--no-widening] [--no-narrowing] <program.json> <state.json>
//! [clamp_lo clamp_hi]`.

use std::env;

use while_plus::semantics::abstract_interp::{analyze, AnalysisFlags};
use while_plus::semantics::domain::AbstractState;
use while_plus::semantics::interval::{Ext, Interval, IntervalDomain};
use while_plus::syntax::Stmt;

fn main() {
    run();
}

pub fn run() {
    init_logging();

    let mut flags = AnalysisFlags::default();
    let mut args: Vec<String> = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--no-widening" => flags.widening = false,
            "--no-narrowing" => flags.narrowing = false,
            _ => args.push(arg),
        }
    }
    if args.len() < 2 {
        panic!(
            "usage: analyze [--no-widening] [--no-narrowing] \
             <program.json> <state.json> [clamp_lo clamp_hi]"
        );
    }

    let mut program: Stmt = parse_json(&read_from(&args[0]));
    let entry: AbstractState<Interval> = parse_json(&read_from(&args[1]));
    let (clamp_lo, clamp_hi) = match (args.get(2), args.get(3)) {
        (Some(lo), Some(hi)) => (
            Ext::Int(lo.parse().expect("clamp_lo must be a number")),
            Ext::Int(hi.parse().expect("clamp_hi must be a number")),
        ),
        _ => (Ext::NegInf, Ext::PosInf),
    };
    program.label_loops();

    match analyze(&program, &entry, clamp_lo, clamp_hi, flags) {
        Ok(analysis) => {
            let dom = IntervalDomain::default();
            println!("exit: {}", analysis.exit.render(&dom));
            for (label, ann) in &analysis.loops {
                println!("loop {}:", label.0);
                println!("  pre       {}", ann.pre.render(&dom));
                println!("  invariant {}", ann.invariant.render(&dom));
                println!("  post      {}", ann.post.render(&dom));
            }
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
