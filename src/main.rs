use std::{env, process};

use tracing::Level;

use ttc::compile;

fn main() {
    let args: Vec<String> = env::args().collect();
    let sliced: Vec<&str> = args.iter().skip(1).map(|s| &s[..]).collect();

    let inv = compile::parse_args(&sliced).unwrap_or_else(|e| {
        eprintln!("{e}");
        eprintln!(
            "usage: ttc <files or directories...> [-o out.js] [--no-prelude] \
             [--max-depth n] [--no-type-comments] [-v|-vv]"
        );
        process::exit(2)
    });

    let level = match inv.verbosity {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    process::exit(compile::launch(inv));
}
