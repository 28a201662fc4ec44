//! The entry point for a minimal interactive pipeline shell: read a line,
//! split it on whitespace, run it as a pipeline, repeat.

use std::io::{BufRead, Write};

use swash::common::isatty;
use swash::exec::exec_pipeline;
use swash::flog::activate_flog_categories;
use swash::FLOG;

const PROMPT: &str = "swash> ";

fn print_usage(name: &str) -> ! {
    eprintln!("Usage: {name} [-d CATEGORY_LIST]");
    std::process::exit(2);
}

fn main() {
    let mut args = std::env::args();
    let name = args.next().unwrap_or_else(|| "swash".to_owned());
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-d" | "--debug" => {
                let Some(categories) = args.next() else {
                    print_usage(&name);
                };
                activate_flog_categories(&categories);
            }
            _ => print_usage(&name),
        }
    }

    let interactive = isatty(libc::STDIN_FILENO);
    let stdin = std::io::stdin();
    let mut line = String::new();
    let mut last_ok = true;
    loop {
        if interactive {
            print!("{PROMPT}");
            let _ = std::io::stdout().flush();
        }
        line.clear();
        match stdin.lock().read_line(&mut line) {
            // EOF.
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                FLOG!(error, "could not read from stdin:", err);
                last_ok = false;
                break;
            }
        }
        let tokens: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
        if tokens.is_empty() {
            continue;
        }
        last_ok = exec_pipeline(&tokens);
    }
    if interactive {
        println!();
    }
    std::process::exit(if last_ok { 0 } else { 1 });
}
