// KESTREL, a small Lisp runtime.

// SPDX-FileCopyrightText: © 2021 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// KESTREL is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/main.rs

// Command line entry: an interactive REPL, or `file <path>` to run a
// whole file as one `do` form.

// <>

use kestrel::lisp::{Config, Error, Interp};

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use std::env;
use std::process;

const USAGE: &str = "usage: kestrel [--heap <bytes>] [file <path>]";

fn main() {
    // level from RUST_LOG, warnings otherwise
    if let Err(err) = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .env()
        .init()
    {
        eprintln!("logger unavailable: {err}");
    }

    let mut config = Config::default();
    let mut file = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--heap" => match args.next().and_then(|n| n.parse::<usize>().ok()) {
                Some(bytes) => {
                    config.zone_size = bytes;
                    config.max_zone_size = config.max_zone_size.max(bytes);
                }
                None => usage(),
            },
            "file" => match args.next() {
                Some(path) => file = Some(path),
                None => usage(),
            },
            _ => usage(),
        }
    }

    let mut it = Interp::with_config(config);

    // cargo run file <filename> to run a file
    if let Some(path) = file {
        match it.run_file(&path) {
            Ok(out) => println!("{out}"),
            Err(err) => {
                println!("ERROR: {err}");
                process::exit(1);
            }
        }
        return;
    }

    if let Err(err) = repl(&mut it) {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn usage() -> ! {
    eprintln!("{USAGE}");
    process::exit(2);
}

/// Reads forms line by line; a line leaving a list open continues on
/// the next one
fn repl(it: &mut Interp) -> Result<(), ReadlineError> {
    let mut rl = DefaultEditor::new()?;
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "> " } else { ".. " };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err),
        };

        pending.push_str(&line);
        pending.push('\n');
        if pending.trim().is_empty() {
            pending.clear();
            continue;
        }

        match it.interpret(&pending) {
            Err(Error::UnterminatedList) | Err(Error::UnterminatedString) => continue,
            Ok(out) => println!("{out}"),
            Err(err) => println!("ERROR: {err}"),
        }

        let _ = rl.add_history_entry(pending.trim_end());
        pending.clear();
    }

    Ok(())
}
