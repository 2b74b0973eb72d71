// Cb execution core: demo driver binary.
//
// Copyright (C) 2019  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.
//
// This core has no parser (spec.md §6 "Input"): a `Program` arrives
// pre-built. This binary exists to run one from disk, encoded as RON
// or JSON by whatever front end produced it, the way the teacher's own
// `main.rs` loads a dashboard layout file before handing it to a
// renderer.

use std::env::args;
use std::fs;
use std::process::ExitCode;

use cb_core::ast::Program;
use cb_core::config::InterpreterConfig;
use cb_core::interpreter::{Interpreter, StdoutSink};

fn load_program(path: &str) -> Result<Program, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("couldn't read '{}': {}", path, e))?;
    if path.ends_with(".json") {
        serde_json::from_str(&text).map_err(|e| format!("couldn't parse '{}' as JSON: {}", path, e))
    } else {
        ron::from_str(&text).map_err(|e| format!("couldn't parse '{}' as RON: {}", path, e))
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let Some(program_path) = args().nth(1) else {
        eprintln!("usage: cb-run <program.ron|program.json> [config.ron]");
        return ExitCode::from(2);
    };

    let program = match load_program(&program_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    let config = match args().nth(2) {
        Some(config_path) => match fs::read_to_string(&config_path).map_err(|e| e.to_string()).and_then(|text| {
            InterpreterConfig::from_ron_str(&text).map_err(|e| e.to_string())
        }) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("couldn't load config '{}': {}", config_path, e);
                return ExitCode::from(2);
            }
        },
        None => InterpreterConfig::default(),
    };

    match Interpreter::run(&program, Box::new(StdoutSink), config) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(1)
        }
    }
}
