//! Command line interface of the shader compiler.
//!
//! `nagac [-o out.spv] [-debug] [-validate=false] [-version] <input.wgsl>`

use std::{env, fs, io::Write as _, process};

fn print_usage() {
    eprintln!("Usage: nagac [-o out.spv] [-debug] [-validate=false] [-version] <input.wgsl>");
}

fn main() {
    env_logger::init();
    process::exit(run());
}

fn run() -> i32 {
    let mut input_path = None;
    let mut output_path = None;
    let mut flags = nagac::back::spv::WriterFlags::empty();
    let mut validate = true;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" => match args.next() {
                Some(path) => output_path = Some(path),
                None => {
                    eprintln!("-o expects a path");
                    return 1;
                }
            },
            "-debug" => flags |= nagac::back::spv::WriterFlags::DEBUG,
            "-validate=false" => validate = false,
            "-validate=true" | "-validate" => validate = true,
            "-version" => {
                println!("nagac {}", env!("CARGO_PKG_VERSION"));
                return 0;
            }
            _ if arg.starts_with('-') => {
                eprintln!("unknown option: {}", arg);
                print_usage();
                return 1;
            }
            _ => input_path = Some(arg),
        }
    }

    let input_path = match input_path {
        Some(path) => path,
        None => {
            print_usage();
            return 1;
        }
    };
    let source = match fs::read_to_string(&input_path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("could not read {}: {}", input_path, error);
            return 1;
        }
    };

    let module = match nagac::front::wgsl::parse_str(&source) {
        Ok(module) => module,
        Err(error) => {
            error.emit_to_stderr(&source);
            return 1;
        }
    };

    if validate {
        let errors = nagac::valid::Validator::new().validate(&module);
        if !errors.is_empty() {
            for error in errors.iter() {
                eprintln!("error: {}", error);
            }
            return 1;
        }
    }

    let options = nagac::back::spv::Options {
        lang_version: (1, 3),
        flags,
        capabilities: Vec::new(),
    };
    let words = match nagac::back::spv::write_vec(&module, &options) {
        Ok(words) => words,
        Err(error) => {
            eprintln!("error: {}", error);
            return 1;
        }
    };

    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    let result = match output_path {
        Some(path) => fs::write(&path, &bytes).map_err(|error| {
            eprintln!("could not write {}: {}", path, error);
        }),
        None => std::io::stdout().write_all(&bytes).map_err(|error| {
            eprintln!("could not write to stdout: {}", error);
        }),
    };
    match result {
        Ok(()) => 0,
        Err(()) => 1,
    }
}
