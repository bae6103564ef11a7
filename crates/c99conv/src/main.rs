use std::env;
use std::path::PathBuf;
use std::process;

use clang::Clang;

use c99conv::Options;

fn main() {
    env_logger::init();
    let mut ms_compat = false;
    let mut files: Vec<PathBuf> = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-ms" => ms_compat = true,
            // the driver passes an empty option slot when MS mode is off
            "" => {}
            _ => files.push(PathBuf::from(arg)),
        }
    }
    if files.len() != 2 {
        eprintln!("usage: c99conv [-ms] <input.c> <output.c>");
        process::exit(1);
    }
    let clang = match Clang::new() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("c99conv: {}", e);
            process::exit(1);
        }
    };
    let opts = Options { ms_compat };
    if let Err(e) = c99conv::convert_file(&clang, &files[0], &files[1], &opts) {
        eprintln!("c99conv: {}: {}", files[0].display(), e);
        process::exit(1);
    }
}
