//! Compiler driver: preprocess with the back-end compiler, convert the
//! preprocessed C99 to C89, then hand the converted file to the back-end.
//!
//! Arguments are classified into preprocessor-only, compiler-only and
//! shared sets; output-naming flags across dialects (`-o`, `-Fo`, `-Fe`,
//! `-Fi`, `-out:`) are recognized so temp files can be named after the
//! output. When the command line does not look like a compilation of a
//! single source file, the original argv runs unchanged.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::{self, Command, Stdio};

use anyhow::{bail, Context, Result};

const CONVERTER: &str = "c99conv";

#[derive(Debug, Default, PartialEq)]
struct Plan {
    cpp: Vec<String>,
    cc: Vec<String>,
    pass: Vec<String>,
    /// Index in `cc` where the converted temp file replaces the source.
    conv_slot: Option<usize>,
    temp_pre: String,
    temp_conv: String,
    keep: bool,
    noconv: bool,
    /// Pass `-ms` through to the converter (cl back end).
    ms_flag: bool,
    compile: bool,
    source: Option<String>,
    outname: Option<String>,
}

impl Plan {
    fn should_convert(&self) -> bool {
        self.compile && self.source.is_some() && self.outname.is_some()
    }

    fn set_outname(&mut self, name: &str) {
        self.outname = Some(name.to_string());
        self.temp_pre = format!("{}_preprocessed.c", name);
        self.temp_conv = format!("{}_converted.c", name);
    }
}

fn classify(args: &[String], pid: u32) -> Result<Plan> {
    let mut plan = Plan {
        temp_pre: format!("preprocessed_{}.c", pid),
        temp_conv: format!("converted_{}.c", pid),
        ..Plan::default()
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-keep" => plan.keep = true,
            "-noconv" => plan.noconv = true,
            _ => break,
        }
        i += 1;
    }
    if plan.keep && plan.noconv {
        bail!("-keep with -noconv doesn't make any sense: there are no intermediate files to keep");
    }

    if let Some(cc) = args.get(i) {
        if cc == "cl" || cc.starts_with("cl.") {
            plan.ms_flag = true;
        }
        // icl takes cl-style options but its own union initializers
    }

    while i < args.len() {
        let arg = args[i].clone();
        let ext_inputfile = arg.len() >= 2
            && (arg.ends_with(".c") || arg.ends_with(".s") || arg.ends_with(".S"));

        if arg.starts_with("-Fo") || arg.starts_with("-Fi") || arg.starts_with("-Fe")
            || arg == "-out" || arg.starts_with("-out:") || arg == "-o" || arg == "-FI"
        {
            if matches!(arg.as_str(), "-Fo" | "-out" | "-Fi" | "-Fe") && i + 1 < args.len() {
                // detached form, works around msys filename mangling
                let next = args[i + 1].clone();
                let joined = if arg == "-out" {
                    format!("-out:{}", next)
                } else {
                    format!("{}{}", arg, next)
                };
                plan.cc.push(joined.clone());
                plan.pass.push(joined);
                plan.set_outname(&next);
                i += 2;
            } else if arg == "-FI" && i + 1 < args.len() {
                let joined = format!("-FI{}", args[i + 1]);
                plan.cpp.push(joined.clone());
                plan.pass.push(joined);
                i += 2;
            } else if arg.starts_with("-out:") {
                plan.cc.push(arg.clone());
                plan.pass.push(arg.clone());
                plan.set_outname(&arg[5..]);
                i += 1;
            } else if arg.starts_with("-Fo") || arg.starts_with("-Fi") || arg.starts_with("-Fe") {
                plan.cc.push(arg.clone());
                plan.pass.push(arg.clone());
                plan.set_outname(&arg[3..]);
                i += 1;
            } else {
                // -o <file>
                plan.cc.push(arg.clone());
                plan.pass.push(arg);
                i += 1;
                if i < args.len() {
                    let name = args[i].clone();
                    plan.cc.push(name.clone());
                    plan.pass.push(name.clone());
                    plan.set_outname(&name);
                    i += 1;
                }
            }
        } else if arg == "-c" {
            plan.cc.push(arg.clone());
            plan.pass.push(arg);
            plan.cpp.push("-E".to_string());
            if !plan.noconv {
                plan.compile = true;
            }
            i += 1;
        } else if ext_inputfile {
            plan.source = Some(arg.clone());
            plan.cpp.push(arg.clone());
            plan.pass.push(arg);
            plan.conv_slot = Some(plan.cc.len());
            plan.cc.push(String::new());
            i += 1;
        } else if arg == "-MMD" || arg.starts_with("-D") {
            if arg == "-D" {
                plan.cpp.push(arg.clone());
                plan.pass.push(arg);
                i += 1;
                if i >= args.len() {
                    break;
                }
            }
            plan.cpp.push(args[i].clone());
            plan.pass.push(args[i].clone());
            i += 1;
        } else if arg == "-MF" || arg == "-MT" {
            plan.cpp.push(arg.clone());
            plan.pass.push(arg);
            i += 1;
            if i < args.len() {
                plan.cpp.push(args[i].clone());
                plan.pass.push(args[i].clone());
                i += 1;
            }
        } else if arg.starts_with("-FI") {
            plan.cpp.push(arg.clone());
            plan.pass.push(arg);
            i += 1;
        } else {
            plan.cpp.push(arg.clone());
            plan.cc.push(arg.clone());
            plan.pass.push(arg);
            i += 1;
        }
    }

    // the converted temp replaces the source on the compiler line; it is
    // patched in late because the output name may come after the input
    if let Some(slot) = plan.conv_slot {
        plan.cc[slot] = plan.temp_conv.clone();
    }
    Ok(plan)
}

fn converter_path() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join(CONVERTER)))
        .unwrap_or_else(|| PathBuf::from(CONVERTER))
}

fn run_argv(argv: &[String]) -> Result<i32> {
    log::debug!("run: {:?}", argv);
    let status = Command::new(&argv[0])
        .args(&argv[1..])
        .status()
        .with_context(|| format!("failed to run {:?}", argv[0]))?;
    Ok(status.code().unwrap_or(1))
}

fn run_argv_capture(argv: &[String], out: &str) -> Result<i32> {
    log::debug!("run: {:?} > {}", argv, out);
    let file = fs::File::create(out).with_context(|| format!("cannot create {}", out))?;
    let status = Command::new(&argv[0])
        .args(&argv[1..])
        .stdout(Stdio::from(file))
        .status()
        .with_context(|| format!("failed to run {:?}", argv[0]))?;
    Ok(status.code().unwrap_or(1))
}

fn remove_temp(path: &str) {
    if let Err(e) = fs::remove_file(path) {
        log::debug!("could not remove {}: {}", path, e);
    }
}

fn run() -> Result<i32> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        bail!("usage: c99wrap [-keep] [-noconv] <compiler> [options] <file>");
    }
    let plan = classify(&args, process::id())?;
    if plan.pass.is_empty() {
        bail!("no compiler command given");
    }

    if !plan.should_convert() {
        // doesn't look like a conversion run, call the arguments as given
        return run_argv(&plan.pass);
    }

    let code = run_argv_capture(&plan.cpp, &plan.temp_pre)?;
    if code != 0 {
        if !plan.keep {
            remove_temp(&plan.temp_pre);
        }
        return Ok(1);
    }

    let mut conv: Vec<String> = vec![converter_path().to_string_lossy().into_owned()];
    if plan.ms_flag {
        conv.push("-ms".to_string());
    }
    conv.push(plan.temp_pre.clone());
    conv.push(plan.temp_conv.clone());
    let code = run_argv(&conv)?;
    if code != 0 {
        if !plan.keep {
            remove_temp(&plan.temp_pre);
            remove_temp(&plan.temp_conv);
        }
        return Ok(1);
    }
    if !plan.keep {
        remove_temp(&plan.temp_pre);
    }

    let code = run_argv(&plan.cc)?;
    if !plan.keep {
        remove_temp(&plan.temp_conv);
    }
    Ok(if code != 0 { 1 } else { 0 })
}

fn main() {
    env_logger::init();
    match run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("c99wrap: {:#}", e);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(args: &[&str]) -> Plan {
        let v: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        classify(&v, 42).unwrap()
    }

    #[test]
    fn gcc_compile_splits_the_pipeline() {
        let p = plan(&["gcc", "-c", "foo.c", "-o", "foo.o", "-Wall"]);
        assert!(p.should_convert());
        assert_eq!(p.cpp, ["gcc", "-E", "foo.c", "-Wall"]);
        assert_eq!(p.cc, ["gcc", "-c", "foo.o_converted.c", "-o", "foo.o", "-Wall"]);
        assert_eq!(p.temp_pre, "foo.o_preprocessed.c");
        assert!(!p.ms_flag);
    }

    #[test]
    fn msvc_attached_output_flag() {
        let p = plan(&["cl", "-c", "-Fofoo.obj", "foo.c"]);
        assert!(p.should_convert());
        assert!(p.ms_flag);
        assert_eq!(p.outname.as_deref(), Some("foo.obj"));
        assert_eq!(p.cpp, ["cl", "-E", "foo.c"]);
        assert_eq!(p.cc, ["cl", "-c", "-Fofoo.obj", "foo.obj_converted.c"]);
    }

    #[test]
    fn detached_fo_is_rejoined() {
        let p = plan(&["cl", "-c", "-Fo", "foo.obj", "foo.c"]);
        assert_eq!(p.cc, ["cl", "-c", "-Fofoo.obj", "foo.obj_converted.c"]);
        let p = plan(&["cl", "-out", "foo.exe", "-c", "foo.c"]);
        assert_eq!(p.cc[1], "-out:foo.exe");
    }

    #[test]
    fn output_after_input_still_names_the_temp() {
        let p = plan(&["gcc", "-c", "foo.c", "-o", "bar.o"]);
        assert_eq!(p.cc, ["gcc", "-c", "bar.o_converted.c", "-o", "bar.o"]);
    }

    #[test]
    fn preprocessor_only_flags_stay_off_the_compile_line() {
        let p = plan(&["gcc", "-c", "-DFOO=1", "-D", "BAR", "-MMD", "-MF", "d.d", "-FIforce.h", "foo.c", "-o", "foo.o"]);
        assert_eq!(
            p.cpp,
            ["gcc", "-E", "-DFOO=1", "-D", "BAR", "-MMD", "-MF", "d.d", "-FIforce.h", "foo.c"]
        );
        assert_eq!(p.cc, ["gcc", "-c", "foo.o_converted.c", "-o", "foo.o"]);
    }

    #[test]
    fn linking_passes_through() {
        let p = plan(&["gcc", "foo.o", "bar.o", "-o", "prog"]);
        assert!(!p.should_convert());
        assert_eq!(p.pass, ["gcc", "foo.o", "bar.o", "-o", "prog"]);
    }

    #[test]
    fn noconv_passes_through() {
        let p = plan(&["-noconv", "gcc", "-c", "foo.c", "-o", "foo.o"]);
        assert!(!p.should_convert());
        assert!(p.noconv);
    }

    #[test]
    fn keep_with_noconv_is_an_error() {
        let v: Vec<String> = ["-keep", "-noconv", "gcc"].iter().map(|s| s.to_string()).collect();
        assert!(classify(&v, 1).is_err());
    }

    #[test]
    fn pid_names_are_used_without_an_output() {
        let p = plan(&["gcc", "-c", "foo.c"]);
        assert!(!p.should_convert());
        assert_eq!(p.temp_pre, "preprocessed_42.c");
    }

    #[test]
    fn icl_gets_cl_options_but_not_ms_unions() {
        let p = plan(&["icl", "-c", "-Fofoo.obj", "foo.c"]);
        assert!(p.should_convert());
        assert!(!p.ms_flag);
    }
}
