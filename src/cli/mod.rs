pub mod asm;
pub mod build;
pub mod disasm;
pub mod link;
pub mod run;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::process;

use catface::executable::Executable;
use catface::object::Object;

pub fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

pub fn read_object(path: &Path) -> Object {
    let file = open_input(path);
    match Object::read(&mut BufReader::new(file)) {
        Ok(object) => object,
        Err(e) => {
            eprintln!("error: '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

pub fn read_executable(path: &Path) -> Executable {
    let file = open_input(path);
    match Executable::read(&mut BufReader::new(file)) {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("error: '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

pub fn write_object(path: &Path, object: &Object) {
    let file = create_output(path);
    if let Err(e) = object.write(&mut BufWriter::new(file)) {
        eprintln!("error: cannot write '{}': {}", path.display(), e);
        process::exit(1);
    }
}

pub fn write_executable(path: &Path, exe: &Executable) {
    let file = create_output(path);
    if let Err(e) = exe.write(&mut BufWriter::new(file)) {
        eprintln!("error: cannot write '{}': {}", path.display(), e);
        process::exit(1);
    }
}

fn open_input(path: &Path) -> File {
    match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("error: cannot open '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn create_output(path: &Path) -> File {
    match File::create(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("error: cannot create '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
