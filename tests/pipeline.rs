//! End-to-end pipeline scenarios: CF source through compile, link and
//! execution, plus the assembler/disassembler round trip.

use catface::asm::assemble;
use catface::bytecode::{Key, VideoStorageFormat, VideoUpdateMode};
use catface::disasm::disassemble;
use catface::executable::Executable;
use catface::linker::{link, LinkError};
use catface::object::Object;
use catface::sandbox::{ExecContext, Sandbox};
use catface::vm::{execute, TermInfo, TermReason, DEFAULT_MEMORY_SIZE};

#[derive(Default)]
struct RecordingSandbox {
    writes: Vec<f64>,
    reads: Vec<f64>,
    video_modes: Vec<(VideoStorageFormat, VideoUpdateMode)>,
    refreshes: u32,
}

impl Sandbox for RecordingSandbox {
    fn initialize(&mut self, _ctx: ExecContext<'_>) -> bool {
        true
    }

    fn terminate(&mut self, _info: &TermInfo) {}

    fn get_execution_time(&mut self) -> Option<f32> {
        Some(0.0)
    }

    fn set_video_mode(&mut self, format: VideoStorageFormat, mode: VideoUpdateMode) -> bool {
        self.video_modes.push((format, mode));
        true
    }

    fn refresh_screen(&mut self, _memory: &[u8]) -> bool {
        self.refreshes += 1;
        true
    }

    fn wait_key_down(&mut self) -> Option<Key> {
        None
    }

    fn get_key_state(&mut self, _key: Key) -> Option<bool> {
        Some(false)
    }

    fn read_float64(&mut self) -> f64 {
        self.reads.pop().unwrap_or(0.0)
    }

    fn write_float64(&mut self, value: f64) {
        self.writes.push(value);
    }
}

fn run(exe: &Executable) -> (TermInfo, RecordingSandbox) {
    let mut sandbox = RecordingSandbox::default();
    let info = execute(exe, DEFAULT_MEMORY_SIZE, &mut sandbox);
    (info, sandbox)
}

/// Assembly module implementing the float-output runtime the CF sources
/// forward-declare.
const RUNTIME_ASM: &str = "\
write_f64:
syscall 1
ret
tick:
push 1.0
syscall 1
ret
";

fn compile_and_link(source: &str) -> Executable {
    let program = catface::compile_source(source, "main.cf").unwrap();
    let runtime = assemble(RUNTIME_ASM, "runtime.cfasm").unwrap();
    link(&[program, runtime]).unwrap()
}

#[test]
fn scenario_arithmetic_halts_cleanly() {
    let program =
        catface::compile_source("fn main() { let x: i32 = 2 as i32 + 3 as i32; }", "main.cf")
            .unwrap();
    let exe = link(&[program]).unwrap();

    let (info, sandbox) = run(&exe);
    assert_eq!(info.reason, TermReason::Halt);
    assert!(sandbox.writes.is_empty(), "no sandbox side-effects expected");
    assert!(sandbox.video_modes.is_empty());
    assert_eq!(sandbox.refreshes, 0);
}

#[test]
fn scenario_floating_output() {
    let exe = compile_and_link(
        "fn write_f64(x: f32) void;\n\
         fn main() { write_f64(1.5 as f32 + 2.5 as f32); }",
    );

    let (info, sandbox) = run(&exe);
    assert_eq!(info.reason, TermReason::Halt);
    assert_eq!(sandbox.writes, vec![4.0]);
}

#[test]
fn scenario_loop_runs_exactly_ten_iterations() {
    let exe = compile_and_link(
        "fn tick() void;\n\
         fn main() {\n\
             let i: u32 = 0 as u32;\n\
             while i < 10 as u32 {\n\
                 i += 1 as u32;\n\
                 tick();\n\
             }\n\
         }",
    );

    let (info, sandbox) = run(&exe);
    assert_eq!(info.reason, TermReason::Halt);
    assert_eq!(sandbox.writes.len(), 10);
}

#[test]
fn scenario_bad_cast_fails_tir_building() {
    let err = catface::compile_source("fn main() { let x: void = 1 as i32; }", "main.cf")
        .unwrap_err();
    assert_eq!(
        err.message,
        "unexpected initializer type (expected void, actual i32)"
    );
    // the span points at the initializer
    assert!(err.span.start < err.span.end);
}

#[test]
fn scenario_unknown_label() {
    let object = assemble("call nonexistent\nhalt\n", "prog.cfasm").unwrap();
    let err = link(&[object]).unwrap_err();
    assert_eq!(
        err,
        LinkError::UnknownLabel {
            label: "nonexistent".to_string(),
            file: "prog.cfasm".to_string(),
            line: 1,
        }
    );
}

#[test]
fn scenario_segmentation_fault() {
    let object = assemble("push 0xFFFFFFFC\npop [0xFFFFFFFC]\n", "prog.cfasm").unwrap();
    let exe = link(&[object]).unwrap();

    let (info, _sandbox) = run(&exe);
    assert_eq!(
        info.reason,
        TermReason::SegmentationFault {
            addr: 0xFFFFFFFC,
            memory_size: 0x100000,
        }
    );
    // the offset of the pop instruction itself
    assert_eq!(info.offset, 6);
}

#[test]
fn conditionals_pick_the_right_branch() {
    let exe = compile_and_link(
        "fn write_f64(x: f32) void;\n\
         fn main() {\n\
             let a: i32 = 2 as i32;\n\
             if a < 3 as i32 {\n\
                 write_f64(1.0 as f32);\n\
             } else {\n\
                 write_f64(2.0 as f32);\n\
             }\n\
             if a == 0 as i32 {\n\
                 write_f64(3.0 as f32);\n\
             }\n\
         }",
    );

    let (info, sandbox) = run(&exe);
    assert_eq!(info.reason, TermReason::Halt);
    assert_eq!(sandbox.writes, vec![1.0]);
}

#[test]
fn arguments_land_in_callee_frame_slots() {
    let exe = compile_and_link(
        "fn write_f64(x: f32) void;\n\
         fn add3(a: i32, b: i32, c: i32) void {\n\
             let r: i32 = a + b + c;\n\
             write_f64(r as f32);\n\
         }\n\
         fn main() { add3(1 as i32, 2 as i32, 3 as i32); }",
    );

    let (info, sandbox) = run(&exe);
    assert_eq!(info.reason, TermReason::Halt);
    assert_eq!(sandbox.writes, vec![6.0]);
}

#[test]
fn call_chain_through_frameless_functions() {
    let exe = compile_and_link(
        "fn write_f64(x: f32) void;\n\
         fn inner(x: u32) void {\n\
             let doubled: u32 = x + x;\n\
             write_f64(doubled as f32);\n\
         }\n\
         fn outer() { inner(5 as u32); }\n\
         fn main() { outer(); }",
    );

    let (info, sandbox) = run(&exe);
    assert_eq!(info.reason, TermReason::Halt);
    assert_eq!(sandbox.writes, vec![10.0]);
}

#[test]
fn float_conversions_round_trip_through_the_vm() {
    let exe = compile_and_link(
        "fn write_f64(x: f32) void;\n\
         fn main() {\n\
             let i: i32 = 7 as i32;\n\
             let f: f32 = i as f32;\n\
             write_f64(f * 2.0 as f32);\n\
         }",
    );

    let (info, sandbox) = run(&exe);
    assert_eq!(info.reason, TermReason::Halt);
    assert_eq!(sandbox.writes, vec![14.0]);
}

#[test]
fn disassemble_assemble_preserves_behaviour() {
    let exe = compile_and_link(
        "fn write_f64(x: f32) void;\n\
         fn main() {\n\
             let i: u32 = 0 as u32;\n\
             while i < 3 as u32 {\n\
                 i += 1 as u32;\n\
             }\n\
             write_f64(8.25 as f32);\n\
         }",
    );

    let text = disassemble(&exe.code).unwrap();
    let reassembled = assemble(&text, "round.cfasm").unwrap();
    let relinked = link(&[reassembled]).unwrap();

    let (first_info, first) = run(&exe);
    let (second_info, second) = run(&relinked);
    assert_eq!(first_info.reason, TermReason::Halt);
    assert_eq!(second_info.reason, first_info.reason);
    assert_eq!(second.writes, first.writes);
}

#[test]
fn reformatting_does_not_change_generated_code() {
    let compact = "fn main(){let x:i32=2 as i32+3 as i32;}";
    let airy = "fn main() {\n    let x : i32 = 2 as i32 + 3 as i32 ; // sum\n}\n";

    let a = catface::compile_source(compact, "same.cf").unwrap();
    let b = catface::compile_source(airy, "same.cf").unwrap();
    assert_eq!(a.code, b.code);
    assert_eq!(a.labels, b.labels);
}

#[test]
fn artifacts_survive_disk_round_trip() {
    let program = catface::compile_source(
        "fn main() { let x: u32 = 1 as u32; }",
        "main.cf",
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let object_path = dir.path().join("main.cfobj");
    let exe_path = dir.path().join("main.cfexe");

    {
        let mut file = std::fs::File::create(&object_path).unwrap();
        program.write(&mut file).unwrap();
    }
    let read_back = {
        let mut file = std::fs::File::open(&object_path).unwrap();
        Object::read(&mut file).unwrap()
    };
    assert_eq!(read_back, program);

    let exe = link(&[read_back]).unwrap();
    {
        let mut file = std::fs::File::create(&exe_path).unwrap();
        exe.write(&mut file).unwrap();
    }
    let exe_back = {
        let mut file = std::fs::File::open(&exe_path).unwrap();
        Executable::read(&mut file).unwrap()
    };

    let (info, _sandbox) = run(&exe_back);
    assert_eq!(info.reason, TermReason::Halt);
}

#[test]
fn duplicate_main_across_objects_is_rejected() {
    let a = catface::compile_source("fn main() { }", "a.cf").unwrap();
    let b = catface::compile_source("fn main() { }", "b.cf").unwrap();
    let err = link(&[a, b]).unwrap_err();
    assert!(matches!(err, LinkError::DuplicateLabel { ref label, .. } if label == "main"));
}
