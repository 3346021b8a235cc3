//! Arbre JSON → compilation → conteneur sur disque → relecture.

use camino::Utf8PathBuf;
use gmscript_ast::build::*;
use gmscript_ast::{Node, Operator};
use gmscript_compiler::{CompilerOptions, Severity};
use gmscript_tools::prelude::*;
use gmscript_tools::ProgramImageError;
use pretty_assertions::assert_eq;

fn unit() -> Node {
    block(vec![
        global("add"),
        stmt(assign(ident("add"), function(&["a", "b"], vec![ret(Some(binary(Operator::Add, ident("a"), ident("b")))).at(2)])))
            .at(1),
        stmt(assign(ident("r"), call(ident("add"), vec![int(1), int(2)]))).at(4),
    ])
}

#[test]
fn json_tree_compiles_to_a_container_on_disk() {
    let json = serde_json::to_string(&unit()).unwrap();
    let parsed = parse_unit(&json).unwrap();
    assert_eq!(parsed, unit());

    let options = CompilerOptions { debug: true, ..CompilerOptions::default() };
    let out = compile_unit(&parsed, options, Some(("add.gm", "add = function(a, b) {\n  return a + b;\n};\nr = add(1, 2);\n")));
    assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
    let image = out.image.unwrap();
    assert_eq!(image.functions.len(), 2);
    assert_eq!(image.sources.len(), 1);
    assert_eq!(image.sources[0].name, "add.gm");

    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("out/add.gmf")).unwrap();
    write_bytes(&path, &image.to_bytes()).unwrap();

    let back = ProgramImage::from_bytes(&read_bytes(&path).unwrap()).unwrap();
    assert_eq!(back, image);
    verify_image(&back).unwrap();

    let text = back.disassemble().unwrap();
    assert!(text.contains("== "), "{text}");
    assert!(text.contains("add"), "{text}");
    assert!(text.contains("retv"), "{text}");
    assert!(text.contains(";; param 0: a"), "{text}");

    let summary = back.summary();
    assert!(summary.starts_with("functions=2 symbols=1 strings=0 sources=1"), "{summary}");
}

#[test]
fn failed_compilation_yields_diagnostics_only() {
    let unit = block(vec![stmt(assign(int(1), int(2))).at(3)]);
    let out = compile_unit(&unit, CompilerOptions::default(), None);
    assert!(!out.succeeded());
    assert_eq!(out.diagnostics.len(), 1);
    assert_eq!(out.diagnostics[0].severity, Severity::Error);
    assert_eq!(out.diagnostics[0].line, 3);
}

#[test]
fn corrupted_container_is_rejected() {
    let out = compile_unit(&unit(), CompilerOptions::default(), None);
    let mut bytes = out.image.unwrap().to_bytes();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x5A;

    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("bad.gmf")).unwrap();
    write_bytes(&path, &bytes).unwrap();
    let err = ProgramImage::from_bytes(&read_bytes(&path).unwrap()).unwrap_err();
    assert!(matches!(err, ProgramImageError::Checksum { .. }), "{err}");
}

#[test]
fn default_output_replaces_extension() {
    assert_eq!(default_out_path(Utf8Path::new("dir/game.json"), "gmf"), Utf8PathBuf::from("dir/game.gmf"));
}
