//! End-to-end runs of the built-in modules through the module graph.

use carver_core::module::{Dependencies, Dependency, Kwargs, ModuleSpec};
use carver_core::{
    Finding, Module, ModuleContext, ModuleGraph, ModuleReport, OptionValue, ParsedArgs, Plugin,
    Registry, Result,
};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

const MAGIC: &[u8] = b"CARVEME!";

/// A target with the test magic at `offset`, inside its own directory
fn target(offset: usize, len: usize) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("fw.bin");
    let mut data = vec![0u8; len];
    data[offset..offset + MAGIC.len()].copy_from_slice(MAGIC);
    fs::write(&input, data).unwrap();
    (dir, input)
}

fn list(values: &[&str]) -> OptionValue {
    OptionValue::List(values.iter().map(|v| v.to_string()).collect())
}

fn args(input: &Path, output: &Path, rules: &[&str]) -> ParsedArgs {
    let mut args = ParsedArgs::new();
    args.insert("files".into(), list(&[input.to_str().unwrap()]));
    args.insert("raw".into(), list(&["CARVEME!"]));
    args.insert("directory".into(), OptionValue::Str(output.display().to_string()));
    if !rules.is_empty() {
        args.insert("dd".into(), list(rules));
    }
    args
}

fn execute(args: ParsedArgs) -> Vec<ModuleReport> {
    ModuleGraph::new(Registry::builtin(), args)
        .unwrap()
        .execute()
        .unwrap()
}

fn report<'a>(reports: &'a [ModuleReport], name: &str) -> &'a ModuleReport {
    reports
        .iter()
        .find(|report| report.name == name)
        .unwrap_or_else(|| panic!("no report for '{}'", name))
}

fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn scan_without_extraction_reports_findings_only() {
    let (dir, input) = target(0x20, 256);
    let out = dir.path().join("out");
    let reports = execute(args(&input, &out, &[]));

    let signature = report(&reports, "signature");
    assert!(signature.success);
    assert_eq!(signature.findings.len(), 1);
    assert_eq!(signature.findings[0].offset, 0x20);
    assert_eq!(signature.findings[0].description, "Raw signature (CARVEME!)");
    assert!(reports.iter().all(|r| r.name != "extractor"));
    assert!(!out.join("_fw.bin.extracted").exists());
}

#[test]
fn carve_only_rule_names_file_after_offset() {
    let (dir, input) = target(0x20, 256);
    let out = dir.path().join("out");
    execute(args(&input, &out, &["^raw signature:blob"]));

    let extracted = out.join("_fw.bin.extracted");
    assert_eq!(names_in(&extracted), vec!["20.blob"]);

    let carved = fs::read(extracted.join("20.blob")).unwrap();
    assert_eq!(carved.len(), 256 - 0x20);
    assert_eq!(&carved[..MAGIC.len()], MAGIC);
}

#[test]
fn failed_rule_falls_back_to_next_rule() {
    let (dir, input) = target(0x10, 64);
    let out = dir.path().join("out");
    let reports = execute(args(
        &input,
        &out,
        &["^raw signature:one:false", "^raw signature:two:true"],
    ));

    assert_eq!(names_in(&out.join("_fw.bin.extracted")), vec!["10.two"]);
    assert!(report(&reports, "signature").failures.is_empty());
}

#[test]
fn extractor_reports_carved_and_produced_files() {
    let (dir, input) = target(0, 64);
    let out = dir.path().join("out");
    let reports = execute(args(&input, &out, &["^raw signature:blob:sh -c 'echo hi > note.txt'"]));

    let extractor = report(&reports, "extractor");
    let mut paths: Vec<String> = extractor
        .findings
        .iter()
        .map(|f| {
            assert!(!f.display);
            Path::new(&f.description)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["0.blob", "note.txt"]);
}

#[test]
fn matryoshka_stops_at_depth_limit() {
    let (dir, input) = target(0x10, 128);
    let out = dir.path().join("out");
    let mut args = args(&input, &out, &["^raw signature:blob:cp %e inner.bin"]);
    args.insert("depth".into(), OptionValue::Int(2));

    let reports = execute(args);
    let signature = report(&reports, "signature");

    let scanned: Vec<(String, u64)> = signature
        .findings
        .iter()
        .map(|f| {
            let file = f.file.as_ref().unwrap();
            (file.path.file_name().unwrap().to_string_lossy().into_owned(), f.offset)
        })
        .collect();
    assert_eq!(
        scanned,
        vec![
            ("fw.bin".to_string(), 0x10),
            ("inner.bin".to_string(), 0),
            ("inner.bin".to_string(), 0),
        ]
    );

    // The third level was extracted but never scanned.
    let deepest = out
        .join("_fw.bin.extracted/_inner.bin.extracted/_inner.bin.extracted/inner.bin");
    assert!(deepest.is_file());
}

#[test]
fn missing_target_is_recorded_and_scan_continues() {
    let (dir, input) = target(0, 32);
    let out = dir.path().join("out");
    let mut args = args(&input, &out, &[]);
    args.insert(
        "files".into(),
        list(&[
            dir.path().join("absent.bin").to_str().unwrap(),
            input.to_str().unwrap(),
        ]),
    );

    let reports = execute(args);
    let signature = report(&reports, "signature");
    assert_eq!(signature.failures.len(), 1);
    assert_eq!(signature.findings.len(), 1);
}

struct Orphan;

impl Module for Orphan {
    fn run(&mut self, _ctx: &mut ModuleContext<'_>) -> Result<bool> {
        Ok(true)
    }
}

fn orphan(_: &Kwargs, _: &Dependencies) -> Result<Box<dyn Module>> {
    Ok(Box::new(Orphan))
}

#[test]
fn missing_dependency_fails_only_its_module() {
    let (dir, input) = target(0, 32);
    let out = dir.path().join("out");

    let mut registry = Registry::builtin();
    registry
        .register(
            ModuleSpec::new("orphan", orphan)
                .primary()
                .priority(20)
                .kwarg("enabled", OptionValue::Bool(true))
                .depends_on(vec![Dependency::new("helper", "does-not-exist")]),
        )
        .unwrap();

    let reports = ModuleGraph::new(registry, args(&input, &out, &[]))
        .unwrap()
        .execute()
        .unwrap();

    let orphan = report(&reports, "orphan");
    assert!(!orphan.success);
    assert_eq!(orphan.failures.len(), 1);
    assert_eq!(report(&reports, "signature").findings.len(), 1);
}

#[test]
fn unknown_option_is_rejected_before_running() {
    let mut args = ParsedArgs::new();
    args.insert("no-such-option".into(), OptionValue::Bool(true));
    assert!(ModuleGraph::new(Registry::builtin(), args).is_err());
}

/// Skips files named `skip*`, invalidates findings past 0x100, logs hooks
struct Gatekeeper {
    log: Rc<RefCell<Vec<String>>>,
}

impl Plugin for Gatekeeper {
    fn name(&self) -> &str {
        "gatekeeper"
    }

    fn pre_scan(&mut self, module: &str) {
        self.log.borrow_mut().push(format!("pre {}", module));
    }

    fn new_file(&mut self, path: &Path) -> bool {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        self.log.borrow_mut().push(format!("file {}", name));
        !name.starts_with("skip")
    }

    fn result(&mut self, finding: &mut Finding) {
        if finding.offset > 0x100 {
            finding.valid = false;
        }
    }
}

#[test]
fn plugins_veto_files_and_invalidate_findings() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("fw.bin");
    let skipped = dir.path().join("skip.bin");
    let mut data = vec![0u8; 0x200];
    data[0x10..0x10 + MAGIC.len()].copy_from_slice(MAGIC);
    data[0x180..0x180 + MAGIC.len()].copy_from_slice(MAGIC);
    fs::write(&input, &data).unwrap();
    fs::write(&skipped, &data).unwrap();

    let mut args = ParsedArgs::new();
    args.insert(
        "files".into(),
        list(&[skipped.to_str().unwrap(), input.to_str().unwrap()]),
    );
    args.insert("raw".into(), list(&["CARVEME!"]));

    let log = Rc::new(RefCell::new(Vec::new()));
    let mut graph = ModuleGraph::new(Registry::builtin(), args)
        .unwrap()
        .with_plugin(Box::new(Gatekeeper { log: Rc::clone(&log) }));
    let reports = graph.execute().unwrap();

    let offsets: Vec<u64> = report(&reports, "signature")
        .findings
        .iter()
        .map(|f| f.offset)
        .collect();
    assert_eq!(offsets, vec![0x10]);

    let log = log.borrow();
    assert!(log.contains(&"pre signature".to_string()));
    assert!(log.contains(&"file skip.bin".to_string()));
    assert!(log.contains(&"file fw.bin".to_string()));
}
