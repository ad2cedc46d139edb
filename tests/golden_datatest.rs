use datatest_stable::Utf8Path;
use quo::{compile_source, Granularity, Options, Stage};

#[derive(thiserror::Error, Debug)]
#[error("golden output mismatch in {0}")]
pub struct DatatestError(Box<Utf8Path>);

#[derive(thiserror::Error, Debug)]
#[error("malformed golden file {path}: {reason}")]
pub struct MalformedError {
    path: Box<Utf8Path>,
    reason: &'static str,
}

/// A golden file:
///
/// ```text
/// // stages: 0 1 2
/// // mode: module
/// ---
/// expected output, or `error: <message>`
/// ---
/// source
/// ```
struct GoldenFile<'a> {
    header: Vec<&'a str>,
    stages: Vec<Stage>,
    mode: Granularity,
    expected: String,
    source: String,
}

fn read_golden<'a>(path: &Utf8Path, contents: &'a str) -> Result<GoldenFile<'a>, MalformedError> {
    let malformed = |reason| MalformedError {
        path: Box::from(path),
        reason,
    };
    let mut sections = vec![vec![]];
    for line in contents.lines() {
        if line.trim_end() == "---" && sections.len() < 3 {
            sections.push(vec![]);
        } else if let Some(section) = sections.last_mut() {
            section.push(line);
        }
    }
    let [header, expected, source] = <[Vec<&str>; 3]>::try_from(sections)
        .map_err(|_| malformed("expected header, output and source sections"))?;

    let mut stages = vec![];
    let mut mode = None;
    for line in &header {
        let Some((key, value)) = line.trim_start_matches("//").split_once(':') else {
            continue;
        };
        match key.trim() {
            "stages" => {
                stages = value
                    .split_whitespace()
                    .map(str::parse)
                    .collect::<Result<_, _>>()
                    .map_err(|_| malformed("unknown stage"))?
            }
            "mode" => mode = Some(value.trim().parse().map_err(|_| malformed("unknown mode"))?),
            _ => {}
        }
    }
    if stages.is_empty() {
        return Err(malformed("no stages listed"));
    }

    Ok(GoldenFile {
        header,
        stages,
        mode: mode.ok_or_else(|| malformed("no mode given"))?,
        expected: expected.join("\n"),
        source: source.join("\n"),
    })
}

fn stitch(file: &GoldenFile, output: &str) -> String {
    let mut lines = file.header.clone();
    lines.push("---");
    lines.extend(output.lines());
    lines.push("---");
    lines.extend(file.source.lines());
    lines.join("\n") + "\n"
}

fn golden_test(path: &Utf8Path, contents: String) -> datatest_stable::Result<()> {
    let file = read_golden(path, &contents)?;
    let options = Options::default();

    let outputs = file
        .stages
        .iter()
        .map(|stage| {
            let output = match compile_source(*stage, file.mode, &file.source, &options) {
                Ok(text) => text.trim_end().to_string(),
                Err(error) => format!("error: {error}"),
            };
            (*stage, output)
        })
        .collect::<Vec<_>>();

    if std::env::var("DATATEST_EXPECT").is_ok() {
        std::fs::write(path, stitch(&file, &outputs[0].1))?;
        return Ok(());
    }

    let expected = file.expected.trim_end();
    let mut failed = false;
    for (stage, output) in &outputs {
        if output != expected {
            println!(
                "error in {path} at stage {stage}: mismatched output\n\nGot:\n{output}\n\nExpected:\n{expected}"
            );
            failed = true;
        }
    }
    if failed {
        Err(DatatestError(Box::from(path)))?
    }
    Ok(())
}

datatest_stable::harness! {
    golden_test, "test_data", r"^.*\.qgd",
}
