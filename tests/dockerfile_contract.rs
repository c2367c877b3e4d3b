use std::fs;
use std::path::{Path, PathBuf};

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn dockerfile() -> String {
    fs::read_to_string(repo_root().join("Dockerfile")).expect("read Dockerfile")
}

fn instructions(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

fn extract_copy_sources(line: &str) -> Option<Vec<String>> {
    let rest = line.strip_prefix("COPY ")?;
    if rest.contains("--from=") {
        return None;
    }
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() < 2 {
        return None;
    }
    Some(
        tokens[..tokens.len() - 1]
            .iter()
            .map(|s| s.trim_matches('"').to_string())
            .collect(),
    )
}

#[test]
fn base_image_is_an_overridable_versioned_argument() {
    let lines = instructions(&dockerfile());
    let first_from = lines
        .iter()
        .position(|l| l.starts_with("FROM "))
        .expect("FROM instruction");

    let arg = lines[..first_from]
        .iter()
        .find_map(|l| l.strip_prefix("ARG BUILD_FROM="))
        .expect("ARG BUILD_FROM with a default before the first FROM");
    let (_, tag) = arg.rsplit_once(':').expect("default base image carries a tag");
    assert!(
        tag.chars().next().is_some_and(|c| c.is_ascii_digit()),
        "default base image must be pinned to a version, got {arg}"
    );

    let last_from = lines
        .iter()
        .rev()
        .find(|l| l.starts_with("FROM "))
        .expect("runtime stage");
    assert!(
        last_from == "FROM ${BUILD_FROM}" || last_from == "FROM $BUILD_FROM",
        "runtime stage must build on BUILD_FROM, got {last_from}"
    );
}

#[test]
fn run_sh_is_the_only_command() {
    let lines = instructions(&dockerfile());

    let cmds: Vec<&String> = lines.iter().filter(|l| l.starts_with("CMD")).collect();
    assert_eq!(cmds.len(), 1, "exactly one CMD expected");
    let cmd = cmds[0].trim_start_matches("CMD").trim();
    let parsed: Vec<String> = serde_json::from_str(cmd).expect("CMD in exec form");
    assert_eq!(parsed, vec!["/run.sh".to_string()]);

    for entrypoint in lines.iter().filter(|l| l.starts_with("ENTRYPOINT")) {
        let value = entrypoint.trim_start_matches("ENTRYPOINT").trim();
        let parsed: Vec<String> = serde_json::from_str(value).expect("ENTRYPOINT in exec form");
        assert!(parsed.is_empty(), "inherited entrypoint must be cleared, got {entrypoint}");
    }
}

/// Splits the instructions into (everything before the runtime stage, runtime stage).
fn split_runtime_stage(lines: &[String]) -> (&[String], &[String]) {
    let start = lines
        .iter()
        .rposition(|l| l.starts_with("FROM "))
        .expect("runtime stage");
    lines.split_at(start)
}

#[test]
fn fixed_paths_are_installed_and_run_sh_is_executable() {
    let lines = instructions(&dockerfile());
    let (_, runtime) = split_runtime_stage(&lines);

    assert!(runtime.iter().any(|l| l == "COPY run.sh /run.sh"));
    assert!(runtime
        .iter()
        .any(|l| l.starts_with("COPY --from=builder") && l.ends_with(" /app/k1max-ws-bridge")));
    assert!(
        runtime.iter().any(|l| l == "COPY Cargo.toml Cargo.lock /app/"),
        "the dependency manifest must be installed under /app"
    );

    let chmod = lines
        .iter()
        .find(|l| l.starts_with("RUN chmod a+x"))
        .expect("chmod instruction");
    assert!(chmod.split_whitespace().any(|t| t == "/run.sh"));
}

#[test]
fn build_uses_the_committed_lockfile() {
    let lines = instructions(&dockerfile());
    let (builder, _) = split_runtime_stage(&lines);

    let manifest_copy = builder
        .iter()
        .filter_map(|l| extract_copy_sources(l))
        .find(|srcs| srcs.iter().any(|s| s == "Cargo.toml"))
        .expect("builder copies Cargo.toml");
    assert!(
        manifest_copy.iter().any(|s| s == "Cargo.lock"),
        "Cargo.lock must be copied next to Cargo.toml"
    );

    let build = builder
        .iter()
        .find(|l| l.starts_with("RUN cargo build"))
        .expect("cargo build step");
    assert!(
        build.split_whitespace().any(|t| t == "--locked"),
        "cargo build must refuse to re-resolve dependencies: {build}"
    );
}

#[test]
fn package_installs_keep_no_cache() {
    for line in instructions(&dockerfile()) {
        if line.contains("apk add") {
            assert!(line.contains("--no-cache"), "apk add without --no-cache: {line}");
        }
    }
}

#[test]
fn copy_sources_exist() {
    let root = repo_root();
    let mut missing = Vec::new();
    for (idx, line) in dockerfile().lines().enumerate() {
        let Some(srcs) = extract_copy_sources(line.trim()) else {
            continue;
        };
        for src in srcs {
            if src == "." || src.starts_with('/') {
                continue;
            }
            if !root.join(Path::new(&src)).exists() {
                missing.push(format!("Dockerfile:{} -> {}", idx + 1, src));
            }
        }
    }
    assert!(
        missing.is_empty(),
        "Dockerfile COPY sources must exist:\n{}",
        missing.join("\n")
    );
}

#[test]
fn run_sh_execs_the_supervisor() {
    let path = repo_root().join("run.sh");
    let script = fs::read_to_string(&path).expect("read run.sh");
    assert!(script.starts_with("#!/bin/sh"));
    assert!(
        script
            .lines()
            .any(|l| l.trim_start().starts_with("exec /app/k1max-ws-bridge supervise")),
        "run.sh must hand PID 1 to the supervisor"
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&path).expect("stat run.sh").permissions().mode();
        assert!(mode & 0o111 != 0, "run.sh must be executable");
    }
}
