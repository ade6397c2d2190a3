use std::path::Path;
use std::process::Command;

/// Short hash of the workspace checkout, if it is a git checkout at all
fn head_sha(workspace: &Path) -> Option<String> {
    let out = Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let sha = String::from_utf8(out.stdout).ok()?;
    let sha = sha.trim();
    (!sha.is_empty()).then(|| sha.to_string())
}

fn main() {
    let workspace = Path::new(env!("CARGO_MANIFEST_DIR")).join("..");
    let sha = head_sha(&workspace).unwrap_or_else(|| String::from("unknown"));
    println!("cargo:rustc-env=TALLY_BUILD_SHA={sha}");
}
