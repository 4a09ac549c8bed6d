// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=CAMERA_SESSION_VERSION");

    // Packagers can pin the version without a git checkout
    let version = std::env::var("CAMERA_SESSION_VERSION").unwrap_or_else(|_| describe());

    println!("cargo::rustc-env=CAMERA_SESSION_GIT_VERSION={}", version);
}

/// `git describe` output reshaped to `<version>-<hash>` or `<version>-dirty-<hash>`.
fn describe() -> String {
    let Some(described) = git(&["describe", "--tags", "--always", "--match", "v*"]) else {
        return format!(
            "{}-{}",
            env!("CARGO_PKG_VERSION"),
            git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string())
        );
    };
    let described = described.strip_prefix('v').unwrap_or(&described).to_string();

    let parts: Vec<&str> = described.rsplitn(3, '-').collect();
    match parts.as_slice() {
        [hash, _commits, base] => {
            let hash = hash.strip_prefix('g').unwrap_or(hash);
            format!("{}-dirty-{}", base, hash)
        }
        _ => {
            let hash =
                git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
            format!("{}-{}", described, hash)
        }
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
