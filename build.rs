// Embeds build provenance (git commit/branch, timestamp) into the binary via
// rustc-env, so a running kernel can report exactly what it was built from —
// adapted from the teacher's build script.

use std::env;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    println!("cargo:rustc-env=GIT_COMMIT={}", get_git_commit());
    println!("cargo:rustc-env=GIT_DIRTY={}", if is_git_dirty() { "1" } else { "0" });
    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs().to_string())
            .unwrap_or_else(|_| "0".to_string())
    );
    println!(
        "cargo:rustc-env=PROFILE={}",
        env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string())
    );
    println!(
        "cargo:rustc-env=TARGET={}",
        env::var("TARGET").unwrap_or_else(|_| "unknown".to_string())
    );
}

fn get_git_commit() -> String {
    Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| output.status.success().then(|| String::from_utf8(output.stdout).ok()).flatten())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_git_dirty() -> bool {
    Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .and_then(|output| output.status.success().then_some(!output.stdout.is_empty()))
        .unwrap_or(false)
}
