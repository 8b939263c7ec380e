use std::process::Command;

use anyhow::{Context, Result};

/// Feature tiers of `conflux-common`, each checked without default features
const FEATURE_COMBINATIONS: &[&[&str]] = &[
    &["foundation"],
    &["observability"],
    &["runtime"],
    &["test-utils"],
    &["foundation", "serde"],
];

/// Check that every feature tier compiles on its own.
///
/// # Errors
///
/// Returns an error if cargo cannot be run or any combination fails to
/// compile.
pub fn test_feature_matrix() -> Result<()> {
    let total = FEATURE_COMBINATIONS.len() + 1;
    println!("Testing {total} conflux-common feature combinations...");

    println!("\n[1/{total}] cargo check -p conflux-common");
    check(&["check", "-p", "conflux-common"], "default")?;

    for (index, features) in FEATURE_COMBINATIONS.iter().enumerate() {
        let joined = features.join(",");
        println!(
            "\n[{}/{total}] cargo check -p conflux-common --no-default-features --features {joined}",
            index + 2
        );
        check(
            &["check", "-p", "conflux-common", "--no-default-features", "--features", &joined],
            &joined,
        )?;
    }

    println!("\n✅ All {total} feature combinations compile successfully!");

    Ok(())
}

fn check(args: &[&str], label: &str) -> Result<()> {
    let status = Command::new("cargo")
        .args(args)
        .status()
        .with_context(|| format!("Failed to run cargo check for '{label}'"))?;

    if !status.success() {
        anyhow::bail!("Feature combination '{label}' failed to compile");
    }

    println!("✅ Features '{label}' compiled successfully");
    Ok(())
}
