//! Build automation tasks for the pgmux workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for pgmux")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, test)
    Ci,
    /// Run cargo fmt --check
    Fmt,
    /// Run clippy on every target
    Clippy,
    /// Run all tests
    Test,
    /// Run only the virtual-time tests (no sockets)
    Sim,
    /// Run the loopback socket tests
    Net,
    /// Run the property tests with more cases
    Prop {
        /// Number of cases per property
        #[arg(long, default_value_t = 2048)]
        cases: u32,
    },
    /// Generate documentation
    Doc,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh)?;
            clippy(&sh)?;
            test(&sh)?;
            println!("All CI checks passed!");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test => test(&sh)?,
        Command::Sim => sim(&sh)?,
        Command::Net => net(&sh)?,
        Command::Prop { cases } => prop(&sh, cases)?,
        Command::Doc => doc(&sh)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)
        .context("invalid UTF-8 in cargo output")?
        .trim()
        .to_string();

    Ok(PathBuf::from(path)
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("Running tests...");
    cmd!(sh, "cargo test --workspace").run()?;
    Ok(())
}

fn sim(sh: &Shell) -> Result<()> {
    println!("Running virtual-time tests...");
    cmd!(sh, "cargo test -p pgmux-fiber --lib").run()?;
    cmd!(sh, "cargo test -p pgmux-pool").run()?;
    Ok(())
}

fn net(sh: &Shell) -> Result<()> {
    println!("Running loopback socket tests...");
    cmd!(sh, "cargo test -p pgmux-fiber --test tokio_connect").run()?;
    Ok(())
}

fn prop(sh: &Shell, cases: u32) -> Result<()> {
    println!("Running property tests with {cases} cases...");
    let _env = sh.push_env("PROPTEST_CASES", cases.to_string());
    cmd!(sh, "cargo test --workspace prop_").run()?;
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("Generating documentation...");
    cmd!(sh, "cargo doc --workspace --no-deps").run()?;
    Ok(())
}
