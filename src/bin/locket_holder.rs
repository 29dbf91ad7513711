//! locket-holder — holds a lock on behalf of a test harness.
//!
//! Protocol (stdout, one line each): pid, then after a stdin line either
//! "Acquired" or "LockError", then after another stdin line "Released".
//! Logs go to stderr so stdout stays machine-readable.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

use locket::Timeout;

#[derive(Parser, Debug)]
#[command(
    name = "locket-holder",
    version,
    about = "Acquire and release a path lock step by step, driven by stdin"
)]
struct Opt {
    /// Lock file path.
    path: PathBuf,
    /// Seconds to wait ("none" = forever, 0 = fail fast).
    #[arg(long, default_value = "none", value_parser = parse_timeout)]
    timeout: Timeout,
}

fn parse_timeout(s: &str) -> std::result::Result<Timeout, String> {
    Timeout::parse(s).ok_or_else(|| format!("invalid timeout '{s}'"))
}

fn init_logger() {
    // RUST_LOG overrides; default is info.
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn say(out: &mut impl Write, line: &str) -> Result<()> {
    writeln!(out, "{line}")?;
    out.flush().context("flush stdout")
}

fn wait_line(input: &mut impl BufRead) -> Result<()> {
    let mut buf = String::new();
    if input.read_line(&mut buf).context("read stdin")? == 0 {
        return Err(anyhow!("stdin closed"));
    }
    Ok(())
}

fn run() -> Result<i32> {
    let opt = Opt::parse();
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut out = std::io::stdout();

    say(&mut out, &std::process::id().to_string())?;
    let lock = locket::lock_file(&opt.path, opt.timeout)
        .with_context(|| format!("register {}", opt.path.display()))?;

    say(&mut out, "Send newline to stdin to acquire")?;
    wait_line(&mut input)?;
    match lock.acquire() {
        Ok(()) => say(&mut out, "Acquired")?,
        Err(e) if e.is_busy() => {
            say(&mut out, "LockError")?;
            return Ok(1);
        }
        Err(e) => return Err(e).context("acquire"),
    }

    say(&mut out, "Send newline to stdin to release")?;
    wait_line(&mut input)?;
    lock.release().context("release")?;
    say(&mut out, "Released")?;
    Ok(0)
}

fn main() {
    init_logger();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(2);
        }
    }
}
