// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coawait CLI - runs the suspension demos.

mod output;

use std::env;
use std::process;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use coawait_rt::{explode, spawn, spawn_blocking, SuspensionAdapter, TaskError, WaiterConfig};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    output::init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let verbose = take_flag(&mut args, "--verbose") | take_flag(&mut args, "-v");
    init_logging(verbose);

    let Some(cmd) = args.first().cloned() else {
        print_usage();
        return;
    };
    let rest = &args[1..];

    match cmd.as_str() {
        "await" => {
            let delay_ms = match parse_opt(rest, "--delay-ms", 2000u64) {
                Ok(v) => v,
                Err(msg) => usage_error(&msg),
            };
            let value = match parse_opt(rest, "--value", 42i32) {
                Ok(v) => v,
                Err(msg) => usage_error(&msg),
            };
            cmd_await(Duration::from_millis(delay_ms), value);
        }
        "fail" => {
            let message = rest.first().map(String::as_str).unwrap_or("boom");
            cmd_fail(message);
        }
        "explode" => {
            let Some(text) = rest.first() else {
                usage_error("Usage: coawait explode <text>");
            };
            cmd_explode(text);
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        "version" | "--version" | "-V" => {
            println!("coawait {}", VERSION);
        }
        other => {
            eprintln!("{}: unknown command: {}", output::error_label(), other);
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        "{} {} - a task awaiting a blocking operation",
        output::title("Coawait"),
        output::version(VERSION)
    );
    println!();
    println!(
        "{} coawait [--verbose] <command> [args]",
        output::section_header("Usage:")
    );
    println!();
    println!("{}", output::section_header("Commands:"));
    println!(
        "  {} {}  Await a delayed value through a waiter thread",
        output::command("await"),
        output::arg("[--delay-ms N] [--value V]")
    );
    println!(
        "  {} {}                   Await an operation that fails",
        output::command("fail"),
        output::arg("[MESSAGE]")
    );
    println!(
        "  {} {}                   Yield TEXT one character per line",
        output::command("explode"),
        output::arg("TEXT")
    );
    println!("  {}                              Show this help", output::command("help"));
    println!("  {}                           Show version", output::command("version"));
    println!();
    println!("{}", output::section_header("Environment:"));
    println!("  COAWAIT_LOG                 Log filter (e.g. coawait_rt=trace)");
    println!("  COAWAIT_MAX_WAITERS         Limit on live waiter threads");
    println!("  COAWAIT_WAITER_STACK_SIZE   Waiter thread stack size in bytes");
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("coawait_rt=trace")
    } else {
        EnvFilter::try_from_env("COAWAIT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();
}

fn adapter_from_env() -> SuspensionAdapter {
    match WaiterConfig::from_env() {
        Ok(config) => SuspensionAdapter::new(config),
        Err(e) => {
            eprintln!("{}: {}", output::error_label(), e);
            process::exit(2);
        }
    }
}

fn cmd_await(delay: Duration, value: i32) {
    let adapter = adapter_from_env();

    let task = spawn(async move {
        let operation = spawn_blocking(move || {
            thread::sleep(delay);
            Ok(value)
        });
        let result = adapter.adapt(operation).await?;
        println!(
            "Async operation completed. Result: {}",
            output::value(&result.to_string())
        );
        Ok::<_, TaskError>(result)
    });

    match task.consume() {
        Ok(result) => println!("Async task result: {}", output::value(&result.to_string())),
        Err(e) => {
            eprintln!("{}: {}", output::error_label(), e);
            process::exit(1);
        }
    }
}

fn cmd_fail(message: &str) {
    let adapter = adapter_from_env();
    let message = message.to_string();

    let task = spawn(async move {
        let operation = spawn_blocking(move || -> Result<i32, TaskError> {
            thread::sleep(Duration::from_millis(10));
            Err(TaskError::failed(message))
        });
        let result = adapter.adapt(operation).await?;
        Ok::<_, TaskError>(result)
    });

    match task.consume() {
        Ok(result) => println!("{} unexpected result {}", output::ok_label(), result),
        Err(e) => {
            eprintln!("{}: {}", output::error_label(), e);
            if let Some(payload) = e.payload() {
                println!("Failure payload: {}", output::value(payload));
            }
            process::exit(1);
        }
    }
}

fn cmd_explode(text: &str) {
    let mut chars = explode(text);
    while chars.has_next() {
        if let Some(ch) = chars.next() {
            println!("{}", ch);
        }
    }
    println!("{}", output::dimmed("(exhausted)"));
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

fn parse_opt<T: FromStr>(args: &[String], name: &str, default: T) -> Result<T, String> {
    let Some(pos) = args.iter().position(|a| a == name) else {
        return Ok(default);
    };
    let Some(raw) = args.get(pos + 1) else {
        return Err(format!("{} needs a value", name));
    };
    raw.parse()
        .map_err(|_| {
            format!(
                "{} expects {}, got {:?}",
                name,
                std::any::type_name::<T>(),
                raw
            )
        })
}

fn usage_error(msg: &str) -> ! {
    eprintln!("{}: {}", output::error_label(), msg);
    process::exit(1);
}
