//! Replays allocation traces against the `bufalloc` allocators.
//!
//! ```text
//! $ bufalloc-replay --allocator intrusive --size 128 trace.txt
//! ```

use std::{
    fs,
    io::{self, IsTerminal as _},
    path::{Path, PathBuf},
    process,
};

use ansi_term::{Color, Palette};
use argh::FromArgs;
use bufalloc::free_list::FitPolicy;
use snafu::ResultExt as _;
use snafu_utils::{GenericError, Report};
use tracing::Level;

use crate::{
    render::ChunkMap,
    session::{AllocatorKind, Config, Outcome, Session},
};

mod render;
mod session;
mod trace;

/// Replay allocation traces and print the resulting chunk maps.
#[derive(Debug, FromArgs)]
struct Args {
    /// trace files to replay, `-` reads standard input
    #[argh(positional)]
    traces: Vec<PathBuf>,
    /// allocator to drive: linear, stack, pool, free-list or intrusive
    #[argh(option, short = 'a', default = "AllocatorKind::FreeList")]
    allocator: AllocatorKind,
    /// buffer size in bytes
    #[argh(option, short = 's', default = "256")]
    size: usize,
    /// chunk size of the pool allocator
    #[argh(option, default = "16")]
    chunk_size: usize,
    /// initial fit policy of the free-list allocators: first or best
    #[argh(option, short = 'p', default = "FitPolicy::FirstFit")]
    policy: FitPolicy,
    /// disable colored output
    #[argh(switch)]
    no_color: bool,
    /// log level written to standard error
    #[argh(option, default = "Level::WARN")]
    log_level: Level,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            kind: self.allocator,
            buffer_size: self.size,
            chunk_size: self.chunk_size,
            policy: self.policy,
        }
    }
}

fn main() {
    let args: Args = argh::from_env();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .with_ansi(!args.no_color && io::stderr().is_terminal())
        .init();

    if let Err(err) = run(&args) {
        let palette = Palette::new(!args.no_color && io::stderr().is_terminal());
        let report = Report::new(err).with_palette(palette);
        eprintln!("{report}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), GenericError> {
    let palette = Palette::new(!args.no_color && io::stdout().is_terminal());
    if args.traces.is_empty() {
        snafu::whatever!("no trace given, pass a file or `-` for standard input");
    }
    for path in &args.traces {
        replay(args, palette, path)
            .with_whatever_context(|_| format!("failed to replay trace, path={}", path.display()))?;
    }
    Ok(())
}

fn replay(args: &Args, palette: Palette, path: &Path) -> Result<(), GenericError> {
    let text = if path == Path::new("-") {
        io::read_to_string(io::stdin()).whatever_context("failed to read standard input")?
    } else {
        fs::read_to_string(path).whatever_context("failed to read trace")?
    };
    let lines = trace::parse(&text).whatever_context("failed to parse trace")?;
    let mut session = Session::new(args.config()).whatever_context("failed to start session")?;
    tracing::info!(path = %path.display(), commands = lines.len(), "replaying trace");

    println!(
        "{} {} ({}, {} bytes)",
        palette.paint(Color::Blue, "Trace:"),
        path.display(),
        session.config().kind,
        session.config().buffer_size
    );
    for line in &lines {
        let outcome = session
            .apply(line)
            .whatever_context("failed to apply command")?;
        let command = line.command.to_string();
        let result = describe(palette, &outcome);
        println!("{:>5}: {command:<16} {result}", line.number);
        if outcome == Outcome::Dump {
            print_map(palette, &session, "dump:");
        }
    }
    print_map(palette, &session, "final:");
    println!("{} live allocations", session.live_count());
    Ok(())
}

fn describe(palette: Palette, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Allocated { handle, offset } => format!(
            "-> {} at offset {offset}",
            palette.paint(Color::Cyan, handle)
        ),
        Outcome::Exhausted => format!("-> {}", palette.paint(Color::Red, "exhausted")),
        Outcome::Freed(handles) if handles.is_empty() => "-> nothing to free".to_owned(),
        Outcome::Freed(handles) => {
            let handles = handles
                .iter()
                .map(|handle| palette.paint(Color::Cyan, handle).to_string())
                .collect::<Vec<_>>()
                .join(" ");
            format!("-> released {handles}")
        }
        Outcome::Cleared => "-> all allocations released".to_owned(),
        Outcome::Reset => "-> buffer released".to_owned(),
        Outcome::PolicySet(policy) => format!("-> using {policy}"),
        Outcome::Dump => String::new(),
    }
}

fn print_map(palette: Palette, session: &Session, title: &str) {
    let segments = session.segments();
    let map = ChunkMap {
        title,
        buffer_size: session.buffer_size(),
        segments: &segments,
        palette,
    };
    print!("{map}");
}
